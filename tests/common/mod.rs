#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use muninn::dns::{DnsMessage, DnsRecord, RData, RecordType, ResponseCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};

/// What the mock server answers for one (name, type) question.
#[derive(Clone)]
pub enum Reply {
    /// NOERROR with these answer records.
    Records(Vec<DnsRecord>),
    /// An empty response with the given rcode.
    Rcode(ResponseCode),
    /// TC=1 with the partial set over UDP; the full set over TCP.
    Truncated {
        partial: Vec<DnsRecord>,
        full: Vec<DnsRecord>,
    },
    /// A delegation: NS in the authority section plus optional glue, with
    /// any partial answer-section records alongside.
    Referral {
        answers: Vec<DnsRecord>,
        zone: String,
        ns_target: String,
        glue: Option<DnsRecord>,
    },
    /// NOERROR answered only after the delay.
    Delayed(Duration, Vec<DnsRecord>),
    /// Drop the query on the floor.
    Ignore,
}

#[derive(Default, Clone)]
pub struct MockZone {
    replies: HashMap<(String, RecordType), Reply>,
}

impl MockZone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, name: &str, rtype: RecordType, reply: Reply) -> Self {
        self.replies.insert((name.to_string(), rtype), reply);
        self
    }

    fn lookup(&self, query: &DnsMessage) -> Option<Reply> {
        let question = query.first_question()?;
        Some(
            self.replies
                .get(&(question.name.clone(), question.qtype))
                .cloned()
                .unwrap_or(Reply::Rcode(ResponseCode::NameError)),
        )
    }

    fn render(&self, query: &DnsMessage, reply: &Reply, via_tcp: bool) -> DnsMessage {
        let mut response = DnsMessage {
            header: query.header,
            questions: query.questions.clone(),
            ..DnsMessage::default()
        };
        response.header.qr = true;
        response.header.ra = true;
        response.header.tc = false;
        response.header.rcode = ResponseCode::NoError.to_u8();

        match reply {
            Reply::Records(records) | Reply::Delayed(_, records) => {
                response.answers = records.clone();
            }
            Reply::Rcode(code) => response.header.rcode = code.to_u8(),
            Reply::Truncated { partial, full } => {
                if via_tcp {
                    response.answers = full.clone();
                } else {
                    response.answers = partial.clone();
                    response.header.tc = true;
                }
            }
            Reply::Referral {
                answers,
                zone,
                ns_target,
                glue,
            } => {
                response.answers = answers.clone();
                response
                    .authorities
                    .push(DnsRecord::new(zone, 300, RData::NS(ns_target.clone())));
                if let Some(glue) = glue {
                    response.additionals.push(glue.clone());
                }
            }
            Reply::Ignore => unreachable!("ignored queries are never rendered"),
        }
        response.update_counts();
        response
    }
}

/// An in-process name server answering on UDP and TCP at the same port.
pub struct MockDns {
    pub addr: SocketAddr,
    queries: Arc<AtomicUsize>,
}

impl MockDns {
    pub async fn start(zone: MockZone) -> Self {
        let udp = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = udp.local_addr().unwrap();
        let tcp = TcpListener::bind(addr).await.unwrap();
        let queries = Arc::new(AtomicUsize::new(0));
        let zone = Arc::new(zone);

        {
            let udp = Arc::clone(&udp);
            let zone = Arc::clone(&zone);
            let queries = Arc::clone(&queries);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    let Ok((len, from)) = udp.recv_from(&mut buf).await else {
                        break;
                    };
                    let Ok(query) = DnsMessage::decode(&buf[..len]) else {
                        continue;
                    };
                    queries.fetch_add(1, Ordering::SeqCst);
                    let Some(reply) = zone.lookup(&query) else {
                        continue;
                    };
                    if matches!(reply, Reply::Ignore) {
                        continue;
                    }
                    let udp = Arc::clone(&udp);
                    let zone = Arc::clone(&zone);
                    tokio::spawn(async move {
                        if let Reply::Delayed(delay, _) = &reply {
                            tokio::time::sleep(*delay).await;
                        }
                        let response = zone.render(&query, &reply, false);
                        let _ = udp.send_to(&response.encode().unwrap(), from).await;
                    });
                }
            });
        }

        {
            let zone = Arc::clone(&zone);
            tokio::spawn(async move {
                loop {
                    let Ok((mut stream, _)) = tcp.accept().await else {
                        break;
                    };
                    let zone = Arc::clone(&zone);
                    tokio::spawn(async move {
                        let mut len_buf = [0u8; 2];
                        if stream.read_exact(&mut len_buf).await.is_err() {
                            return;
                        }
                        let len = u16::from_be_bytes(len_buf) as usize;
                        let mut buf = vec![0u8; len];
                        if stream.read_exact(&mut buf).await.is_err() {
                            return;
                        }
                        let Ok(query) = DnsMessage::decode(&buf) else {
                            return;
                        };
                        let Some(reply) = zone.lookup(&query) else {
                            return;
                        };
                        if matches!(reply, Reply::Ignore) {
                            return;
                        }
                        let response = zone.render(&query, &reply, true);
                        let wire = response.encode().unwrap();
                        let _ = stream.write_all(&(wire.len() as u16).to_be_bytes()).await;
                        let _ = stream.write_all(&wire).await;
                    });
                }
            });
        }

        MockDns { addr, queries }
    }

    /// Number of UDP queries received so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}
