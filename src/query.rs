use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::dns::{DnsMessage, DnsQuestion, DnsRecord};
use crate::error::{ResolveError, Result};
use crate::inflight::PendingQuery;
use crate::resolver::Shared;

/// Issue one question to one server: allocate an ID, encode, send over the
/// shared UDP socket, and await the demultiplexed response under the
/// per-query deadline. NXDOMAIN and SERVFAIL are successful settles here;
/// the resolve loop interprets them.
pub(crate) async fn run_query(
    shared: &Arc<Shared>,
    server: SocketAddr,
    question: DnsQuestion,
    additionals: &[DnsRecord],
) -> Result<DnsMessage> {
    if shared.closed.load(Ordering::Acquire) {
        return Err(ResolveError::ResolverClosed);
    }

    let (tx, rx) = oneshot::channel();
    let id = shared.inflight.register(
        server,
        PendingQuery {
            question: question.clone(),
            tx,
        },
    )?;

    let mut message = DnsMessage::query(id, question.clone(), shared.config.recursion_desired);
    if shared.config.opt_record_enabled {
        message.add_opt(shared.config.max_payload_size);
    }
    message.additionals.extend_from_slice(additionals);

    let wire = match message.encode() {
        Ok(wire) => wire,
        Err(e) => {
            shared.inflight.claim(server, id);
            return Err(e.into());
        }
    };

    if let Err(e) = shared.socket.send_to(&wire, server).await {
        shared.inflight.claim(server, id);
        return Err(ResolveError::Transport(format!(
            "UDP send to {} failed: {}",
            server, e
        )));
    }
    shared.observer.query_written(server, id);
    trace!("Sent {} byte query id {} to {}", wire.len(), id, server);

    // the slot must be released even if the caller is dropped before the
    // deadline, so the expiry timer lives in its own task
    {
        let shared = Arc::clone(shared);
        let deadline = shared.config.query_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if shared.inflight.claim(server, id).is_some() {
                trace!("Reaped abandoned query id {} for {}", id, server);
            }
        });
    }

    let response = match timeout(shared.config.query_timeout, rx).await {
        Ok(Ok(response)) => response,
        Ok(Err(_)) => {
            // The demux loop dropped the slot without settling it: the
            // resolver is shutting down.
            shared.inflight.claim(server, id);
            return Err(ResolveError::ResolverClosed);
        }
        Err(_) => {
            shared.inflight.claim(server, id);
            debug!("Query id {} to {} timed out", id, server);
            return Err(ResolveError::Timeout);
        }
    };

    if response.is_truncated() && shared.config.tcp_fallback_enabled {
        debug!("Truncated response from {}, reissuing over TCP", server);
        match tcp_requery(shared, server, &question, additionals).await {
            Ok(full) => return Ok(full),
            Err(e) => {
                warn!(
                    "TCP fallback to {} failed ({}); keeping the truncated answer",
                    server, e
                );
                return Ok(response);
            }
        }
    }

    Ok(response)
}

/// Reissue a question over a one-shot TCP connection to the same server,
/// with the two-byte length framing of RFC 1035 §4.2.2. The socket is
/// dropped before this returns on every path.
async fn tcp_requery(
    shared: &Shared,
    server: SocketAddr,
    question: &DnsQuestion,
    additionals: &[DnsRecord],
) -> Result<DnsMessage> {
    let id = rand::random::<u16>();
    let mut message = DnsMessage::query(id, question.clone(), shared.config.recursion_desired);
    if shared.config.opt_record_enabled {
        message.add_opt(shared.config.max_payload_size);
    }
    message.additionals.extend_from_slice(additionals);
    let wire = message.encode()?;

    let attempt = async {
        let mut stream = TcpStream::connect(server)
            .await
            .map_err(|e| ResolveError::Transport(format!("TCP connect to {} failed: {}", server, e)))?;

        stream
            .write_all(&(wire.len() as u16).to_be_bytes())
            .await
            .map_err(|e| ResolveError::Transport(e.to_string()))?;
        stream
            .write_all(&wire)
            .await
            .map_err(|e| ResolveError::Transport(e.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|e| ResolveError::Transport(e.to_string()))?;

        let mut length_buf = [0u8; 2];
        stream
            .read_exact(&mut length_buf)
            .await
            .map_err(|e| ResolveError::Transport(e.to_string()))?;
        let response_length = u16::from_be_bytes(length_buf) as usize;

        let mut response_buf = vec![0u8; response_length];
        stream
            .read_exact(&mut response_buf)
            .await
            .map_err(|e| ResolveError::Transport(e.to_string()))?;

        let response = DnsMessage::decode(&response_buf)?;
        if response.header.id != id || !response.header.qr {
            return Err(ResolveError::Decode(format!(
                "TCP response from {} does not match the question",
                server
            )));
        }
        if response
            .first_question()
            .is_none_or(|q| q != question)
        {
            return Err(ResolveError::Decode(format!(
                "TCP response from {} carries a different question",
                server
            )));
        }
        trace!(
            "TCP fallback to {} returned {} answers",
            server,
            response.answers.len()
        );
        Ok(response)
    };

    timeout(shared.config.query_timeout, attempt)
        .await
        .map_err(|_| ResolveError::Timeout)?
}
