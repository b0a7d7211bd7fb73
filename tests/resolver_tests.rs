mod common;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use common::{MockDns, MockZone, Reply};
use muninn::dns::{DnsMessage, DnsQuestion, DnsRecord, RData, RecordType, ResponseCode};
use muninn::hosts::InMemoryHostsResolver;
use muninn::observer::QueryLifecycleObserver;
use muninn::{ResolveError, ResolvedAddressTypes, Resolver};
use tokio::net::UdpSocket;

fn a_record(name: &str, ttl: u32, addr: [u8; 4]) -> DnsRecord {
    DnsRecord::new(name, ttl, RData::A(Ipv4Addr::from(addr)))
}

async fn v4_resolver(server: SocketAddr) -> Resolver {
    Resolver::builder()
        .name_servers(vec![server])
        .resolved_address_types(ResolvedAddressTypes::Ipv4Only)
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_plain_a_lookup() {
    let server = MockDns::start(
        MockZone::new().reply(
            "example.org",
            RecordType::A,
            Reply::Records(vec![a_record("example.org", 300, [93, 184, 216, 34])]),
        ),
    )
    .await;
    let resolver = v4_resolver(server.addr).await;

    let addr = resolver.resolve("example.org").await.unwrap();
    assert_eq!(addr, IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)));
    assert_eq!(server.query_count(), 1);
}

#[tokio::test]
async fn test_second_resolve_within_ttl_issues_no_queries() {
    let server = MockDns::start(
        MockZone::new().reply(
            "example.org",
            RecordType::A,
            Reply::Records(vec![a_record("example.org", 300, [93, 184, 216, 34])]),
        ),
    )
    .await;
    let resolver = v4_resolver(server.addr).await;

    let first = resolver.resolve_all("example.org").await.unwrap();
    let count_after_first = server.query_count();
    let second = resolver.resolve_all("example.org").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(server.query_count(), count_after_first);
}

#[tokio::test]
async fn test_cname_chase_across_responses() {
    let server = MockDns::start(
        MockZone::new()
            .reply(
                "www.example.org",
                RecordType::A,
                Reply::Records(vec![DnsRecord::new(
                    "www.example.org",
                    600,
                    RData::CNAME("example.org".to_string()),
                )]),
            )
            .reply(
                "example.org",
                RecordType::A,
                Reply::Records(vec![a_record("example.org", 300, [93, 184, 216, 34])]),
            ),
    )
    .await;
    let resolver = v4_resolver(server.addr).await;

    let addr = resolver.resolve("www.example.org").await.unwrap();
    assert_eq!(addr, IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)));
    assert_eq!(server.query_count(), 2);

    // both the alias edge and the terminal answer are now cached
    let again = resolver.resolve("www.example.org").await.unwrap();
    assert_eq!(again, addr);
    assert_eq!(server.query_count(), 2);
}

#[tokio::test]
async fn test_cname_chain_in_single_response() {
    let server = MockDns::start(
        MockZone::new().reply(
            "www.example.org",
            RecordType::A,
            Reply::Records(vec![
                DnsRecord::new(
                    "www.example.org",
                    600,
                    RData::CNAME("example.org".to_string()),
                ),
                a_record("example.org", 300, [93, 184, 216, 34]),
            ]),
        ),
    )
    .await;
    let resolver = v4_resolver(server.addr).await;

    let addr = resolver.resolve("www.example.org").await.unwrap();
    assert_eq!(addr, IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)));
    assert_eq!(server.query_count(), 1);
}

#[tokio::test]
async fn test_cname_loop_is_bounded() {
    let server = MockDns::start(
        MockZone::new()
            .reply(
                "a.loop.test",
                RecordType::A,
                Reply::Records(vec![DnsRecord::new(
                    "a.loop.test",
                    600,
                    RData::CNAME("b.loop.test".to_string()),
                )]),
            )
            .reply(
                "b.loop.test",
                RecordType::A,
                Reply::Records(vec![DnsRecord::new(
                    "b.loop.test",
                    600,
                    RData::CNAME("a.loop.test".to_string()),
                )]),
            ),
    )
    .await;
    let resolver = Resolver::builder()
        .name_servers(vec![server.addr])
        .resolved_address_types(ResolvedAddressTypes::Ipv4Only)
        .max_queries_per_resolve(64)
        .build()
        .await
        .unwrap();

    let err = resolver.resolve("a.loop.test").await.unwrap_err();
    assert!(matches!(err, ResolveError::CnameLoop(_)));
}

#[tokio::test]
async fn test_negative_caching() {
    let server = MockDns::start(
        MockZone::new().reply(
            "nope.invalid",
            RecordType::A,
            Reply::Rcode(ResponseCode::NameError),
        ),
    )
    .await;
    let resolver = v4_resolver(server.addr).await;

    let err = resolver.resolve("nope.invalid").await.unwrap_err();
    assert!(matches!(err, ResolveError::UnknownHost(_)));
    let count_after_first = server.query_count();
    assert!(count_after_first <= 8);

    // within the negative TTL the failure is served from cache
    let err = resolver.resolve("nope.invalid").await.unwrap_err();
    assert!(matches!(err, ResolveError::UnknownHost(_)));
    assert_eq!(server.query_count(), count_after_first);
}

#[tokio::test]
async fn test_query_id_demux_with_swapped_responses() {
    // a bespoke server that answers its first two queries in reverse order
    let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = sock.local_addr().unwrap();
    tokio::spawn(async move {
        let mut pending = Vec::new();
        let mut buf = [0u8; 2048];
        while pending.len() < 2 {
            let (len, from) = sock.recv_from(&mut buf).await.unwrap();
            pending.push((DnsMessage::decode(&buf[..len]).unwrap(), from));
        }
        for (query, from) in pending.into_iter().rev() {
            let name = query.first_question().unwrap().name.clone();
            let last_octet = if name.starts_with("one") { 1 } else { 2 };
            let mut response = DnsMessage {
                header: query.header,
                questions: query.questions.clone(),
                ..DnsMessage::default()
            };
            response.header.qr = true;
            response.header.ra = true;
            response.answers.push(a_record(&name, 60, [10, 0, 0, last_octet]));
            response.update_counts();
            sock.send_to(&response.encode().unwrap(), from).await.unwrap();
        }
    });

    let resolver = v4_resolver(addr).await;
    let (one, two) = tokio::join!(resolver.resolve("one.test"), resolver.resolve("two.test"));
    assert_eq!(one.unwrap(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
    assert_eq!(two.unwrap(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
}

#[tokio::test]
async fn test_budget_exhaustion_on_servfail() {
    let server = MockDns::start(
        MockZone::new().reply(
            "down.example.org",
            RecordType::A,
            Reply::Rcode(ResponseCode::ServerFailure),
        ),
    )
    .await;
    let resolver = Resolver::builder()
        .name_servers(vec![server.addr])
        .resolved_address_types(ResolvedAddressTypes::Ipv4Only)
        .max_queries_per_resolve(2)
        .build()
        .await
        .unwrap();

    let err = resolver.resolve("down.example.org").await.unwrap_err();
    match err {
        ResolveError::SearchBudgetExceeded { tries, cause } => {
            assert_eq!(tries, 2);
            assert!(cause.is_some());
        }
        other => panic!("expected SearchBudgetExceeded, got {:?}", other),
    }
    assert_eq!(server.query_count(), 2);
}

#[tokio::test]
async fn test_timeout_fails_over_to_next_server() {
    let dead = MockDns::start(
        MockZone::new().reply("example.org", RecordType::A, Reply::Ignore),
    )
    .await;
    let live = MockDns::start(
        MockZone::new().reply(
            "example.org",
            RecordType::A,
            Reply::Records(vec![a_record("example.org", 300, [93, 184, 216, 34])]),
        ),
    )
    .await;

    let resolver = Resolver::builder()
        .name_servers(vec![dead.addr, live.addr])
        .resolved_address_types(ResolvedAddressTypes::Ipv4Only)
        .query_timeout(Duration::from_millis(200))
        .build()
        .await
        .unwrap();

    let addr = resolver.resolve("example.org").await.unwrap();
    assert_eq!(addr, IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)));
    assert_eq!(dead.query_count(), 1);
    assert_eq!(live.query_count(), 1);
}

#[tokio::test]
async fn test_empty_hostname_resolves_to_loopback() {
    let server = MockDns::start(MockZone::new()).await;
    let resolver = v4_resolver(server.addr).await;

    let addr = resolver.resolve("").await.unwrap();
    assert_eq!(addr, IpAddr::V4(Ipv4Addr::LOCALHOST));
    assert_eq!(server.query_count(), 0);
}

#[tokio::test]
async fn test_ip_literal_short_circuits() {
    let server = MockDns::start(MockZone::new()).await;
    let resolver = v4_resolver(server.addr).await;

    let addr = resolver.resolve("93.184.216.34").await.unwrap();
    assert_eq!(addr, IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)));
    let v6 = resolver.resolve("::1").await.unwrap();
    assert_eq!(v6, "::1".parse::<IpAddr>().unwrap());
    assert_eq!(server.query_count(), 0);
}

#[tokio::test]
async fn test_ipv6_preferred_returns_a_when_only_a_exists() {
    let server = MockDns::start(
        MockZone::new()
            .reply(
                "only4.example.org",
                RecordType::AAAA,
                Reply::Rcode(ResponseCode::NoError),
            )
            .reply(
                "only4.example.org",
                RecordType::A,
                Reply::Records(vec![a_record("only4.example.org", 300, [192, 0, 2, 7])]),
            ),
    )
    .await;
    let resolver = Resolver::builder()
        .name_servers(vec![server.addr])
        .resolved_address_types(ResolvedAddressTypes::Ipv6Preferred)
        .build()
        .await
        .unwrap();

    let addrs = resolver.resolve_all("only4.example.org").await.unwrap();
    assert_eq!(addrs, vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7))]);
}

#[tokio::test]
async fn test_hosts_overlay_short_circuits() {
    let server = MockDns::start(
        MockZone::new().reply(
            "pinned.example.org",
            RecordType::A,
            Reply::Records(vec![a_record("pinned.example.org", 300, [203, 0, 113, 1])]),
        ),
    )
    .await;

    let mut hosts = InMemoryHostsResolver::new();
    hosts.insert("pinned.example.org", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 99)));

    let resolver = Resolver::builder()
        .name_servers(vec![server.addr])
        .resolved_address_types(ResolvedAddressTypes::Ipv4Only)
        .hosts_resolver(Arc::new(hosts))
        .build()
        .await
        .unwrap();

    let addr = resolver.resolve("pinned.example.org").await.unwrap();
    assert_eq!(addr, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 99)));
    assert_eq!(server.query_count(), 0);
}

#[tokio::test]
async fn test_hosts_overlay_skipped_for_record_queries() {
    let server = MockDns::start(
        MockZone::new().reply(
            "txt.example.org",
            RecordType::TXT,
            Reply::Records(vec![DnsRecord::new(
                "txt.example.org",
                60,
                RData::TXT(vec!["hello".to_string()]),
            )]),
        ),
    )
    .await;

    let mut hosts = InMemoryHostsResolver::new();
    hosts.insert("txt.example.org", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 99)));

    let resolver = Resolver::builder()
        .name_servers(vec![server.addr])
        .resolved_address_types(ResolvedAddressTypes::Ipv4Only)
        .hosts_resolver(Arc::new(hosts))
        .build()
        .await
        .unwrap();

    let question = DnsQuestion::new("txt.example.org", RecordType::TXT);
    let records = resolver.resolve_all_records(&question, &[]).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].rdata, RData::TXT(vec!["hello".to_string()]));
    assert_eq!(server.query_count(), 1);
}

#[tokio::test]
async fn test_second_record_resolve_within_ttl_issues_no_queries() {
    let server = MockDns::start(
        MockZone::new().reply(
            "txt.example.org",
            RecordType::TXT,
            Reply::Records(vec![DnsRecord::new(
                "txt.example.org",
                120,
                RData::TXT(vec!["cached".to_string()]),
            )]),
        ),
    )
    .await;
    let resolver = v4_resolver(server.addr).await;

    let question = DnsQuestion::new("txt.example.org", RecordType::TXT);
    let first = resolver.resolve_all_records(&question, &[]).await.unwrap();
    assert_eq!(server.query_count(), 1);

    let second = resolver.resolve_all_records(&question, &[]).await.unwrap();
    assert_eq!(first.len(), second.len());
    assert_eq!(second[0].rdata, RData::TXT(vec!["cached".to_string()]));
    assert_eq!(server.query_count(), 1);
}

#[tokio::test]
async fn test_concurrent_identical_resolves_are_not_deduplicated() {
    let server = MockDns::start(
        MockZone::new().reply(
            "slow.example.org",
            RecordType::A,
            Reply::Delayed(
                Duration::from_millis(150),
                vec![a_record("slow.example.org", 300, [192, 0, 2, 1])],
            ),
        ),
    )
    .await;
    let resolver = v4_resolver(server.addr).await;

    let (first, second) = tokio::join!(
        resolver.resolve_all("slow.example.org"),
        resolver.resolve_all("slow.example.org")
    );
    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(server.query_count(), 2);
}

#[tokio::test]
async fn test_raw_query_bypasses_cache() {
    let server = MockDns::start(
        MockZone::new().reply(
            "example.org",
            RecordType::A,
            Reply::Records(vec![a_record("example.org", 300, [93, 184, 216, 34])]),
        ),
    )
    .await;
    let resolver = v4_resolver(server.addr).await;

    let question = DnsQuestion::new("example.org", RecordType::A);
    let first = resolver.query(question.clone()).await.unwrap();
    let second = resolver.query(question).await.unwrap();

    assert_eq!(first.server, server.addr);
    assert_eq!(first.message.answers.len(), 1);
    assert_eq!(second.message.answers.len(), 1);
    assert_eq!(server.query_count(), 2);
}

#[tokio::test]
async fn test_close_fails_new_operations() {
    let server = MockDns::start(
        MockZone::new().reply(
            "example.org",
            RecordType::A,
            Reply::Records(vec![a_record("example.org", 300, [93, 184, 216, 34])]),
        ),
    )
    .await;
    let resolver = v4_resolver(server.addr).await;
    resolver.resolve("example.org").await.unwrap();

    resolver.close().await;
    assert!(resolver.is_closed());

    // even the cached name fails once the resolver is closed
    assert!(matches!(
        resolver.resolve("example.org").await,
        Err(ResolveError::ResolverClosed)
    ));
    assert!(matches!(
        resolver
            .query(DnsQuestion::new("example.org", RecordType::A))
            .await,
        Err(ResolveError::ResolverClosed)
    ));
}

#[derive(Default)]
struct RecordingObserver {
    events: std::sync::Mutex<Vec<String>>,
}

impl QueryLifecycleObserver for RecordingObserver {
    fn query_written(&self, server: SocketAddr, _id: u16) {
        self.events.lock().unwrap().push(format!("written:{}", server));
    }

    fn query_cnamed(&self, target: &str) {
        self.events.lock().unwrap().push(format!("cnamed:{}", target));
    }

    fn query_succeeded(&self) {
        self.events.lock().unwrap().push("succeeded".to_string());
    }

    fn query_failed(&self, cause: &ResolveError) {
        self.events.lock().unwrap().push(format!("failed:{}", cause));
    }
}

#[tokio::test]
async fn test_lifecycle_observer_sees_cname_and_success() {
    let server = MockDns::start(
        MockZone::new()
            .reply(
                "www.example.org",
                RecordType::A,
                Reply::Records(vec![DnsRecord::new(
                    "www.example.org",
                    600,
                    RData::CNAME("example.org".to_string()),
                )]),
            )
            .reply(
                "example.org",
                RecordType::A,
                Reply::Records(vec![a_record("example.org", 300, [93, 184, 216, 34])]),
            ),
    )
    .await;

    let observer = Arc::new(RecordingObserver::default());
    let resolver = Resolver::builder()
        .name_servers(vec![server.addr])
        .resolved_address_types(ResolvedAddressTypes::Ipv4Only)
        .lifecycle_observer(Arc::clone(&observer) as Arc<dyn QueryLifecycleObserver>)
        .build()
        .await
        .unwrap();

    resolver.resolve("www.example.org").await.unwrap();

    let events = observer.events.lock().unwrap();
    assert!(events.iter().any(|e| e.starts_with("written:")));
    assert!(events.iter().any(|e| e == "cnamed:example.org"));
    assert!(events.iter().any(|e| e == "succeeded"));
}

#[tokio::test]
async fn test_resolve_after_ttl_expiry_requeries() {
    let server = MockDns::start(
        MockZone::new().reply(
            "short.example.org",
            RecordType::A,
            Reply::Records(vec![a_record("short.example.org", 1, [192, 0, 2, 5])]),
        ),
    )
    .await;
    let resolver = v4_resolver(server.addr).await;

    resolver.resolve("short.example.org").await.unwrap();
    assert_eq!(server.query_count(), 1);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    resolver.resolve("short.example.org").await.unwrap();
    assert_eq!(server.query_count(), 2);
}
