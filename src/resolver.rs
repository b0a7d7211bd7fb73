use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{AnswerCache, AuthorityCache, CnameCache, TtlPolicy};
use crate::config::ResolverConfig;
use crate::dns::{DnsMessage, DnsQuestion, DnsRecord};
use crate::error::{ResolveError, Result};
use crate::hosts::{HostsFileResolver, InMemoryHostsResolver};
use crate::inflight::InFlightTable;
use crate::nameservers::{NameServerProvider, NameServerStream, SequentialNameServerProvider};
use crate::observer::{NoopObserver, QueryLifecycleObserver};
use crate::query::run_query;
use crate::resolve;

/// State shared between the public facade, the resolve machinery, and the
/// background demux loop. The UDP socket is owned here and written only
/// through this struct.
pub(crate) struct Shared {
    pub config: ResolverConfig,
    pub socket: UdpSocket,
    pub inflight: InFlightTable,
    pub answers: AnswerCache,
    pub cnames: CnameCache,
    pub authority: AuthorityCache,
    pub hosts: Arc<dyn HostsFileResolver>,
    pub provider: Arc<dyn NameServerProvider>,
    pub observer: Arc<dyn QueryLifecycleObserver>,
    pub closed: AtomicBool,
}

/// A raw response together with the server that sent it.
#[derive(Debug, Clone)]
pub struct DnsEnvelope {
    pub server: SocketAddr,
    pub message: DnsMessage,
}

/// Builder for [`Resolver`]. Unset options fall back to
/// [`ResolverConfig::default`].
pub struct ResolverBuilder {
    config: ResolverConfig,
    hosts: Option<Arc<dyn HostsFileResolver>>,
    provider: Option<Arc<dyn NameServerProvider>>,
    observer: Option<Arc<dyn QueryLifecycleObserver>>,
}

impl ResolverBuilder {
    pub fn new() -> Self {
        ResolverBuilder {
            config: ResolverConfig::default(),
            hosts: None,
            provider: None,
            observer: None,
        }
    }

    pub fn config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name_servers(mut self, servers: Vec<SocketAddr>) -> Self {
        self.config.name_servers = servers;
        self
    }

    pub fn query_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.query_timeout = timeout;
        self
    }

    pub fn max_queries_per_resolve(mut self, budget: u16) -> Self {
        self.config.max_queries_per_resolve = budget;
        self
    }

    pub fn resolved_address_types(mut self, types: crate::config::ResolvedAddressTypes) -> Self {
        self.config.resolved_address_types = types;
        self
    }

    pub fn recursion_desired(mut self, enabled: bool) -> Self {
        self.config.recursion_desired = enabled;
        self
    }

    pub fn opt_record(mut self, enabled: bool) -> Self {
        self.config.opt_record_enabled = enabled;
        self
    }

    pub fn max_payload_size(mut self, size: u16) -> Self {
        self.config.max_payload_size = size;
        self
    }

    pub fn search_domains(mut self, domains: Vec<String>, ndots: u32) -> Self {
        self.config.search_domains = domains;
        self.config.ndots = ndots;
        self
    }

    pub fn decode_idn(mut self, enabled: bool) -> Self {
        self.config.decode_idn = enabled;
        self
    }

    pub fn complete_once_preferred_resolved(mut self, enabled: bool) -> Self {
        self.config.complete_once_preferred_resolved = enabled;
        self
    }

    pub fn tcp_fallback(mut self, enabled: bool) -> Self {
        self.config.tcp_fallback_enabled = enabled;
        self
    }

    pub fn name_server_port(mut self, port: u16) -> Self {
        self.config.name_server_port = port;
        self
    }

    pub fn negative_ttl(mut self, ttl: u32) -> Self {
        self.config.negative_ttl = ttl;
        self
    }

    pub fn ttl_bounds(mut self, min_ttl: u32, max_ttl: u32) -> Self {
        self.config.min_ttl = min_ttl;
        self.config.max_ttl = max_ttl;
        self
    }

    pub fn hosts_resolver(mut self, hosts: Arc<dyn HostsFileResolver>) -> Self {
        self.hosts = Some(hosts);
        self
    }

    pub fn name_server_provider(mut self, provider: Arc<dyn NameServerProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn lifecycle_observer(mut self, observer: Arc<dyn QueryLifecycleObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub async fn build(self) -> Result<Resolver> {
        self.config.validate()?;

        let hosts = self
            .hosts
            .unwrap_or_else(|| Arc::new(InMemoryHostsResolver::system_default()));
        let provider = self.provider.unwrap_or_else(|| {
            Arc::new(SequentialNameServerProvider::new(
                self.config.name_servers.clone(),
            ))
        });
        let observer = self.observer.unwrap_or_else(|| Arc::new(NoopObserver));

        // an IPv6 wildcard bind is only needed when an upstream is IPv6
        let bind_addr: SocketAddr = if self.config.name_servers.iter().any(|s| s.is_ipv6()) {
            "[::]:0".parse().expect("wildcard bind address is valid")
        } else {
            "0.0.0.0:0".parse().expect("wildcard bind address is valid")
        };
        let socket = UdpSocket::bind(bind_addr).await?;

        let policy = TtlPolicy::from_config(&self.config);
        let query_stream = provider.name_servers("");

        info!(
            "Resolver initialized with {} name servers, budget {}",
            self.config.name_servers.len(),
            self.config.max_queries_per_resolve
        );

        let shared = Arc::new(Shared {
            config: self.config,
            socket,
            inflight: InFlightTable::new(),
            answers: AnswerCache::new(policy),
            cnames: CnameCache::new(policy),
            authority: AuthorityCache::new(policy),
            hosts,
            provider,
            observer,
            closed: AtomicBool::new(false),
        });

        let demux = tokio::spawn(demux_loop(Arc::clone(&shared)));

        Ok(Resolver {
            shared,
            demux: Mutex::new(Some(demux)),
            query_stream: Mutex::new(query_stream),
        })
    }
}

impl Default for ResolverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The recursive-capable stub resolver. Translates hostnames into
/// addresses by walking the configured name servers, following CNAME
/// chains and referrals, honoring the hosts-file overlay, and caching both
/// positive and negative answers.
pub struct Resolver {
    shared: Arc<Shared>,
    demux: Mutex<Option<JoinHandle<()>>>,
    query_stream: Mutex<NameServerStream>,
}

impl Resolver {
    pub fn builder() -> ResolverBuilder {
        ResolverBuilder::new()
    }

    pub async fn new(config: ResolverConfig) -> Result<Self> {
        Self::builder().config(config).build().await
    }

    /// The first address of the preferred family for `hostname`.
    pub async fn resolve(&self, hostname: &str) -> Result<IpAddr> {
        self.resolve_with_additionals(hostname, &[]).await
    }

    pub async fn resolve_with_additionals(
        &self,
        hostname: &str,
        additionals: &[DnsRecord],
    ) -> Result<IpAddr> {
        let addrs = self.resolve_all_with_additionals(hostname, additionals).await?;
        addrs
            .into_iter()
            .next()
            .ok_or_else(|| ResolveError::UnknownHost(hostname.to_string()))
    }

    /// Every address of every enabled family, ordered by family preference
    /// and then by answer order.
    pub async fn resolve_all(&self, hostname: &str) -> Result<Vec<IpAddr>> {
        self.resolve_all_with_additionals(hostname, &[]).await
    }

    pub async fn resolve_all_with_additionals(
        &self,
        hostname: &str,
        additionals: &[DnsRecord],
    ) -> Result<Vec<IpAddr>> {
        resolve::resolve_addresses(&self.shared, hostname, additionals).await
    }

    /// Every record answering `question`. The hosts overlay is not
    /// consulted for record questions, address types included.
    pub async fn resolve_all_records(
        &self,
        question: &DnsQuestion,
        additionals: &[DnsRecord],
    ) -> Result<Vec<DnsRecord>> {
        resolve::resolve_records(&self.shared, question, additionals).await
    }

    /// One-shot raw query against the next server in the per-resolver
    /// rotation, bypassing caches, search expansion, and CNAME chasing.
    pub async fn query(&self, question: DnsQuestion) -> Result<DnsEnvelope> {
        self.query_with(question, &[], None).await
    }

    pub async fn query_with(
        &self,
        question: DnsQuestion,
        additionals: &[DnsRecord],
        server: Option<SocketAddr>,
    ) -> Result<DnsEnvelope> {
        if self.is_closed() {
            return Err(ResolveError::ResolverClosed);
        }
        let server = server.unwrap_or_else(|| self.query_stream.lock().next());
        let message = run_query(&self.shared, server, question, additionals).await?;
        Ok(DnsEnvelope { server, message })
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Shut down: stop the receive loop and drop every cache entry. Queries
    /// already in flight run into their timeouts; new submissions fail with
    /// [`ResolveError::ResolverClosed`] immediately.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let handle = self.demux.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        self.shared.answers.clear();
        self.shared.cnames.clear();
        self.shared.authority.clear();
        debug!("Resolver closed");
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        if let Some(handle) = self.demux.lock().take() {
            handle.abort();
        }
    }
}

/// Background receive loop: the only reader of the shared UDP socket.
/// Decodes each datagram, verifies it against the pending slot, and
/// settles that slot exactly once. Unknown or mismatched responses are
/// dropped without surfacing to any caller.
async fn demux_loop(shared: Arc<Shared>) {
    let mut buf = vec![0u8; shared.config.max_payload_size.max(512) as usize];
    loop {
        let (len, from) = match shared.socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                if shared.closed.load(Ordering::Acquire) {
                    break;
                }
                warn!("UDP receive error: {}", e);
                continue;
            }
        };

        let message = match DnsMessage::decode(&buf[..len]) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping malformed packet from {}: {}", from, e);
                continue;
            }
        };

        let id = message.header.id;
        if !shared.inflight.matches(from, id, &message) {
            debug!("Dropping unmatched response id {} from {}", id, from);
            continue;
        }
        if let Some(pending) = shared.inflight.claim(from, id) {
            // the receiver may already be gone; late responses are discarded
            let _ = pending.tx.send(message);
        }
    }
}
