use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, trace};

use crate::cache::{CacheKey, CacheLookup};
use crate::config::AddressFamily;
use crate::constants::{HOSTS_FILE_TTL, MAX_CNAME_REDIRECTS, MAX_REFERRAL_REDIRECTS};
use crate::dns::{
    DnsMessage, DnsQuestion, DnsRecord, RData, RecordClass, RecordType, ResponseCode, name,
};
use crate::error::{ResolveError, Result};
use crate::nameservers::{NameServerProvider, NameServerStream};
use crate::query::run_query;
use crate::resolver::Shared;

/// Query budget shared across everything one resolve does: both address
/// families, CNAME hops, referral chasing, and background cache warming.
#[derive(Debug)]
pub(crate) struct QueryBudget {
    remaining: AtomicU16,
    limit: u16,
}

impl QueryBudget {
    pub fn new(limit: u16) -> Arc<Self> {
        Arc::new(QueryBudget {
            remaining: AtomicU16::new(limit),
            limit,
        })
    }

    fn try_take(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1))
            .is_ok()
    }

    fn spent(&self) -> u16 {
        self.limit - self.remaining.load(Ordering::Acquire)
    }
}

fn record_type_for(family: AddressFamily) -> RecordType {
    match family {
        AddressFamily::Ipv4 => RecordType::A,
        AddressFamily::Ipv6 => RecordType::AAAA,
    }
}

fn loopback_for(family: AddressFamily) -> IpAddr {
    match family {
        AddressFamily::Ipv4 => IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
        AddressFamily::Ipv6 => IpAddr::V6(std::net::Ipv6Addr::LOCALHOST),
    }
}

fn family_of(addr: &IpAddr) -> AddressFamily {
    match addr {
        IpAddr::V4(_) => AddressFamily::Ipv4,
        IpAddr::V6(_) => AddressFamily::Ipv6,
    }
}

/// Expand a hostname against the configured search domains. Names with at
/// least `ndots` dots are tried absolute first; shorter names are tried
/// suffixed first with the absolute form last. A name written with a
/// trailing dot is always absolute only.
pub(crate) fn search_candidates(hostname: &str, search_domains: &[String], ndots: u32) -> Vec<String> {
    if hostname.ends_with('.') {
        return vec![name::normalize(hostname)];
    }
    let normalized = name::normalize(hostname);
    if search_domains.is_empty() {
        return vec![normalized];
    }

    let dots = normalized.matches('.').count() as u32;
    let suffixed = search_domains
        .iter()
        .map(|domain| format!("{}.{}", normalized, domain));

    if dots >= ndots {
        std::iter::once(normalized.clone()).chain(suffixed).collect()
    } else {
        suffixed.chain(std::iter::once(normalized.clone())).collect()
    }
}

/// Synthetic records from the hosts-file overlay, interleaved in family
/// preference order and carrying the fixed hosts TTL. A non-empty result
/// bypasses caches and the network entirely.
fn hosts_overlay(shared: &Shared, hostname: &str) -> Vec<DnsRecord> {
    let mut records = Vec::new();
    for &family in shared.config.resolved_address_types.families() {
        for addr in shared.hosts.lookup(hostname, family) {
            let rdata = match addr {
                IpAddr::V4(v4) => RData::A(v4),
                IpAddr::V6(v6) => RData::AAAA(v6),
            };
            records.push(DnsRecord::new(hostname, HOSTS_FILE_TTL, rdata));
        }
    }
    records
}

/// Resolve a hostname into addresses: hosts overlay, then caches, then the
/// query loop, with search-domain expansion driving retries on NXDOMAIN.
pub(crate) async fn resolve_addresses(
    shared: &Arc<Shared>,
    hostname: &str,
    additionals: &[DnsRecord],
) -> Result<Vec<IpAddr>> {
    if shared.closed.load(Ordering::Acquire) {
        return Err(ResolveError::ResolverClosed);
    }

    let normalized = name::normalize(hostname);
    if normalized.is_empty() {
        // the empty name resolves to the loopback of the preferred family
        return Ok(vec![loopback_for(
            shared.config.resolved_address_types.preferred(),
        )]);
    }
    if let Ok(ip) = normalized.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }

    let overlay = hosts_overlay(shared, &normalized);
    if !overlay.is_empty() {
        trace!("Hosts overlay answered {} without queries", normalized);
        return Ok(overlay
            .iter()
            .filter_map(|r| r.rdata.as_address())
            .collect());
    }

    let budget = QueryBudget::new(shared.config.max_queries_per_resolve);
    let candidates = search_candidates(
        hostname,
        &shared.config.search_domains,
        shared.config.ndots,
    );

    let mut last_error = None;
    for candidate in &candidates {
        match resolve_candidate(shared, candidate, additionals, &budget).await {
            Ok(addrs) => return Ok(addrs),
            Err(e @ ResolveError::UnknownHost(_)) => {
                debug!("{} not found, advancing search expansion", candidate);
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_error.unwrap_or(ResolveError::UnknownHost(normalized)))
}

/// One fully-expanded candidate name, resolved under the dual-stack policy.
async fn resolve_candidate(
    shared: &Arc<Shared>,
    hostname: &str,
    additionals: &[DnsRecord],
    budget: &Arc<QueryBudget>,
) -> Result<Vec<IpAddr>> {
    let families = shared.config.resolved_address_types.families();
    let result = if families.len() == 1 {
        resolve_family(shared, hostname, families[0], additionals, budget).await
    } else {
        resolve_dual_stack(shared, hostname, additionals, budget).await
    };

    // negative caching applies only to a definitive unknown host, keyed by
    // the queried name so both families share the verdict
    if let Err(cause @ ResolveError::UnknownHost(_)) = &result {
        let key = CacheKey::with_additionals(hostname, additionals);
        shared.answers.put_failure(key, cause.clone());
    }
    result
}

async fn resolve_dual_stack(
    shared: &Arc<Shared>,
    hostname: &str,
    additionals: &[DnsRecord],
    budget: &Arc<QueryBudget>,
) -> Result<Vec<IpAddr>> {
    let families = shared.config.resolved_address_types.families();
    let (preferred, secondary) = (families[0], families[1]);

    if shared.config.complete_once_preferred_resolved {
        // the secondary query runs regardless; a preferred-family answer
        // settles the caller while the secondary keeps warming the cache
        let warm = {
            let shared = Arc::clone(shared);
            let hostname = hostname.to_string();
            let additionals = additionals.to_vec();
            let budget = Arc::clone(budget);
            tokio::spawn(async move {
                resolve_family(&shared, &hostname, secondary, &additionals, &budget).await
            })
        };
        match resolve_family(shared, hostname, preferred, additionals, budget).await {
            Ok(addrs) if !addrs.is_empty() => Ok(addrs),
            preferred_result => {
                let secondary_result = warm.await.unwrap_or_else(|e| {
                    Err(ResolveError::Transport(format!(
                        "secondary family lookup task failed: {}",
                        e
                    )))
                });
                merge_family_results(preferred_result, secondary_result)
            }
        }
    } else {
        let (first, second) = futures::future::join(
            resolve_family(shared, hostname, preferred, additionals, budget),
            resolve_family(shared, hostname, secondary, additionals, budget),
        )
        .await;
        merge_family_results(first, second)
    }
}

/// Interleave dual-stack results in preference order; a single family
/// answering is enough.
fn merge_family_results(
    first: Result<Vec<IpAddr>>,
    second: Result<Vec<IpAddr>>,
) -> Result<Vec<IpAddr>> {
    match (first, second) {
        (Ok(mut preferred_addrs), Ok(secondary_addrs)) => {
            preferred_addrs.extend(secondary_addrs);
            Ok(preferred_addrs)
        }
        (Ok(addrs), Err(_)) | (Err(_), Ok(addrs)) => Ok(addrs),
        (Err(e), Err(_)) => Err(e),
    }
}

/// Resolve one (name, family) pair: cached alias edges, answer cache, then
/// the network loop, chasing CNAMEs up to the redirect limit.
pub(crate) async fn resolve_family(
    shared: &Arc<Shared>,
    hostname: &str,
    family: AddressFamily,
    additionals: &[DnsRecord],
    budget: &Arc<QueryBudget>,
) -> Result<Vec<IpAddr>> {
    let qtype = record_type_for(family);
    let mut current = name::normalize(hostname);
    let mut redirects = 0u8;

    loop {
        // walk cached alias edges hop by hop; warm after the first traversal
        while let Some(target) = shared.cnames.get(&current) {
            if target == current {
                break;
            }
            trace!("Cached CNAME {} -> {}", current, target);
            current = target;
            redirects += 1;
            if redirects > MAX_CNAME_REDIRECTS {
                return Err(ResolveError::CnameLoop(hostname.to_string()));
            }
        }

        let key = CacheKey::with_additionals(&current, additionals);
        match shared.answers.get(&key) {
            Some(CacheLookup::Positive(records)) => {
                let addrs: Vec<IpAddr> = records
                    .iter()
                    .filter(|r| r.rtype == qtype)
                    .filter_map(|r| r.rdata.as_address())
                    .collect();
                if !addrs.is_empty() {
                    return Ok(addrs);
                }
                // entries exist only for the other family; ask the network
            }
            Some(CacheLookup::Negative(cause)) => return Err(cause),
            None => {}
        }

        match query_loop(
            shared,
            &current,
            qtype,
            RecordClass::IN,
            additionals,
            budget,
            true,
        )
        .await?
        {
            LoopOutcome::Records(records) => {
                return Ok(records
                    .iter()
                    .filter_map(|r| r.rdata.as_address())
                    .filter(|addr| family_of(addr) == family)
                    .collect());
            }
            LoopOutcome::Cname(target) => {
                redirects += 1;
                if redirects > MAX_CNAME_REDIRECTS {
                    return Err(ResolveError::CnameLoop(hostname.to_string()));
                }
                current = target;
            }
            LoopOutcome::NoAnswer(_) => {
                return Err(ResolveError::UnknownHost(current));
            }
        }
    }
}

/// Raw record resolution for an arbitrary question. Aliases are not chased
/// here; a response that only carries a CNAME is treated as no answer.
pub(crate) async fn resolve_records(
    shared: &Arc<Shared>,
    question: &DnsQuestion,
    additionals: &[DnsRecord],
) -> Result<Vec<DnsRecord>> {
    if shared.closed.load(Ordering::Acquire) {
        return Err(ResolveError::ResolverClosed);
    }

    let budget = QueryBudget::new(shared.config.max_queries_per_resolve);
    let qname = name::normalize(&question.name);

    // the answer cache covers record questions too; it only speaks class
    // IN, and ANY questions always go to the network
    let use_cache = question.qclass == RecordClass::IN && question.qtype != RecordType::ANY;
    if use_cache {
        let key = CacheKey::with_additionals(&qname, additionals);
        match shared.answers.get(&key) {
            Some(CacheLookup::Positive(records)) => {
                let mut matching: Vec<DnsRecord> = records
                    .into_iter()
                    .filter(|r| r.rtype == question.qtype)
                    .collect();
                if !matching.is_empty() {
                    decode_record_names(shared, &mut matching);
                    return Ok(matching);
                }
                // entries exist only for other types; ask the network
            }
            Some(CacheLookup::Negative(cause)) => return Err(cause),
            None => {}
        }
    }

    match query_loop(
        shared,
        &qname,
        question.qtype,
        question.qclass,
        additionals,
        &budget,
        use_cache,
    )
    .await?
    {
        LoopOutcome::Records(mut records) => {
            decode_record_names(shared, &mut records);
            Ok(records)
        }
        LoopOutcome::Cname(_) | LoopOutcome::NoAnswer(_) => {
            Err(ResolveError::UnknownHost(qname))
        }
    }
}

fn decode_record_names(shared: &Shared, records: &mut [DnsRecord]) {
    if shared.config.decode_idn {
        for record in records {
            record.name = name::decode_idn(&record.name);
        }
    }
}

enum LoopOutcome {
    /// Records matching the question, already cached when caching applies.
    Records(Vec<DnsRecord>),
    /// The answer was an alias with no terminal records attached.
    Cname(String),
    /// A clean no-data or NXDOMAIN answer.
    NoAnswer(ResponseCode),
}

/// The generic server loop: walk the name-server stream under the query
/// budget, follow referrals, and classify the first usable response.
async fn query_loop(
    shared: &Arc<Shared>,
    qname: &str,
    qtype: RecordType,
    qclass: RecordClass,
    additionals: &[DnsRecord],
    budget: &Arc<QueryBudget>,
    cache_answers: bool,
) -> Result<LoopOutcome> {
    let preferred = shared.config.resolved_address_types.preferred();
    let mut stream = match shared.authority.lookup_closest(qname) {
        Some((zone, servers)) => {
            trace!("Using cached authority for zone {} ({} servers)", zone, servers.len());
            NameServerStream::new(servers)
        }
        None => shared.provider.name_servers(qname),
    }
    .prefer_family(preferred);

    let mut redirect_depth = 0u8;
    let mut causes: Vec<ResolveError> = Vec::new();

    loop {
        if !budget.try_take() {
            return Err(ResolveError::SearchBudgetExceeded {
                tries: budget.limit,
                cause: causes.pop().map(Box::new),
            });
        }
        let server = stream.next();
        let question = DnsQuestion {
            name: qname.to_string(),
            qtype,
            qclass,
        };

        let response = match run_query(shared, server, question, additionals).await {
            Ok(response) => response,
            Err(e @ ResolveError::NoMoreIds(_)) => {
                shared.observer.query_failed(&e);
                causes.push(e);
                // brief jittered pause before the next server
                let delay = rand::rng().random_range(1..=20);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                continue;
            }
            Err(e @ ResolveError::ResolverClosed) => {
                shared.observer.query_cancelled(budget.spent());
                return Err(e);
            }
            Err(e) => {
                debug!("Query to {} failed: {}", server, e);
                shared.observer.query_failed(&e);
                causes.push(e);
                continue;
            }
        };

        match response.response_code() {
            ResponseCode::NoError => {}
            ResponseCode::NameError => {
                shared.observer.query_no_answer(ResponseCode::NameError);
                return Ok(LoopOutcome::NoAnswer(ResponseCode::NameError));
            }
            code => {
                trace!("{} answered {} for {}", server, code, qname);
                shared.observer.query_no_answer(code);
                causes.push(ResolveError::Transport(format!(
                    "{} answered {}",
                    server, code
                )));
                continue;
            }
        }

        match classify_answer(qname, qtype, &response) {
            // a full answer settles the loop outright
            Some(AnswerClassification::Records {
                owner,
                records,
                edges,
            }) => {
                if cache_answers {
                    cache_cname_edges(shared, &edges);
                    let key = CacheKey::with_additionals(&owner, additionals);
                    for record in &records {
                        shared.answers.put_record(key.clone(), record.clone());
                    }
                }
                shared.observer.query_succeeded();
                return Ok(LoopOutcome::Records(records));
            }
            // a bare alias is only a partial answer; a referral in the
            // authority section takes precedence over it
            partial => {
                if response
                    .authorities
                    .iter()
                    .any(|r| r.rtype == RecordType::NS)
                {
                    redirect_depth += 1;
                    if redirect_depth > MAX_REFERRAL_REDIRECTS {
                        return Err(ResolveError::RedirectLoop(qname.to_string()));
                    }
                    if let Some(child) = follow_referral(shared, qname, &response, budget).await? {
                        shared.observer.query_redirected(child.servers());
                        stream = child.prefer_family(preferred);
                        continue;
                    }
                }

                if let Some(AnswerClassification::Cname { target, edges }) = partial {
                    if cache_answers {
                        cache_cname_edges(shared, &edges);
                    }
                    shared.observer.query_cnamed(&target);
                    return Ok(LoopOutcome::Cname(target));
                }

                shared.observer.query_no_answer(ResponseCode::NoError);
                return Ok(LoopOutcome::NoAnswer(ResponseCode::NoError));
            }
        }
    }
}

struct CnameEdge {
    alias: String,
    target: String,
    ttl: u32,
}

enum AnswerClassification {
    /// Records answering the question, owned by `owner` (the final chain
    /// target when an alias chain led there).
    Records {
        owner: String,
        records: Vec<DnsRecord>,
        edges: Vec<CnameEdge>,
    },
    /// An alias chain with no terminal records attached.
    Cname {
        target: String,
        edges: Vec<CnameEdge>,
    },
}

fn cache_cname_edges(shared: &Shared, edges: &[CnameEdge]) {
    for edge in edges {
        shared.cnames.put(&edge.alias, &edge.target, edge.ttl);
    }
}

/// Pick the usable content out of a NOERROR response: records matching the
/// question directly, or a CNAME chain ending either in matching records
/// or a bare target. Classification only; the loop commits cache writes
/// once it accepts the outcome.
fn classify_answer(
    qname: &str,
    qtype: RecordType,
    response: &DnsMessage,
) -> Option<AnswerClassification> {
    let matches_qtype =
        |r: &DnsRecord| r.rtype == qtype || (qtype == RecordType::ANY && r.rtype != RecordType::OPT);

    let direct: Vec<DnsRecord> = response
        .answers
        .iter()
        .filter(|r| r.name == qname && matches_qtype(r))
        .cloned()
        .collect();
    if !direct.is_empty() {
        return Some(AnswerClassification::Records {
            owner: qname.to_string(),
            records: direct,
            edges: Vec::new(),
        });
    }

    // follow the alias chain inside this answer section
    let edge_map: HashMap<&str, (&str, u32)> = response
        .answers
        .iter()
        .filter_map(|r| match (r.rtype, &r.rdata) {
            (RecordType::CNAME, RData::CNAME(target)) => {
                Some((r.name.as_str(), (target.as_str(), r.ttl)))
            }
            _ => None,
        })
        .collect();
    if edge_map.is_empty() {
        return None;
    }

    let mut target = qname;
    let mut hops = 0u8;
    let mut edges = Vec::new();
    while let Some(&(next, ttl)) = edge_map.get(target) {
        edges.push(CnameEdge {
            alias: target.to_string(),
            target: next.to_string(),
            ttl,
        });
        target = next;
        hops += 1;
        if hops > MAX_CNAME_REDIRECTS {
            break;
        }
    }
    if target == qname {
        return None;
    }

    let terminal: Vec<DnsRecord> = response
        .answers
        .iter()
        .filter(|r| r.name == target && matches_qtype(r))
        .cloned()
        .collect();
    if !terminal.is_empty() {
        return Some(AnswerClassification::Records {
            owner: target.to_string(),
            records: terminal,
            edges,
        });
    }
    Some(AnswerClassification::Cname {
        target: target.to_string(),
        edges,
    })
}

fn name_in_zone(name: &str, zone: &str) -> bool {
    zone.is_empty() || name == zone || name.ends_with(&format!(".{}", zone))
}

/// Build the child server stream for a referral. Glue records from the
/// additional section are used when they are in bailiwick; otherwise each
/// NS target is resolved recursively within the same budget, first answer
/// winning.
async fn follow_referral(
    shared: &Arc<Shared>,
    qname: &str,
    response: &DnsMessage,
    budget: &Arc<QueryBudget>,
) -> Result<Option<NameServerStream>> {
    let ns_records: Vec<&DnsRecord> = response
        .authorities
        .iter()
        .filter(|r| r.rtype == RecordType::NS)
        .collect();
    let Some(first) = ns_records.first() else {
        return Ok(None);
    };

    let zone = first.name.clone();
    if !name_in_zone(qname, &zone) {
        debug!("Ignoring out-of-zone referral {} for {}", zone, qname);
        return Ok(None);
    }

    let targets: Vec<&str> = ns_records
        .iter()
        .filter_map(|r| r.rdata.referenced_name())
        .collect();
    let ns_ttl = ns_records.iter().map(|r| r.ttl).min().unwrap_or(0);

    let port = shared.config.name_server_port;

    // in-bailiwick glue lets us proceed without a single extra lookup
    let mut servers: Vec<SocketAddr> = response
        .additionals
        .iter()
        .filter(|r| targets.contains(&r.name.as_str()) && name_in_zone(&r.name, &zone))
        .filter_map(|r| r.rdata.as_address())
        .map(|ip| SocketAddr::new(ip, port))
        .collect();

    if servers.is_empty() {
        for target in &targets {
            let family = shared.config.resolved_address_types.preferred();
            let resolved =
                Box::pin(resolve_family(shared, target, family, &[], budget)).await;
            match resolved {
                Ok(addrs) if !addrs.is_empty() => {
                    servers.extend(addrs.into_iter().map(|ip| SocketAddr::new(ip, port)));
                    break;
                }
                _ => continue,
            }
        }
    }

    if servers.is_empty() {
        return Ok(None);
    }

    debug!(
        "Referral for {}: zone {} served by {} addresses",
        qname,
        zone,
        servers.len()
    );
    shared.authority.put(&zone, servers.clone(), ns_ttl);
    Ok(Some(NameServerStream::new(servers)))
}
