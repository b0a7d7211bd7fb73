use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::config::ResolverConfig;
use crate::dns::{DnsRecord, name};
use crate::error::ResolveError;

/// TTL clamp applied on every insert, shared by all three caches.
#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    pub min_ttl: u32,
    pub max_ttl: u32,
    pub negative_ttl: u32,
    pub max_answers_per_name: usize,
}

impl TtlPolicy {
    pub fn from_config(config: &ResolverConfig) -> Self {
        TtlPolicy {
            min_ttl: config.min_ttl,
            max_ttl: config.max_ttl,
            negative_ttl: config.negative_ttl,
            max_answers_per_name: config.max_answers_per_name,
        }
    }

    fn clamp(&self, ttl: u32) -> u32 {
        ttl.clamp(self.min_ttl, self.max_ttl)
    }
}

/// Answer-cache key: a normalized name plus a fingerprint of any
/// user-supplied additional records, so resolves carrying different
/// additionals never share entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub name: String,
    fingerprint: u64,
}

impl CacheKey {
    pub fn new(hostname: &str) -> Self {
        CacheKey {
            name: name::normalize(hostname),
            fingerprint: 0,
        }
    }

    pub fn with_additionals(hostname: &str, additionals: &[DnsRecord]) -> Self {
        if additionals.is_empty() {
            return Self::new(hostname);
        }
        let mut hasher = DefaultHasher::new();
        for record in additionals {
            let mut wire = Vec::new();
            if record.encode(&mut wire).is_ok() {
                wire.hash(&mut hasher);
            }
        }
        CacheKey {
            name: name::normalize(hostname),
            fingerprint: hasher.finish(),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedRecord {
    record: DnsRecord,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
enum AnswerValue {
    Positive(Vec<CachedRecord>),
    Negative {
        cause: ResolveError,
        expires_at: Instant,
    },
}

/// The result of an answer-cache lookup.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Positive(Vec<DnsRecord>),
    Negative(ResolveError),
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 { 0.0 } else { hits as f64 / total as f64 }
    }
}

/// Resolved records per name. A name holds either any number of positive
/// entries or exactly one negative entry, never both.
#[derive(Debug)]
pub struct AnswerCache {
    entries: DashMap<CacheKey, AnswerValue>,
    policy: TtlPolicy,
    stats: CacheStats,
}

impl AnswerCache {
    pub fn new(policy: TtlPolicy) -> Self {
        AnswerCache {
            entries: DashMap::new(),
            policy,
            stats: CacheStats::default(),
        }
    }

    /// Live entries for a key; expired records are pruned on the way out.
    /// Returned records carry their remaining TTL.
    pub fn get(&self, key: &CacheKey) -> Option<CacheLookup> {
        let now = Instant::now();
        let mut remove = false;
        let result = match self.entries.get_mut(key) {
            None => None,
            Some(mut entry) => match entry.value_mut() {
                AnswerValue::Positive(records) => {
                    records.retain(|r| r.expires_at > now);
                    if records.is_empty() {
                        remove = true;
                        None
                    } else {
                        Some(CacheLookup::Positive(
                            records
                                .iter()
                                .map(|r| {
                                    let mut record = r.record.clone();
                                    record.ttl = r.expires_at.duration_since(now).as_secs() as u32;
                                    record
                                })
                                .collect(),
                        ))
                    }
                }
                AnswerValue::Negative { cause, expires_at } => {
                    if *expires_at > now {
                        Some(CacheLookup::Negative(cause.clone()))
                    } else {
                        remove = true;
                        None
                    }
                }
            },
        };
        if remove {
            self.entries.remove(key);
        }
        match &result {
            Some(_) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                trace!("Answer cache hit for {}", key.name);
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                trace!("Answer cache miss for {}", key.name);
            }
        }
        result
    }

    /// Insert one resolved record. A zero TTL is not cached; a prior
    /// negative entry is displaced.
    pub fn put_record(&self, key: CacheKey, record: DnsRecord) {
        if record.ttl == 0 {
            debug!("Not caching zero-TTL record for {}", key.name);
            return;
        }
        let ttl = self.policy.clamp(record.ttl);
        let cached = CachedRecord {
            record,
            expires_at: Instant::now() + Duration::from_secs(ttl as u64),
        };

        let mut entry = self
            .entries
            .entry(key)
            .or_insert_with(|| AnswerValue::Positive(Vec::new()));
        match entry.value_mut() {
            AnswerValue::Positive(records) => {
                records.push(cached);
                if records.len() > self.policy.max_answers_per_name {
                    records.remove(0);
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
            value @ AnswerValue::Negative { .. } => {
                *value = AnswerValue::Positive(vec![cached]);
            }
        }
    }

    /// Cache a terminal failure for `negative_ttl` seconds, displacing any
    /// positive entries for the key.
    pub fn put_failure(&self, key: CacheKey, cause: ResolveError) {
        if self.policy.negative_ttl == 0 {
            return;
        }
        debug!(
            "Caching negative answer for {} ({}s): {}",
            key.name, self.policy.negative_ttl, cause
        );
        self.entries.insert(
            key,
            AnswerValue::Negative {
                cause,
                expires_at: Instant::now()
                    + Duration::from_secs(self.policy.negative_ttl as u64),
            },
        );
    }

    pub fn clear(&self) {
        let count = self.entries.len();
        self.entries.clear();
        if count > 0 {
            debug!("Cleared {} answer cache entries", count);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[derive(Debug, Clone)]
struct CnameEntry {
    target: String,
    expires_at: Instant,
}

/// One alias → target edge per name. Chains are re-walked hop by hop on
/// each resolve, warm after the first traversal.
#[derive(Debug)]
pub struct CnameCache {
    entries: DashMap<String, CnameEntry>,
    policy: TtlPolicy,
}

impl CnameCache {
    pub fn new(policy: TtlPolicy) -> Self {
        CnameCache {
            entries: DashMap::new(),
            policy,
        }
    }

    pub fn get(&self, alias: &str) -> Option<String> {
        let alias = name::normalize(alias);
        let entry = self.entries.get(&alias)?;
        if entry.expires_at > Instant::now() {
            return Some(entry.target.clone());
        }
        drop(entry);
        self.entries.remove(&alias);
        None
    }

    pub fn put(&self, alias: &str, target: &str, ttl: u32) {
        if ttl == 0 {
            return;
        }
        let ttl = self.policy.clamp(ttl);
        self.entries.insert(
            name::normalize(alias),
            CnameEntry {
                target: name::normalize(target),
                expires_at: Instant::now() + Duration::from_secs(ttl as u64),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone)]
struct AuthorityEntry {
    servers: Vec<SocketAddr>,
    expires_at: Instant,
}

/// Name servers learned from referrals, keyed by the zone they were
/// delegated for.
#[derive(Debug)]
pub struct AuthorityCache {
    entries: DashMap<String, AuthorityEntry>,
    policy: TtlPolicy,
}

impl AuthorityCache {
    pub fn new(policy: TtlPolicy) -> Self {
        AuthorityCache {
            entries: DashMap::new(),
            policy,
        }
    }

    pub fn put(&self, zone: &str, servers: Vec<SocketAddr>, ttl: u32) {
        if ttl == 0 || servers.is_empty() {
            return;
        }
        let ttl = self.policy.clamp(ttl);
        self.entries.insert(
            name::normalize(zone),
            AuthorityEntry {
                servers,
                expires_at: Instant::now() + Duration::from_secs(ttl as u64),
            },
        );
    }

    /// Servers for the closest enclosing zone of `hostname`, walking from
    /// the name itself up to the root.
    pub fn lookup_closest(&self, hostname: &str) -> Option<(String, Vec<SocketAddr>)> {
        let normalized = name::normalize(hostname);
        let mut zone = normalized.as_str();
        loop {
            if let Some(entry) = self.entries.get(zone) {
                if entry.expires_at > Instant::now() {
                    return Some((zone.to_string(), entry.servers.clone()));
                }
                drop(entry);
                self.entries.remove(zone);
            }
            match zone.split_once('.') {
                Some((_, parent)) => zone = parent,
                None => return None,
            }
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
