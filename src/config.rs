use std::net::SocketAddr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_MAX_QUERIES_PER_RESOLVE, DEFAULT_NDOTS, DEFAULT_NEGATIVE_TTL,
    DEFAULT_QUERY_TIMEOUT_MS, DNS_PORT, EDNS_UDP_SIZE, MAX_ANSWERS_PER_NAME, MAX_SUPPORTED_TTL,
};
use crate::error::{ResolveError, Result};

/// Which address families a resolve may return, and in which order of
/// preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedAddressTypes {
    Ipv4Only,
    Ipv4Preferred,
    Ipv6Only,
    Ipv6Preferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl ResolvedAddressTypes {
    pub fn preferred(self) -> AddressFamily {
        match self {
            ResolvedAddressTypes::Ipv4Only | ResolvedAddressTypes::Ipv4Preferred => {
                AddressFamily::Ipv4
            }
            ResolvedAddressTypes::Ipv6Only | ResolvedAddressTypes::Ipv6Preferred => {
                AddressFamily::Ipv6
            }
        }
    }

    /// Enabled families in preference order.
    pub fn families(self) -> &'static [AddressFamily] {
        match self {
            ResolvedAddressTypes::Ipv4Only => &[AddressFamily::Ipv4],
            ResolvedAddressTypes::Ipv6Only => &[AddressFamily::Ipv6],
            ResolvedAddressTypes::Ipv4Preferred => &[AddressFamily::Ipv4, AddressFamily::Ipv6],
            ResolvedAddressTypes::Ipv6Preferred => &[AddressFamily::Ipv6, AddressFamily::Ipv4],
        }
    }
}

/// The default policy mirrors the common OS stack arrangement: IPv4 answers
/// preferred, IPv6 accepted.
pub fn default_address_types() -> ResolvedAddressTypes {
    ResolvedAddressTypes::Ipv4Preferred
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Name servers queried in order, unless an authority cache entry or a
    /// referral supplies a more specific set.
    pub name_servers: Vec<SocketAddr>,

    /// Per-query timeout.
    pub query_timeout: Duration,

    /// Budget across all queries issued on behalf of one resolve.
    pub max_queries_per_resolve: u16,

    /// Advertised EDNS0 buffer size; also caps the UDP receive buffer.
    pub max_payload_size: u16,

    /// Address family policy for `resolve` / `resolve_all`.
    pub resolved_address_types: ResolvedAddressTypes,

    /// Whether queries set the RD bit.
    pub recursion_desired: bool,

    /// Whether queries carry an EDNS0 OPT pseudo-record.
    pub opt_record_enabled: bool,

    /// Suffixes appended to short names before querying.
    pub search_domains: Vec<String>,

    /// Minimum number of dots for a name to be tried absolute first.
    pub ndots: u32,

    /// Punycode-decode names in responses.
    pub decode_idn: bool,

    /// Settle `resolve_all` as soon as the preferred family answers,
    /// leaving the secondary query to warm the cache in the background.
    pub complete_once_preferred_resolved: bool,

    /// Reissue truncated answers over TCP.
    pub tcp_fallback_enabled: bool,

    /// TTL clamp applied to every cache insert.
    pub min_ttl: u32,
    pub max_ttl: u32,

    /// TTL for cached negative answers.
    pub negative_ttl: u32,

    /// Per-name answer cache capacity; oldest entries evicted first.
    pub max_answers_per_name: usize,

    /// Port assumed for name servers learned from referrals and NS
    /// lookups, which carry bare addresses on the wire.
    pub name_server_port: u16,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            name_servers: vec![
                "1.1.1.1:53".parse().expect("Cloudflare DNS is valid"),
                "8.8.8.8:53".parse().expect("Google DNS is valid"),
                "8.8.4.4:53".parse().expect("Google Secondary DNS is valid"),
            ],
            query_timeout: Duration::from_millis(DEFAULT_QUERY_TIMEOUT_MS),
            max_queries_per_resolve: DEFAULT_MAX_QUERIES_PER_RESOLVE,
            max_payload_size: EDNS_UDP_SIZE,
            resolved_address_types: default_address_types(),
            recursion_desired: true,
            opt_record_enabled: true,
            search_domains: Vec::new(),
            ndots: DEFAULT_NDOTS,
            decode_idn: true,
            complete_once_preferred_resolved: false,
            tcp_fallback_enabled: true,
            min_ttl: 0,
            max_ttl: MAX_SUPPORTED_TTL,
            negative_ttl: DEFAULT_NEGATIVE_TTL,
            max_answers_per_name: MAX_ANSWERS_PER_NAME,
            name_server_port: DNS_PORT,
        }
    }
}

impl ResolverConfig {
    /// Create a ResolverConfig from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(servers) = std::env::var("MUNINN_NAME_SERVERS") {
            let parsed: std::result::Result<Vec<SocketAddr>, _> = servers
                .split(',')
                .map(|s| {
                    s.trim()
                        .parse::<SocketAddr>()
                        .map_err(|_| ResolveError::InvalidNameServer(s.to_string()))
                })
                .collect();
            let parsed = parsed?;
            if parsed.is_empty() {
                return Err(ResolveError::InvalidNameServer(
                    "no name servers provided".to_string(),
                ));
            }
            config.name_servers = parsed;
        }

        if let Ok(timeout_str) = std::env::var("MUNINN_QUERY_TIMEOUT_MS") {
            let millis = timeout_str
                .parse::<u64>()
                .map_err(|_| ResolveError::InvalidTimeout(timeout_str.clone()))?;
            if millis == 0 {
                return Err(ResolveError::InvalidTimeout(
                    "timeout must be greater than 0".to_string(),
                ));
            }
            config.query_timeout = Duration::from_millis(millis);
        }

        if let Ok(budget_str) = std::env::var("MUNINN_MAX_QUERIES_PER_RESOLVE") {
            let budget = budget_str
                .parse::<u16>()
                .map_err(|_| ResolveError::InvalidQueryBudget(budget_str.clone()))?;
            if budget == 0 {
                return Err(ResolveError::InvalidQueryBudget(
                    "query budget must be greater than 0".to_string(),
                ));
            }
            config.max_queries_per_resolve = budget;
        }

        if let Ok(domains) = std::env::var("MUNINN_SEARCH_DOMAINS") {
            config.search_domains = domains
                .split(',')
                .map(|s| s.trim().trim_end_matches('.').to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(ndots_str) = std::env::var("MUNINN_NDOTS") {
            config.ndots = ndots_str
                .parse::<u32>()
                .map_err(|_| ResolveError::InvalidSearchDomain(ndots_str.clone()))?;
        }

        if let Ok(tcp) = std::env::var("MUNINN_TCP_FALLBACK") {
            config.tcp_fallback_enabled = parse_bool(&tcp, true);
        }

        if let Ok(rd) = std::env::var("MUNINN_RECURSION_DESIRED") {
            config.recursion_desired = parse_bool(&rd, true);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name_servers.is_empty() {
            return Err(ResolveError::InvalidNameServer(
                "no name servers configured".to_string(),
            ));
        }
        if self.query_timeout.is_zero() {
            return Err(ResolveError::InvalidTimeout(
                "timeout must be greater than 0".to_string(),
            ));
        }
        if self.max_queries_per_resolve == 0 {
            return Err(ResolveError::InvalidQueryBudget(
                "query budget must be greater than 0".to_string(),
            ));
        }
        if self.max_payload_size < 512 {
            return Err(ResolveError::InvalidQueryBudget(format!(
                "max payload size {} is below the RFC 1035 minimum of 512",
                self.max_payload_size
            )));
        }
        if self.min_ttl > self.max_ttl {
            return Err(ResolveError::InvalidTimeout(format!(
                "min_ttl {} exceeds max_ttl {}",
                self.min_ttl, self.max_ttl
            )));
        }
        for domain in &self.search_domains {
            if domain.is_empty() || domain.starts_with('.') {
                return Err(ResolveError::InvalidSearchDomain(domain.clone()));
            }
        }
        Ok(())
    }
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ResolverConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_queries_per_resolve, 8);
        assert_eq!(config.query_timeout, Duration::from_secs(5));
        assert_eq!(config.max_payload_size, 4096);
    }

    #[test]
    fn test_family_preference_order() {
        assert_eq!(
            ResolvedAddressTypes::Ipv6Preferred.families(),
            &[AddressFamily::Ipv6, AddressFamily::Ipv4]
        );
        assert_eq!(
            ResolvedAddressTypes::Ipv4Only.preferred(),
            AddressFamily::Ipv4
        );
    }

    #[test]
    fn test_zero_budget_is_rejected() {
        let config = ResolverConfig {
            max_queries_per_resolve: 0,
            ..ResolverConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
