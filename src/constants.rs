pub const DNS_PORT: u16 = 53;
pub const EDNS_VERSION: u8 = 0;
pub const EDNS_UDP_SIZE: u16 = 4096;

pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_MAX_QUERIES_PER_RESOLVE: u16 = 8;
pub const DEFAULT_NDOTS: u32 = 1;
pub const DEFAULT_NEGATIVE_TTL: u32 = 300;

/// Maximum TTL a record is ever cached for (RFC 2181 caps TTLs at 2^31 - 1).
pub const MAX_SUPPORTED_TTL: u32 = 0x7FFF_FFFF;

/// Synthetic TTL attached to hosts-file answers.
pub const HOSTS_FILE_TTL: u32 = 86_400;

/// Upper bound on CNAME hops followed during one resolve.
pub const MAX_CNAME_REDIRECTS: u8 = 16;

/// Upper bound on referral redirections followed during one resolve.
pub const MAX_REFERRAL_REDIRECTS: u8 = 16;

/// How many cached answers one name may accumulate before insertion-order
/// eviction kicks in.
pub const MAX_ANSWERS_PER_NAME: usize = 32;
