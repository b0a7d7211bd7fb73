use std::net::IpAddr;
use std::path::Path;

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::config::AddressFamily;
use crate::dns::name;

/// Local overlay consulted before any cache or network activity. A
/// non-empty result short-circuits the resolve entirely.
pub trait HostsFileResolver: Send + Sync {
    /// All addresses of the given family mapped to `hostname`, in file
    /// order. An empty result means "not overridden".
    fn lookup(&self, hostname: &str, family: AddressFamily) -> Vec<IpAddr>;
}

/// Hosts-file entries held in memory, keyed by normalized hostname.
#[derive(Debug, Default)]
pub struct InMemoryHostsResolver {
    v4: FxHashMap<String, Vec<IpAddr>>,
    v6: FxHashMap<String, Vec<IpAddr>>,
}

impl InMemoryHostsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the standard hosts-file text format: one address followed by
    /// one or more names per line, `#` starting a comment.
    pub fn parse(text: &str) -> Self {
        let mut resolver = Self::new();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("");
            let mut fields = line.split_whitespace();
            let Some(addr_text) = fields.next() else {
                continue;
            };
            let Ok(addr) = addr_text.parse::<IpAddr>() else {
                warn!("Skipping unparseable hosts entry: {}", addr_text);
                continue;
            };
            for host in fields {
                resolver.insert(host, addr);
            }
        }
        resolver
    }

    /// Load from a hosts file on disk (e.g. `/etc/hosts`).
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// Load the platform hosts file, falling back to an empty overlay when
    /// it cannot be read.
    pub fn system_default() -> Self {
        let path = if cfg!(windows) {
            r"C:\Windows\System32\drivers\etc\hosts"
        } else {
            "/etc/hosts"
        };
        Self::load(path).unwrap_or_default()
    }

    pub fn insert(&mut self, hostname: &str, addr: IpAddr) {
        let key = name::normalize(hostname);
        let map = match addr {
            IpAddr::V4(_) => &mut self.v4,
            IpAddr::V6(_) => &mut self.v6,
        };
        map.entry(key).or_default().push(addr);
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }
}

impl HostsFileResolver for InMemoryHostsResolver {
    fn lookup(&self, hostname: &str, family: AddressFamily) -> Vec<IpAddr> {
        let key = name::normalize(hostname);
        let map = match family {
            AddressFamily::Ipv4 => &self.v4,
            AddressFamily::Ipv6 => &self.v6,
        };
        map.get(&key).cloned().unwrap_or_default()
    }
}

/// Wrapper that caps every lookup at a single address, for callers that
/// only ever want one.
pub struct SingleAddressHostsResolver<R>(pub R);

impl<R: HostsFileResolver> HostsFileResolver for SingleAddressHostsResolver<R> {
    fn lookup(&self, hostname: &str, family: AddressFamily) -> Vec<IpAddr> {
        let mut addrs = self.0.lookup(hostname, family);
        addrs.truncate(1);
        addrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    const SAMPLE: &str = "\
127.0.0.1   localhost localhost.localdomain
::1         localhost
10.0.0.7    Build-Box.example.org build-box  # lab machine
# 10.9.9.9  commented.example.org
bogus-line
";

    #[test]
    fn test_parse_and_lookup() {
        let hosts = InMemoryHostsResolver::parse(SAMPLE);

        assert_eq!(
            hosts.lookup("localhost", AddressFamily::Ipv4),
            vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]
        );
        assert_eq!(
            hosts.lookup("localhost", AddressFamily::Ipv6),
            vec![IpAddr::V6(Ipv6Addr::LOCALHOST)]
        );
        // names are matched case-insensitively
        assert_eq!(
            hosts.lookup("build-box.EXAMPLE.org", AddressFamily::Ipv4),
            vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))]
        );
        assert!(hosts.lookup("commented.example.org", AddressFamily::Ipv4).is_empty());
        assert!(hosts.lookup("localhost", AddressFamily::Ipv4).len() == 1);
    }

    #[test]
    fn test_load_from_disk() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "192.0.2.9 disk.example.org").unwrap();
        let hosts = InMemoryHostsResolver::load(file.path()).unwrap();
        assert_eq!(
            hosts.lookup("disk.example.org", AddressFamily::Ipv4),
            vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 9))]
        );
    }

    #[test]
    fn test_single_address_cap() {
        let mut inner = InMemoryHostsResolver::new();
        inner.insert("multi.example.org", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        inner.insert("multi.example.org", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));

        let capped = SingleAddressHostsResolver(inner);
        assert_eq!(
            capped.lookup("multi.example.org", AddressFamily::Ipv4),
            vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))]
        );
    }
}
