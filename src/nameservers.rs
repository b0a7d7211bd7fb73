use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use smallvec::SmallVec;

use crate::config::AddressFamily;

/// An ordered, indefinitely cycling stream of candidate name servers for
/// one resolve. The resolve loop counts queries, not positions, so `next`
/// simply wraps.
#[derive(Debug, Clone)]
pub struct NameServerStream {
    servers: SmallVec<[SocketAddr; 4]>,
    index: usize,
}

impl NameServerStream {
    pub fn new(servers: impl IntoIterator<Item = SocketAddr>) -> Self {
        NameServerStream {
            servers: servers.into_iter().collect(),
            index: 0,
        }
    }

    /// Stable-sort the stream so servers of the preferred family come
    /// first; original order is preserved among equals.
    pub fn prefer_family(mut self, family: AddressFamily) -> Self {
        self.servers.sort_by_key(|addr| match (family, addr.is_ipv4()) {
            (AddressFamily::Ipv4, true) | (AddressFamily::Ipv6, false) => 0u8,
            _ => 1u8,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn servers(&self) -> &[SocketAddr] {
        &self.servers
    }

    /// The next candidate; cycles forever. Panics on an empty stream, which
    /// construction paths never produce.
    pub fn next(&mut self) -> SocketAddr {
        let server = self.servers[self.index % self.servers.len()];
        self.index += 1;
        server
    }
}

/// Supplies the base name-server stream for a hostname. The default
/// implementation ignores the hostname and rotates through a fixed list;
/// richer providers can shard by zone.
pub trait NameServerProvider: Send + Sync {
    fn name_servers(&self, hostname: &str) -> NameServerStream;
}

/// Always hands out the configured servers in their original order, so the
/// first server is tried first and the rest serve as failover.
#[derive(Debug)]
pub struct SequentialNameServerProvider {
    servers: Vec<SocketAddr>,
}

impl SequentialNameServerProvider {
    pub fn new(servers: Vec<SocketAddr>) -> Self {
        SequentialNameServerProvider { servers }
    }
}

impl NameServerProvider for SequentialNameServerProvider {
    fn name_servers(&self, _hostname: &str) -> NameServerStream {
        NameServerStream::new(self.servers.iter().copied())
    }
}

/// Rotates the starting point across calls so load spreads over the
/// configured servers.
#[derive(Debug)]
pub struct RotatingNameServerProvider {
    servers: Vec<SocketAddr>,
    next_start: AtomicUsize,
}

impl RotatingNameServerProvider {
    pub fn new(servers: Vec<SocketAddr>) -> Self {
        RotatingNameServerProvider {
            servers,
            next_start: AtomicUsize::new(0),
        }
    }
}

impl NameServerProvider for RotatingNameServerProvider {
    fn name_servers(&self, _hostname: &str) -> NameServerStream {
        let start = self.next_start.fetch_add(1, Ordering::Relaxed) % self.servers.len().max(1);
        let rotated = self
            .servers
            .iter()
            .cycle()
            .skip(start)
            .take(self.servers.len())
            .copied();
        NameServerStream::new(rotated)
    }
}

impl NameServerProvider for Arc<dyn NameServerProvider> {
    fn name_servers(&self, hostname: &str) -> NameServerStream {
        (**self).name_servers(hostname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_stream_cycles() {
        let mut stream = NameServerStream::new([addr("10.0.0.1:53"), addr("10.0.0.2:53")]);
        assert_eq!(stream.len(), 2);
        assert_eq!(stream.next(), addr("10.0.0.1:53"));
        assert_eq!(stream.next(), addr("10.0.0.2:53"));
        assert_eq!(stream.next(), addr("10.0.0.1:53"));
    }

    #[test]
    fn test_family_preference_is_stable() {
        let stream = NameServerStream::new([
            addr("10.0.0.1:53"),
            addr("[2001:db8::1]:53"),
            addr("10.0.0.2:53"),
            addr("[2001:db8::2]:53"),
        ])
        .prefer_family(AddressFamily::Ipv6);

        assert_eq!(
            stream.servers(),
            &[
                addr("[2001:db8::1]:53"),
                addr("[2001:db8::2]:53"),
                addr("10.0.0.1:53"),
                addr("10.0.0.2:53"),
            ]
        );
    }

    #[test]
    fn test_rotating_provider_spreads_load() {
        let provider = RotatingNameServerProvider::new(vec![
            addr("10.0.0.1:53"),
            addr("10.0.0.2:53"),
        ]);
        let mut first = provider.name_servers("a.example.org");
        let mut second = provider.name_servers("b.example.org");
        assert_eq!(first.next(), addr("10.0.0.1:53"));
        assert_eq!(second.next(), addr("10.0.0.2:53"));
    }
}
