use std::net::SocketAddr;

use crate::dns::ResponseCode;
use crate::error::ResolveError;

/// Lifecycle hooks reported for every query a resolve issues. All methods
/// default to no-ops; implementors override what they care about. Hooks are
/// invoked inline on the resolve path and must not block.
pub trait QueryLifecycleObserver: Send + Sync {
    /// The encoded datagram was handed to the transport.
    fn query_written(&self, _server: SocketAddr, _id: u16) {}

    /// The query was abandoned before a response arrived.
    fn query_cancelled(&self, _tries_so_far: u16) {}

    /// A referral redirected the resolve to a new set of servers.
    fn query_redirected(&self, _servers: &[SocketAddr]) {}

    /// The answer was an alias; the resolve continues at `target`.
    fn query_cnamed(&self, _target: &str) {}

    /// The server answered without records for the question.
    fn query_no_answer(&self, _code: ResponseCode) {}

    fn query_failed(&self, _cause: &ResolveError) {}

    fn query_succeeded(&self) {}
}

/// The default observer: ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl QueryLifecycleObserver for NoopObserver {}
