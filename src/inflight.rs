use std::net::SocketAddr;

use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use tokio::sync::oneshot;
use tracing::trace;

use crate::dns::{DnsMessage, DnsQuestion};
use crate::error::{ResolveError, Result};

/// One outstanding question awaiting a response from one server.
#[derive(Debug)]
pub(crate) struct PendingQuery {
    pub question: DnsQuestion,
    pub tx: oneshot::Sender<DnsMessage>,
}

#[derive(Debug)]
struct IdCursor {
    next: u16,
    in_use: u16,
}

/// In-flight queries indexed by `(server, id)`. Each server gets its own
/// 16-bit ID pool so multiple upstreams sharing the one UDP socket never
/// collide. Removal is single-shot: a `(server, id)` tuple settles at most
/// once, which is also the defense against duplicated and reflected
/// responses.
#[derive(Debug)]
pub(crate) struct InFlightTable {
    contexts: DashMap<(SocketAddr, u16), PendingQuery, FxBuildHasher>,
    cursors: DashMap<SocketAddr, IdCursor, FxBuildHasher>,
}

impl InFlightTable {
    pub fn new() -> Self {
        InFlightTable {
            contexts: DashMap::with_hasher(FxBuildHasher),
            cursors: DashMap::with_hasher(FxBuildHasher),
        }
    }

    /// Store a pending query under a fresh ID for `server`. The first ID
    /// handed out for a server is 1; later allocations probe sequentially
    /// from a per-server cursor, skipping 0 and IDs still in flight.
    pub fn register(&self, server: SocketAddr, pending: PendingQuery) -> Result<u16> {
        let mut cursor = self
            .cursors
            .entry(server)
            .or_insert(IdCursor { next: 1, in_use: 0 });
        if cursor.in_use == u16::MAX {
            return Err(ResolveError::NoMoreIds(server));
        }

        let mut id = cursor.next.max(1);
        while self.contexts.contains_key(&(server, id)) {
            id = id.wrapping_add(1).max(1);
        }
        cursor.next = id.wrapping_add(1).max(1);
        cursor.in_use += 1;

        // Insert while the cursor guard is held so concurrent registrations
        // for the same server cannot pick the same ID.
        self.contexts.insert((server, id), pending);
        trace!("Registered query id {} for {}", id, server);
        Ok(id)
    }

    /// Whether a decoded response plausibly belongs to the pending query,
    /// checked before the slot is claimed so a forged or mismatched packet
    /// leaves the real query waiting.
    pub fn matches(&self, server: SocketAddr, id: u16, response: &DnsMessage) -> bool {
        let Some(pending) = self.contexts.get(&(server, id)) else {
            return false;
        };
        if !response.header.qr || response.header.opcode != 0 {
            return false;
        }
        response
            .first_question()
            .is_some_and(|q| *q == pending.question)
    }

    /// Remove and return the pending query. Returns `None` when the tuple
    /// was never registered or has already settled.
    pub fn claim(&self, server: SocketAddr, id: u16) -> Option<PendingQuery> {
        let removed = self.contexts.remove(&(server, id)).map(|(_, v)| v);
        if removed.is_some() {
            if let Some(mut cursor) = self.cursors.get_mut(&server) {
                cursor.in_use = cursor.in_use.saturating_sub(1);
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }
}
