//! Process-wide server context.
//!
//! All shared services are constructed exactly once at startup and
//! passed down explicitly. Nothing here is a lazily-initialized global;
//! single-instance semantics come from the single construction site.

use crate::auth::AuthStore;
use crate::net::session::SessionManager;
use crate::pool::BufferPoolAllocator;
use crate::sink::MessageWriterManager;
use std::time::Duration;

/// Heartbeats older than this are answered with a "timed out" status
/// message. Liveness tracking alone never disconnects a client.
pub const HEARTBEAT_TIMEOUT_MS: i64 = 10_000;

pub struct ServerContext {
    pub allocator: BufferPoolAllocator,
    pub sessions: SessionManager,
    pub auth: AuthStore,
    pub sink: MessageWriterManager,
    /// Upper bound for blocking buffer-pool allocations. Handler code
    /// runs off the I/O thread, so this is the only suspension point.
    pub alloc_block: Duration,
    /// Largest accepted frame body in bytes.
    pub max_frame_size: usize,
}

impl ServerContext {
    pub fn new(
        allocator: BufferPoolAllocator,
        sessions: SessionManager,
        auth: AuthStore,
        sink: MessageWriterManager,
        alloc_block: Duration,
        max_frame_size: usize,
    ) -> Self {
        Self {
            allocator,
            sessions,
            auth,
            sink,
            alloc_block,
            max_frame_size,
        }
    }
}
