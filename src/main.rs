//! topicwire: a TCP message-ingestion server.
//!
//! Clients log in, heartbeat and publish topic-keyed messages over a
//! length-prefixed binary protocol; accepted messages land in per-topic
//! daily files.

mod auth;
mod config;
mod context;
mod handler;
mod net;
mod pool;
mod protocol;
mod sink;

use auth::AuthStore;
use config::Config;
use context::ServerContext;
use net::reactor::Reactor;
use net::session::SessionManager;
use pool::BufferPoolAllocator;
use sink::MessageWriterManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(config) {
        tracing::error!(error = %e, "server failed");
        std::process::exit(1);
    }
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let auth = AuthStore::load(&config.auth_file)?;
    if auth.is_empty() {
        warn!(auth_file = %config.auth_file.display(), "auth store has no users, every login will fail");
    }
    info!(users = auth.len(), auth_file = %config.auth_file.display(), "auth store loaded");

    // Session ids embed a worker id so ids from restarted or co-located
    // processes stay distinct.
    let worker_id = (std::process::id() % 1024) as u16;

    let ctx = Arc::new(ServerContext::new(
        BufferPoolAllocator::new(),
        SessionManager::new(worker_id),
        auth,
        MessageWriterManager::new(config.storage_path.clone(), config.flush_threshold),
        Duration::from_millis(config.alloc_block_ms),
        config.max_frame_size,
    ));

    for class in ctx.allocator.status() {
        debug!(
            poolable_size = class.poolable_size,
            total_memory = class.total_memory,
            available = class.available_memory,
            unallocated = class.unallocated_memory,
            queued = class.queued,
            "buffer pool class ready"
        );
    }

    let mut reactor = Reactor::bind(ctx, &config.listen, config.workers)?;
    info!(
        listen = %reactor.local_addr(),
        workers = config.workers,
        storage = %config.storage_path.display(),
        "topicwire listening"
    );
    reactor.run()?;
    Ok(())
}
