//! Networking: reactor event loop, per-connection channels, worker
//! dispatch and session tracking.

pub mod channel;
pub mod dispatcher;
pub mod endpoint;
pub mod reactor;
pub mod session;
