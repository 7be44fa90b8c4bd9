//! Business logic per decoded request.
//!
//! Handlers dispatch on the request's variant tag and produce a fully
//! encoded response frame in a pool-allocated buffer. Authentication
//! failure is a normal response; every other handler fault surfaces as
//! a [`HandlerError`] that the dispatch boundary logs and turns into a
//! connection close.

mod heartbeat;
mod login;
mod message;

use crate::context::ServerContext;
use crate::net::endpoint::EndPoint;
use crate::net::session::SessionError;
use crate::pool::PoolError;
use crate::protocol::messages::Request;
use crate::protocol::schema::Struct;
use crate::protocol::types::SchemaError;
use crate::protocol::{encode_frame, ApiKey, FRAME_HEADER_LEN};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Endpoints of the connection a request arrived on.
#[derive(Debug, Clone, Copy)]
pub struct ConnInfo {
    pub local: EndPoint,
    pub peer: EndPoint,
}

/// Run the handler for one decoded request and return the encoded
/// response frame.
pub fn handle_request(
    ctx: &ServerContext,
    conn: ConnInfo,
    request: Request,
) -> Result<Box<[u8]>, HandlerError> {
    match request {
        Request::Login(req) => login::handle(ctx, conn, &req),
        Request::HeartBeat(req) => heartbeat::handle(ctx, conn, &req),
        Request::Message(req) => message::handle(ctx, conn, &req),
    }
}

/// Size the frame via `size_of`, allocate from the pool, and encode
/// header plus body into the exact-size buffer.
fn encode_response(
    ctx: &ServerContext,
    api: ApiKey,
    payload: &Struct,
) -> Result<Box<[u8]>, HandlerError> {
    let frame_len = payload.size_of()? + FRAME_HEADER_LEN;
    let mut buffer = ctx.allocator.allocate(frame_len, ctx.alloc_block)?;
    let mut cursor = &mut buffer[..];
    encode_frame(api, payload, &mut cursor)?;
    Ok(buffer)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::auth::AuthStore;
    use crate::net::session::SessionManager;
    use crate::pool::BufferPoolAllocator;
    use crate::sink::MessageWriterManager;
    use std::net::IpAddr;
    use std::path::PathBuf;
    use std::time::Duration;

    pub fn test_context(storage: PathBuf) -> ServerContext {
        ServerContext::new(
            BufferPoolAllocator::new(),
            SessionManager::new(1),
            AuthStore::from_pairs([("user1", "0192023a7bbd"), ("user2", "pw2")]),
            MessageWriterManager::new(storage, 0),
            Duration::from_millis(500),
            1024 * 1024,
        )
    }

    pub fn test_conn(peer_port: u16) -> ConnInfo {
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        ConnInfo {
            local: EndPoint::new(ip, 9922),
            peer: EndPoint::new(ip, peer_port),
        }
    }
}
