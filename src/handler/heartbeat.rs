//! Heartbeat handler.
//!
//! Soft-timeout policy: a heartbeat whose declared timestamp is older
//! than the threshold still gets a successful reply, just marked as
//! timed out. Only authentication failure or transport close ever ends
//! a connection.

use super::{encode_response, ConnInfo, HandlerError};
use crate::context::{ServerContext, HEARTBEAT_TIMEOUT_MS};
use crate::net::session::now_millis;
use crate::protocol::messages::{HeartBeatRequest, HeartBeatResponse};
use crate::protocol::ApiKey;
use tracing::trace;

pub fn handle(
    ctx: &ServerContext,
    conn: ConnInfo,
    request: &HeartBeatRequest,
) -> Result<Box<[u8]>, HandlerError> {
    let now = now_millis();
    let delta = now - request.ts;

    let message = if delta > HEARTBEAT_TIMEOUT_MS {
        format!("heartbeat timed out: {delta} ms")
    } else {
        format!("heartbeat normal: {delta} ms")
    };
    trace!(peer = %conn.peer, delta, "heartbeat");

    ctx.sessions.update_session(conn.peer)?;

    let response = HeartBeatResponse { message, ts: now };
    encode_response(ctx, ApiKey::HeartBeat, &response.to_struct()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_support::{test_conn, test_context};
    use crate::net::session::SessionError;
    use bytes::{Buf, Bytes};

    fn decode_response(frame: &[u8]) -> HeartBeatResponse {
        let mut cursor = Bytes::copy_from_slice(frame);
        cursor.get_i32();
        assert_eq!(cursor.get_i32(), ApiKey::HeartBeat.id());
        HeartBeatResponse::from_struct(
            ApiKey::HeartBeat.response_schema().read(&mut cursor).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_recent_heartbeat_is_normal() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path().to_path_buf());
        let conn = test_conn(50200);
        ctx.sessions.add_session(conn.local, conn.peer);

        let req = HeartBeatRequest {
            message: "ping".to_string(),
            ts: now_millis() - 1000,
        };
        let resp = decode_response(&handle(&ctx, conn, &req).unwrap());
        assert!(resp.message.starts_with("heartbeat normal"), "{}", resp.message);
    }

    #[test]
    fn test_stale_heartbeat_reports_timeout_but_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path().to_path_buf());
        let conn = test_conn(50201);
        ctx.sessions.add_session(conn.local, conn.peer);

        let req = HeartBeatRequest {
            message: "ping".to_string(),
            ts: now_millis() - 15_000,
        };
        // Past the 10s threshold the reply still arrives; the session is
        // not dropped.
        let resp = decode_response(&handle(&ctx, conn, &req).unwrap());
        assert!(resp.message.starts_with("heartbeat timed out"), "{}", resp.message);
        assert!(ctx.sessions.get(conn.peer).is_some());
    }

    #[test]
    fn test_heartbeat_without_session_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path().to_path_buf());
        let conn = test_conn(50202);

        let req = HeartBeatRequest {
            message: "ping".to_string(),
            ts: now_millis(),
        };
        assert!(matches!(
            handle(&ctx, conn, &req),
            Err(HandlerError::Session(SessionError::UnknownEndpoint(_)))
        ));
    }

    #[test]
    fn test_heartbeat_refreshes_ack_ts() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path().to_path_buf());
        let conn = test_conn(50203);
        ctx.sessions.add_session(conn.local, conn.peer);
        let before = ctx.sessions.get(conn.peer).unwrap().last_heartbeat_ack_ts;

        std::thread::sleep(std::time::Duration::from_millis(5));
        let req = HeartBeatRequest {
            message: "ping".to_string(),
            ts: now_millis(),
        };
        handle(&ctx, conn, &req).unwrap();
        let after = ctx.sessions.get(conn.peer).unwrap().last_heartbeat_ack_ts;
        assert!(after > before);
    }
}
