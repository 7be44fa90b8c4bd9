//! Login handler.

use super::{encode_response, ConnInfo, HandlerError};
use crate::context::ServerContext;
use crate::protocol::messages::{LoginRequest, LoginResponse};
use crate::protocol::{ApiKey, ResponseCode};
use tracing::{debug, info};

/// Check credentials against the auth store. Success registers a
/// session; failure is a normal status-1 reply and the connection stays
/// open.
pub fn handle(
    ctx: &ServerContext,
    conn: ConnInfo,
    request: &LoginRequest,
) -> Result<Box<[u8]>, HandlerError> {
    let code = if ctx.auth.verify(&request.user, &request.password) {
        let session_id = ctx.sessions.add_session(conn.local, conn.peer);
        info!(user = %request.user, session_id, peer = %conn.peer, "login accepted");
        ResponseCode::LoginSuccess
    } else {
        debug!(user = %request.user, peer = %conn.peer, "login rejected");
        ResponseCode::LoginFailed
    };

    let response = LoginResponse {
        status_code: code.value(),
        descriptor: code.descriptor().to_string(),
    };
    encode_response(ctx, ApiKey::Login, &response.to_struct()?)
}
