//! Message ingestion handler.

use super::{encode_response, ConnInfo, HandlerError};
use crate::context::ServerContext;
use crate::protocol::messages::{MessageRequest, MessageResponse};
use crate::protocol::{ApiKey, ResponseCode};
use serde_json::Value as JsonValue;
use tracing::{trace, warn};

const QUEUE_POLICY: &str = "message_queue";

/// Accept a record whose key names a topic and the queue processing
/// policy. Accepted records go to the sink asynchronously; anything else
/// is a normal rejected reply and the connection stays open.
pub fn handle(
    ctx: &ServerContext,
    conn: ConnInfo,
    request: &MessageRequest,
) -> Result<Box<[u8]>, HandlerError> {
    let code = match parse_policy(&request.key) {
        Some(policy) if policy == QUEUE_POLICY => {
            ctx.sink.write(&request.key, &request.value);
            trace!(peer = %conn.peer, value_len = request.value.len(), "message accepted");
            ResponseCode::MessageSuccess
        }
        other => {
            warn!(peer = %conn.peer, policy = ?other, "unsupported message policy");
            ResponseCode::MessageFailed
        }
    };

    let response = MessageResponse {
        status_code: code.value(),
        descriptor: code.descriptor().to_string(),
    };
    encode_response(ctx, ApiKey::Message, &response.to_struct()?)
}

fn parse_policy(key: &[u8]) -> Option<String> {
    let json: JsonValue = serde_json::from_slice(key).ok()?;
    json.get("message_process_policy")?
        .as_str()
        .map(str::to_string)
}
