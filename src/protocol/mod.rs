//! Binary protocol: wire frame envelope, api registry and message codecs.
//!
//! Wire frame (big-endian): `[i32 body_length][i32 api_id][body]`.
//! The body decodes against the request schema registered for the api id;
//! an unrecognized id is a protocol error that costs the sender its
//! connection.

pub mod messages;
pub mod schema;
pub mod types;

use bytes::BufMut;
use schema::{Schema, Struct};
use types::SchemaError;

/// Bytes occupied by the `[body_length][api_id]` frame header.
pub const FRAME_HEADER_LEN: usize = 8;

/// Closed registry of message kinds. Resolved once through an exhaustive
/// match; there is no open registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiKey {
    Login,
    HeartBeat,
    Message,
}

impl ApiKey {
    pub const ALL: [ApiKey; 3] = [ApiKey::Login, ApiKey::HeartBeat, ApiKey::Message];

    pub fn id(self) -> i32 {
        match self {
            ApiKey::Login => 0,
            ApiKey::HeartBeat => 1,
            ApiKey::Message => 2,
        }
    }

    /// Resolve a wire api id. `None` means protocol error.
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(ApiKey::Login),
            1 => Some(ApiKey::HeartBeat),
            2 => Some(ApiKey::Message),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ApiKey::Login => "login",
            ApiKey::HeartBeat => "heart_beat",
            ApiKey::Message => "message",
        }
    }

    pub fn request_schema(self) -> &'static Schema {
        match self {
            ApiKey::Login => messages::LoginRequest::schema(),
            ApiKey::HeartBeat => messages::HeartBeatRequest::schema(),
            ApiKey::Message => messages::MessageRequest::schema(),
        }
    }

    pub fn response_schema(self) -> &'static Schema {
        match self {
            ApiKey::Login => messages::LoginResponse::schema(),
            ApiKey::HeartBeat => messages::HeartBeatResponse::schema(),
            ApiKey::Message => messages::MessageResponse::schema(),
        }
    }
}

/// Server reply status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    LoginSuccess,
    LoginFailed,
    MessageSuccess,
    MessageFailed,
}

impl ResponseCode {
    pub fn value(self) -> i32 {
        match self {
            ResponseCode::LoginSuccess => 0,
            ResponseCode::LoginFailed => 1,
            ResponseCode::MessageSuccess => 2,
            ResponseCode::MessageFailed => 3,
        }
    }

    pub fn descriptor(self) -> &'static str {
        match self {
            ResponseCode::LoginSuccess => "login success",
            ResponseCode::LoginFailed => "login failed",
            ResponseCode::MessageSuccess => "message accepted",
            ResponseCode::MessageFailed => "message rejected",
        }
    }
}

/// Encode a complete frame (header + body) for `payload` into `buf`.
///
/// The caller sizes the buffer as `payload.size_of() + FRAME_HEADER_LEN`
/// before calling; `size_of` is exact so the write never overruns.
pub fn encode_frame<B: BufMut>(
    api: ApiKey,
    payload: &Struct,
    buf: &mut B,
) -> Result<(), SchemaError> {
    let body_len = payload.size_of()?;
    buf.put_i32(body_len as i32);
    buf.put_i32(api.id());
    payload.write_to(buf)?;
    Ok(())
}
