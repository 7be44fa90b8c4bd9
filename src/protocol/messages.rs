//! Typed request and response messages.
//!
//! Each message owns a schema built once at first use; converting to and
//! from [`Struct`] is the only way on or off the wire. Decoded requests
//! form the closed [`Request`] variant set that handlers match on.

use super::schema::{Field, Schema, Struct};
use super::types::{DataType, SchemaError, Value};
use super::ApiKey;
use bytes::{Buf, Bytes};
use std::sync::OnceLock;

// Field names shared between requests and responses.
const LOGIN_USER: &str = "login_user";
const LOGIN_PASSWORD: &str = "login_password";
const LOGIN_STATUS_CODE: &str = "login_status_code";
const LOGIN_STATUS_DESCRIPTOR: &str = "login_status_descriptor";
const HEART_BEAT_MESSAGE: &str = "heart_beat_message";
const HEART_BEAT_TS: &str = "heart_beat_ts";
const MESSAGE_KEY: &str = "message_key";
const MESSAGE_VALUE: &str = "message_value";
const MESSAGE_TS: &str = "message_ts";
const MESSAGE_STATUS_CODE: &str = "message_status_code";
const MESSAGE_STATUS_DESCRIPTOR: &str = "message_status_descriptor";

fn get_str(s: &Struct, name: &str) -> Result<String, SchemaError> {
    match s.get(name)? {
        Value::Str(v) => Ok(v.clone()),
        other => Err(SchemaError::TypeMismatch {
            expected: "STRING",
            found: other.kind(),
        }),
    }
}

fn get_i32(s: &Struct, name: &str) -> Result<i32, SchemaError> {
    match s.get(name)? {
        Value::Int32(v) => Ok(*v),
        other => Err(SchemaError::TypeMismatch {
            expected: "INT32",
            found: other.kind(),
        }),
    }
}

fn get_i64(s: &Struct, name: &str) -> Result<i64, SchemaError> {
    match s.get(name)? {
        Value::Int64(v) => Ok(*v),
        other => Err(SchemaError::TypeMismatch {
            expected: "INT64",
            found: other.kind(),
        }),
    }
}

fn get_bytes(s: &Struct, name: &str) -> Result<Bytes, SchemaError> {
    match s.get(name)? {
        Value::Bytes(v) => Ok(v.clone()),
        other => Err(SchemaError::TypeMismatch {
            expected: "BYTES",
            found: other.kind(),
        }),
    }
}

/// A decoded request, dispatched by variant tag.
#[derive(Debug, Clone)]
pub enum Request {
    Login(LoginRequest),
    HeartBeat(HeartBeatRequest),
    Message(MessageRequest),
}

impl Request {
    /// Decode a frame body against the request schema for `api`.
    pub fn decode<B: Buf>(api: ApiKey, body: &mut B) -> Result<Request, SchemaError> {
        let s = api.request_schema().read(body)?;
        Ok(match api {
            ApiKey::Login => Request::Login(LoginRequest::from_struct(s)?),
            ApiKey::HeartBeat => Request::HeartBeat(HeartBeatRequest::from_struct(s)?),
            ApiKey::Message => Request::Message(MessageRequest::from_struct(s)?),
        })
    }

    pub fn api_key(&self) -> ApiKey {
        match self {
            Request::Login(_) => ApiKey::Login,
            Request::HeartBeat(_) => ApiKey::HeartBeat,
            Request::Message(_) => ApiKey::Message,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub user: String,
    pub password: String,
}

impl LoginRequest {
    pub fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::new(vec![
                Field::new(LOGIN_USER, "login user name", DataType::Str),
                Field::new(LOGIN_PASSWORD, "login password", DataType::Str),
            ])
        })
    }

    pub fn from_struct(s: Struct) -> Result<Self, SchemaError> {
        Ok(Self {
            user: get_str(&s, LOGIN_USER)?,
            password: get_str(&s, LOGIN_PASSWORD)?,
        })
    }

    pub fn to_struct(&self) -> Result<Struct, SchemaError> {
        let mut s = Self::schema().new_struct();
        s.set(LOGIN_USER, Value::Str(self.user.clone()))?;
        s.set(LOGIN_PASSWORD, Value::Str(self.password.clone()))?;
        Ok(s)
    }
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub status_code: i32,
    pub descriptor: String,
}

impl LoginResponse {
    pub fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::new(vec![
                Field::new(LOGIN_STATUS_CODE, "login response code", DataType::Int32),
                Field::new(
                    LOGIN_STATUS_DESCRIPTOR,
                    "login response descriptor",
                    DataType::Str,
                ),
            ])
        })
    }

    pub fn from_struct(s: Struct) -> Result<Self, SchemaError> {
        Ok(Self {
            status_code: get_i32(&s, LOGIN_STATUS_CODE)?,
            descriptor: get_str(&s, LOGIN_STATUS_DESCRIPTOR)?,
        })
    }

    pub fn to_struct(&self) -> Result<Struct, SchemaError> {
        let mut s = Self::schema().new_struct();
        s.set(LOGIN_STATUS_CODE, Value::Int32(self.status_code))?;
        s.set(LOGIN_STATUS_DESCRIPTOR, Value::Str(self.descriptor.clone()))?;
        Ok(s)
    }
}

#[derive(Debug, Clone)]
pub struct HeartBeatRequest {
    pub message: String,
    pub ts: i64,
}

impl HeartBeatRequest {
    pub fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::new(vec![
                Field::new(HEART_BEAT_MESSAGE, "heart beat message", DataType::Str),
                Field::new(HEART_BEAT_TS, "heart beat timestamp", DataType::Int64),
            ])
        })
    }

    pub fn from_struct(s: Struct) -> Result<Self, SchemaError> {
        Ok(Self {
            message: get_str(&s, HEART_BEAT_MESSAGE)?,
            ts: get_i64(&s, HEART_BEAT_TS)?,
        })
    }

    pub fn to_struct(&self) -> Result<Struct, SchemaError> {
        let mut s = Self::schema().new_struct();
        s.set(HEART_BEAT_MESSAGE, Value::Str(self.message.clone()))?;
        s.set(HEART_BEAT_TS, Value::Int64(self.ts))?;
        Ok(s)
    }
}

/// Heartbeat replies reuse the request layout.
#[derive(Debug, Clone)]
pub struct HeartBeatResponse {
    pub message: String,
    pub ts: i64,
}

impl HeartBeatResponse {
    pub fn schema() -> &'static Schema {
        HeartBeatRequest::schema()
    }

    pub fn from_struct(s: Struct) -> Result<Self, SchemaError> {
        Ok(Self {
            message: get_str(&s, HEART_BEAT_MESSAGE)?,
            ts: get_i64(&s, HEART_BEAT_TS)?,
        })
    }

    pub fn to_struct(&self) -> Result<Struct, SchemaError> {
        let mut s = Self::schema().new_struct();
        s.set(HEART_BEAT_MESSAGE, Value::Str(self.message.clone()))?;
        s.set(HEART_BEAT_TS, Value::Int64(self.ts))?;
        Ok(s)
    }
}

#[derive(Debug, Clone)]
pub struct MessageRequest {
    pub key: Bytes,
    pub value: Bytes,
    pub ts: i64,
}

impl MessageRequest {
    pub fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::new(vec![
                Field::new(MESSAGE_KEY, "message key", DataType::Bytes),
                Field::new(MESSAGE_VALUE, "message value", DataType::Bytes),
                Field::new(MESSAGE_TS, "message timestamp", DataType::Int64),
            ])
        })
    }

    pub fn from_struct(s: Struct) -> Result<Self, SchemaError> {
        Ok(Self {
            key: get_bytes(&s, MESSAGE_KEY)?,
            value: get_bytes(&s, MESSAGE_VALUE)?,
            ts: get_i64(&s, MESSAGE_TS)?,
        })
    }

    pub fn to_struct(&self) -> Result<Struct, SchemaError> {
        let mut s = Self::schema().new_struct();
        s.set(MESSAGE_KEY, Value::Bytes(self.key.clone()))?;
        s.set(MESSAGE_VALUE, Value::Bytes(self.value.clone()))?;
        s.set(MESSAGE_TS, Value::Int64(self.ts))?;
        Ok(s)
    }
}

#[derive(Debug, Clone)]
pub struct MessageResponse {
    pub status_code: i32,
    pub descriptor: String,
}

impl MessageResponse {
    pub fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::new(vec![
                Field::new(MESSAGE_STATUS_CODE, "message response code", DataType::Int32),
                Field::new(
                    MESSAGE_STATUS_DESCRIPTOR,
                    "message response descriptor",
                    DataType::Str,
                ),
            ])
        })
    }

    pub fn from_struct(s: Struct) -> Result<Self, SchemaError> {
        Ok(Self {
            status_code: get_i32(&s, MESSAGE_STATUS_CODE)?,
            descriptor: get_str(&s, MESSAGE_STATUS_DESCRIPTOR)?,
        })
    }

    pub fn to_struct(&self) -> Result<Struct, SchemaError> {
        let mut s = Self::schema().new_struct();
        s.set(MESSAGE_STATUS_CODE, Value::Int32(self.status_code))?;
        s.set(
            MESSAGE_STATUS_DESCRIPTOR,
            Value::Str(self.descriptor.clone()),
        )?;
        Ok(s)
    }
}
