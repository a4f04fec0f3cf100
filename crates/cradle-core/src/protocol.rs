//! Realtime database wire frames
//!
//! Requests are `{t:"d", d:{a, r, b}}` envelopes: `a` is the action, `r` the
//! request number echoed in the response, `b` the body. Responses are parsed
//! by fixed paths into the JSON payload; any missing piece is a
//! [`ProtocolError`].

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::models::SessionDescriptor;

/// Request number of the auth request
pub const AUTH_REQUEST_ID: u32 = 2;

/// Request number of the family key query
pub const QUERY_REQUEST_ID: u32 = 4;

/// Errors raised when a server frame does not have the expected shape
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{frame} response is missing '{path}'")]
    MissingField { frame: &'static str, path: &'static str },

    #[error("family key query returned no keys")]
    EmptyFamilyKeys,
}

/// Outgoing data frame
#[derive(Debug, Clone, Serialize)]
pub struct ClientFrame<'a> {
    t: &'static str,
    d: Request<'a>,
}

#[derive(Debug, Clone, Serialize)]
struct Request<'a> {
    a: &'static str,
    r: u32,
    b: RequestBody<'a>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum RequestBody<'a> {
    Auth { cred: &'a str },
    Query { p: String, h: &'static str },
}

impl<'a> ClientFrame<'a> {
    /// Authenticate the connection with a bearer credential
    pub fn auth(token: &'a str) -> Self {
        Self {
            t: "d",
            d: Request {
                a: "auth",
                r: AUTH_REQUEST_ID,
                b: RequestBody::Auth { cred: token },
            },
        }
    }

    /// Query the family keys of `user_id`
    pub fn family_keys_query(user_id: &str) -> Self {
        Self {
            t: "d",
            d: Request {
                a: "q",
                r: QUERY_REQUEST_ID,
                b: RequestBody::Query {
                    p: family_keys_path(user_id),
                    h: "",
                },
            },
        }
    }
}

/// Database path holding a user's family keys
pub fn family_keys_path(user_id: &str) -> String {
    format!("userz/{}/familyKeyz", user_id)
}

/// Outcome of the handshake frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    /// Session granted on this host
    Established(SessionDescriptor),
    /// Reconnect to `host` before continuing
    Redirect { host: String, kind: Option<String> },
}

/// Parse the first frame of a connection
///
/// `{d:{d:{ts, v, h, s}}}` with a truthy `s` is a granted session; without
/// `s` the frame is `{d:{d:{d:<host>, t:<type>}}}`, a redirect.
pub fn parse_handshake(frame: &Value) -> Result<Handshake, ProtocolError> {
    let body = frame
        .pointer("/d/d")
        .ok_or(ProtocolError::MissingField {
            frame: "handshake",
            path: "d.d",
        })?;

    if is_truthy(body.get("s")) {
        return Ok(Handshake::Established(parse_descriptor(body)));
    }

    let host = body
        .get("d")
        .and_then(Value::as_str)
        .filter(|host| !host.is_empty())
        .ok_or(ProtocolError::MissingField {
            frame: "handshake",
            path: "d.d.d",
        })?;
    Ok(Handshake::Redirect {
        host: host.to_string(),
        kind: body.get("t").and_then(Value::as_str).map(str::to_string),
    })
}

/// Read the session fields of a handshake body, tolerating absent ones
fn parse_descriptor(body: &Value) -> SessionDescriptor {
    SessionDescriptor {
        timestamp: body.get("ts").and_then(Value::as_i64).unwrap_or_default(),
        version: scalar_to_string(body.get("v")),
        host: scalar_to_string(body.get("h")),
        session_id: scalar_to_string(body.get("s")),
    }
}

/// Session descriptor of a frame received after a redirect
///
/// Only a single redirect hop is followed, so this never fails: a second
/// redirect frame is reported as `None`.
pub fn descriptor_after_redirect(frame: &Value) -> Option<SessionDescriptor> {
    let body = frame.pointer("/d/d")?;
    is_truthy(body.get("s")).then(|| parse_descriptor(body))
}

/// Authenticated user id from the auth response (`d.b.d.auth.user_id`)
pub fn parse_auth_user_id(frame: &Value) -> Result<String, ProtocolError> {
    frame
        .pointer("/d/b/d/auth/user_id")
        .and_then(Value::as_str)
        .filter(|uid| !uid.is_empty())
        .map(str::to_string)
        .ok_or(ProtocolError::MissingField {
            frame: "auth",
            path: "d.b.d.auth.user_id",
        })
}

/// Family key from the query response: the first key of `d.b.d`
pub fn parse_family_key(frame: &Value) -> Result<String, ProtocolError> {
    let keys = frame
        .pointer("/d/b/d")
        .and_then(Value::as_object)
        .ok_or(ProtocolError::MissingField {
            frame: "query",
            path: "d.b.d",
        })?;

    keys.keys()
        .next()
        .cloned()
        .ok_or(ProtocolError::EmptyFamilyKeys)
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(_) => true,
    }
}

fn scalar_to_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
