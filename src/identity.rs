// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Owner identity resolution: the single validation gate for owner ids.
//!
//! Downstream code only ever sees an [`OwnerId`]. Every way of building one,
//! including deserializing a persisted record, goes through [`OwnerId::parse`].
//!
//! # Example
//!
//! ```
//! use offline_sync::IdentityResolver;
//! use serde_json::json;
//!
//! let resolver = IdentityResolver::default();
//! let resolved = resolver
//!     .resolve(&json!({
//!         "user_id": "6F9619FF-8B86-D011-B42D-00C04FC964FF",
//!         "mood": 4,
//!         "auth_token": "secret"
//!     }))
//!     .unwrap();
//!
//! assert_eq!(resolved.owner.as_str(), "6f9619ff-8b86-d011-b42d-00c04fc964ff");
//! assert!(resolved.payload.get("auth_token").is_none());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ValidationError;

/// Fields consulted for the owner id, in order.
pub const OWNER_FIELDS: [&str; 3] = ["user_id", "userId", "owner_id"];

/// Values that look like ids but mean "nobody".
const SENTINELS: [&str; 4] = ["", "anonymous", "null", "undefined"];

/// Keys stripped before a payload is persisted (matched case-insensitively,
/// at any depth).
const UNSAFE_FIELDS: [&str; 11] = [
    "auth_token",
    "access_token",
    "refresh_token",
    "id_token",
    "token",
    "authorization",
    "session",
    "session_token",
    "session_data",
    "cookie",
    "password",
];

/// Validated, normalized owner identifier (lowercase hyphenated UUID).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    /// Validate a raw identifier. Only the 36-character hyphenated form is
    /// accepted; braced, `urn:uuid:` and bare 32-hex spellings are malformed.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if SENTINELS.iter().any(|s| trimmed.eq_ignore_ascii_case(s)) {
            return Err(ValidationError::SentinelOwner);
        }
        if !is_hyphenated(trimmed) {
            return Err(ValidationError::MalformedOwner);
        }
        let uuid = Uuid::parse_str(trimmed).map_err(|_| ValidationError::MalformedOwner)?;
        if uuid.is_nil() {
            return Err(ValidationError::SentinelOwner);
        }
        Ok(Self(uuid.hyphenated().to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OwnerId {
    type Error = ValidationError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<OwnerId> for String {
    fn from(owner: OwnerId) -> Self {
        owner.0
    }
}

fn is_hyphenated(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() == 36
        && bytes.iter().enumerate().all(|(i, b)| match i {
            8 | 13 | 18 | 23 => *b == b'-',
            _ => b.is_ascii_hexdigit(),
        })
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Owner plus the payload as it will be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPayload {
    pub owner: OwnerId,
    pub payload: Value,
}

#[derive(Debug, Clone, Default)]
pub struct IdentityResolver;

impl IdentityResolver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Extract and validate the owner id and strip transport-unsafe fields.
    pub fn resolve(&self, payload: &Value) -> Result<ResolvedPayload, ValidationError> {
        let object = payload.as_object().ok_or(ValidationError::PayloadNotObject)?;

        let raw = OWNER_FIELDS
            .iter()
            .find_map(|field| object.get(*field))
            .ok_or(ValidationError::MissingOwner)?;

        let owner = match raw {
            Value::String(s) => OwnerId::parse(s)?,
            Value::Null => return Err(ValidationError::SentinelOwner),
            _ => return Err(ValidationError::MalformedOwner),
        };

        Ok(ResolvedPayload {
            owner,
            payload: Value::Object(sanitize(object)),
        })
    }
}

fn is_unsafe(key: &str) -> bool {
    UNSAFE_FIELDS.iter().any(|f| key.eq_ignore_ascii_case(f))
}

fn sanitize(object: &Map<String, Value>) -> Map<String, Value> {
    object
        .iter()
        .filter(|(key, _)| !is_unsafe(key))
        .map(|(key, value)| (key.clone(), sanitize_value(value)))
        .collect()
}

fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(sanitize(map)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        other => other.clone(),
    }
}
