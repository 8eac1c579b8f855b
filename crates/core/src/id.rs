// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Profile id generation and the object-key id format.
//!
//! Object-storage ids look like
//! `<inverted-unix-seconds>:<base64url(app_name)>:<uuid-v1>`. Every decimal
//! digit `d` of the seconds is replaced with `9 - d`, so an ascending key
//! listing returns the newest profiles first. The v1 uuid carries the
//! authoritative timestamp; the leading component only drives sort order.

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Separator between the three id components.
pub const ID_SEPARATOR: char = ':';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("id has {0} parts, expected 3")]
    PartCount(usize),
    #[error("inverted timestamp contains a non-digit: {0:?}")]
    NotDigits(String),
    #[error("app name is not valid base64url: {0}")]
    AppName(String),
    #[error("invalid uuid: {0}")]
    Uuid(String),
    #[error("uuid {0} is not time-based (v1)")]
    NotTimeBased(String),
}

/// A parsed object-storage id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedId {
    pub app_name: String,
    pub uuid: Uuid,
}

impl ParsedId {
    /// Timestamp embedded in the v1 uuid.
    pub fn timestamp(&self) -> OffsetDateTime {
        uuid_timestamp(&self.uuid).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

/// Source of time-based uuids. The node id is random per generator.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    node_id: [u8; 6],
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        let mut node_id: [u8; 6] = rand::random();
        // Multicast bit marks a random node id rather than a MAC address.
        node_id[0] |= 0x01;
        Self { node_id }
    }

    pub fn next_uuid(&self) -> Uuid {
        Uuid::now_v1(&self.node_id)
    }
}

/// Replaces every digit `d` with `9 - d`.
///
/// # Errors
///
/// Returns [`IdError::NotDigits`] if `digits` contains anything other than
/// ASCII digits.
pub fn invert_digits(digits: &str) -> Result<String, IdError> {
    digits
        .chars()
        .map(|c| match c.to_digit(10) {
            Some(d) => char::from_digit(9 - d, 10).ok_or_else(|| IdError::NotDigits(digits.into())),
            None => Err(IdError::NotDigits(digits.to_string())),
        })
        .collect()
}

/// Builds an object-storage id from its parts.
pub fn format_id(unix_seconds: u64, app_name: &str, uuid: &Uuid) -> String {
    // Decimal rendering of a u64 is always digits.
    let inverted = invert_digits(&unix_seconds.to_string()).unwrap_or_default();
    let app = URL_SAFE.encode(app_name.as_bytes());
    format!("{inverted}{ID_SEPARATOR}{app}{ID_SEPARATOR}{uuid}")
}

/// Generates a fresh object-storage id for `app_name`.
pub fn new_object_id(generator: &IdGenerator, app_name: &str) -> String {
    let uuid = generator.next_uuid();
    let seconds = uuid.get_timestamp().map_or(0, |ts| ts.to_unix().0);
    format_id(seconds, app_name, &uuid)
}

/// Parses an object-storage id.
///
/// # Errors
///
/// Returns an [`IdError`] describing the first component that fails to
/// parse.
pub fn parse_id(id: &str) -> Result<ParsedId, IdError> {
    let parts: Vec<&str> = id.split(ID_SEPARATOR).collect();
    let [inverted, app, uuid] = parts.as_slice() else {
        return Err(IdError::PartCount(parts.len()));
    };
    if inverted.is_empty() || !inverted.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IdError::NotDigits((*inverted).to_string()));
    }
    let app_bytes = URL_SAFE.decode(app).map_err(|e| IdError::AppName(e.to_string()))?;
    let app_name = String::from_utf8(app_bytes).map_err(|e| IdError::AppName(e.to_string()))?;
    let uuid = Uuid::parse_str(uuid).map_err(|e| IdError::Uuid(e.to_string()))?;
    if uuid.get_timestamp().is_none() {
        return Err(IdError::NotTimeBased(uuid.to_string()));
    }
    Ok(ParsedId { app_name, uuid })
}

/// Timestamp carried by a time-based uuid, if it has one.
pub fn uuid_timestamp(uuid: &Uuid) -> Option<OffsetDateTime> {
    let (seconds, nanos) = uuid.get_timestamp()?.to_unix();
    let seconds = i64::try_from(seconds).ok()?;
    let base = OffsetDateTime::from_unix_timestamp(seconds).ok()?;
    Some(base + time::Duration::nanoseconds(i64::from(nanos)))
}
