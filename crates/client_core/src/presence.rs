//! Heartbeat payload and the substitution encoding the backend expects in the
//! `presence` cookie.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::domain::UserId;
use thiserror::Error;
use url::form_urlencoded;
use uuid::Uuid;

use crate::credentials::Cookie;

pub const PRESENCE_COOKIE: &str = "presence";
pub const PRESENCE_MARKER: char = 'E';
const HEARTBEAT_VERSION: u8 = 3;

/// Token/expansion pairs in encode order: `Z` down to `A`, then `_` for any
/// remaining `%`. Longer expansions come first because several are prefixes
/// of others. Decoding uses the same list, so the two directions cannot drift.
const SUBSTITUTIONS: [(char, &str); 27] = [
    ('Z', "%2c%22sb%22%3a1%2c%22t%22%3a%5b%5d%2c%22f%22%3anull%2c%22uct%22%3a0%2c%22s%22%3a0%2c%22blo%22%3a0%7d%2c%22bl%22%3a%7b%22ac%22%3a"),
    ('Y', "%2c%22pt%22%3a0%2c%22vis%22%3a1%2c%22bls%22%3a0%2c%22blc%22%3a0%2c%22snd%22%3a1%2c%22ct%22%3a"),
    ('X', "%2c%22ri%22%3a0%7d%2c%22state%22%3a%7b%22p%22%3a0%2c%22ut%22%3a1"),
    ('W', "%2c%22s%22%3a0%2c%22blo%22%3a0%7d%2c%22bl%22%3a%7b%22ac%22%3a"),
    ('V', "%2c%22blc%22%3a0%2c%22snd%22%3a0%2c%22ct%22%3a"),
    ('U', "%2c%22blc%22%3a0%2c%22snd%22%3a1%2c%22ct%22%3a"),
    ('T', "%2c%22blc%22%3a1%2c%22snd%22%3a1%2c%22ct%22%3a"),
    ('S', "%22%2c%22m%22%3a0%7d%2c%7b%22i%22%3a"),
    ('R', ".channel%22%2c%22sub%22%3a%5b1%5d"),
    ('Q', "%5d%2c%22f%22%3anull%2c%22uct%22%3a"),
    ('P', "%2c%22ud%22%3a100%2c%22lc%22%3a0"),
    ('O', "%2c%22sb%22%3a1%2c%22t%22%3a%5b"),
    ('N', ".channel%22%2c%22sub%22%3a%5b"),
    ('M', "%7b%22v%22%3a2%2c%22time%22%3a1"),
    ('L', "%2c%22ch%22%3a%7b%22h%22%3a%22"),
    ('K', "%2c%22pt%22%3a0%2c%22vis%22%3a"),
    ('J', "%22%3a%7b%22i%22%3a0%7d"),
    ('I', "%2c%22n%22%3a%22%"),
    ('H', "%2c%22bls%22%3a"),
    ('G', "%2c%22ut%22%3a1"),
    ('F', "%22%3a"),
    ('E', "%2c%22"),
    ('D', "%7b%22"),
    ('C', "%7d"),
    ('B', "000"),
    ('A', "%2"),
    ('_', "%"),
];

fn expansion(token: char) -> Option<&'static str> {
    SUBSTITUTIONS
        .iter()
        .find(|(candidate, _)| *candidate == token)
        .map(|(_, expansion)| *expansion)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PresenceError {
    #[error("presence value does not start with the 'E' marker")]
    MissingMarker,
}

/// The encoding lower-cases the escaped text, so decode reproduces the input
/// only when it has no uppercase letters. Heartbeats qualify: keys are
/// lowercase and values are numeric ids and timestamps.
pub struct PresenceCodec;

impl PresenceCodec {
    /// Encode an already serialized heartbeat.
    pub fn encode(serialized: &str) -> String {
        let escaped: String = form_urlencoded::byte_serialize(serialized.as_bytes()).collect();
        let mut encoded = escaped.to_lowercase().replace('_', "%5f");
        for (token, expansion) in SUBSTITUTIONS {
            encoded = encoded.replace(expansion, &token.to_string());
        }
        let mut output = String::with_capacity(encoded.len() + 1);
        output.push(PRESENCE_MARKER);
        output.push_str(&encoded);
        output
    }

    /// Inverse of [`PresenceCodec::encode`]. Characters without an expansion
    /// pass through unchanged.
    pub fn decode(encoded: &str) -> Result<String, PresenceError> {
        let body = encoded
            .strip_prefix(PRESENCE_MARKER)
            .ok_or(PresenceError::MissingMarker)?;
        let mut escaped = String::with_capacity(body.len() * 4);
        for ch in body.chars() {
            match expansion(ch) {
                Some(expansion) => escaped.push_str(expansion),
                None => escaped.push(ch),
            }
        }
        Ok(percent_unescape(&escaped))
    }

    pub fn encode_payload(payload: &HeartbeatPayload) -> Result<String, serde_json::Error> {
        Ok(Self::encode(&serde_json::to_string(payload)?))
    }
}

// The escaped form never contains a raw `&` or `=`; if one slips through it is
// put back between the decoded pieces.
fn percent_unescape(escaped: &str) -> String {
    form_urlencoded::parse(escaped.as_bytes())
        .map(|(key, value)| {
            if value.is_empty() {
                key.into_owned()
            } else {
                format!("{key}={value}")
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatState {
    #[serde(rename = "ut")]
    pub idle_flag: u8,
    #[serde(rename = "t2")]
    pub typing_threads: Vec<u64>,
    #[serde(rename = "lm2")]
    pub last_modified2: Option<i64>,
    #[serde(rename = "uct2")]
    pub uct_millis: i64,
    #[serde(rename = "tr")]
    pub typing_ref: Option<String>,
    #[serde(rename = "tw")]
    pub random_token: u32,
    #[serde(rename = "at")]
    pub at_millis: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(rename = "v")]
    pub version: u8,
    #[serde(rename = "time")]
    pub timestamp_seconds: i64,
    pub user: String,
    pub state: HeartbeatState,
    #[serde(rename = "ch")]
    pub channels: BTreeMap<String, u8>,
}

impl HeartbeatPayload {
    pub fn new(user_id: &UserId, now: DateTime<Utc>) -> Self {
        let millis = now.timestamp_millis();
        Self {
            version: HEARTBEAT_VERSION,
            timestamp_seconds: now.timestamp(),
            user: user_id.0.clone(),
            state: HeartbeatState {
                idle_flag: 0,
                typing_threads: Vec::new(),
                last_modified2: None,
                uct_millis: millis,
                typing_ref: None,
                random_token: random_u32(),
                at_millis: millis,
            },
            channels: BTreeMap::from([(format!("p_{}", user_id.0), 0)]),
        }
    }
}

fn random_u32() -> u32 {
    let bytes = Uuid::new_v4().into_bytes();
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Fresh `presence` cookie for `user_id`.
pub fn heartbeat_cookie(
    user_id: &UserId,
    domain: &str,
    now: DateTime<Utc>,
) -> Result<Cookie, serde_json::Error> {
    let value = PresenceCodec::encode_payload(&HeartbeatPayload::new(user_id, now))?;
    Ok(Cookie::secure(PRESENCE_COOKIE, value, domain))
}

#[derive(Debug, Serialize)]
struct AccessibilityFlags {
    sr: u8,
    #[serde(rename = "sr-ts")]
    sr_ts: i64,
    jk: u8,
    #[serde(rename = "jk-ts")]
    jk_ts: i64,
    kb: u8,
    #[serde(rename = "kb-ts")]
    kb_ts: i64,
    hcm: u8,
    #[serde(rename = "hcm-ts")]
    hcm_ts: i64,
}

/// Value of the `a11y` cookie: every assistive feature off, stamped `now`.
pub fn accessibility_cookie_value(now: DateTime<Utc>) -> Result<String, serde_json::Error> {
    let millis = now.timestamp_millis();
    let flags = AccessibilityFlags {
        sr: 0,
        sr_ts: millis,
        jk: 0,
        jk_ts: millis,
        kb: 0,
        kb_ts: millis,
        hcm: 0,
        hcm_ts: millis,
    };
    let json = serde_json::to_string(&flags)?;
    Ok(form_urlencoded::byte_serialize(json.as_bytes()).collect())
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
