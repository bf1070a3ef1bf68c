use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{classify_error_code, ResponseError};

/// `error` value the backend uses for an invalidated session.
pub const LOGGED_OUT_ERROR_CODE: i64 = 1357001;

/// Identifier as the backend sends it: sometimes a JSON number, sometimes a
/// string. Zero and the empty string both mean "absent".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireId {
    Number(i64),
    Text(String),
}

impl WireId {
    pub fn to_id(&self) -> Option<String> {
        match self {
            WireId::Number(0) => None,
            WireId::Number(value) => Some(value.to_string()),
            WireId::Text(value) if value.is_empty() || value == "0" => None,
            WireId::Text(value) => Some(value.clone()),
        }
    }
}

/// Resolve an optional wire identifier, treating zero/empty as missing.
pub fn wire_id(value: &Option<WireId>) -> Option<String> {
    value.as_ref().and_then(WireId::to_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// `lb`: shard assignment with sticky routing.
    LoadBalance,
    Refresh,
    FullReload,
    Continue,
    /// Any tag this client does not know; handled as a generic success.
    Other,
}

impl ResponseKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "lb" => ResponseKind::LoadBalance,
            "refresh" => ResponseKind::Refresh,
            "fullReload" => ResponseKind::FullReload,
            "continue" => ResponseKind::Continue,
            _ => ResponseKind::Other,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    pub sticky: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pool: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadKey {
    #[serde(rename = "threadFbId", default)]
    pub thread_fb_id: Option<WireId>,
    #[serde(rename = "otherUserFbId", default)]
    pub other_user_fb_id: Option<WireId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(rename = "actorFbId", default)]
    pub actor_fb_id: Option<WireId>,
    #[serde(rename = "threadKey", default, deserialize_with = "null_as_default")]
    pub thread_key: ThreadKey,
    #[serde(rename = "messageId", default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<WireId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, deserialize_with = "null_as_default")]
    pub class: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(rename = "messageMetadata", default, deserialize_with = "null_as_default")]
    pub message_metadata: MessageMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullAction {
    #[serde(default)]
    pub thread_fbid: Option<WireId>,
    #[serde(default)]
    pub author: Option<WireId>,
    #[serde(default)]
    pub message_id: Option<String>,
}

/// One entry of the `ms` array. A union of every shape the backend sends; only
/// the fields relevant to `type`/`class`/`event` are populated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullEntry {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default)]
    pub from: Option<WireId>,
    #[serde(default)]
    pub to: Option<WireId>,
    #[serde(default)]
    pub reader: Option<WireId>,
    #[serde(default)]
    pub delta: Option<Delta>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub actions: Option<Vec<PullAction>>,
    #[serde(default)]
    pub thread_fbid: Option<WireId>,
    #[serde(default)]
    pub realtime_viewer_fbid: Option<WireId>,
    #[serde(default)]
    pub reason: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResponse {
    #[serde(rename = "t", default, deserialize_with = "lenient")]
    pub tag: String,
    #[serde(default, deserialize_with = "lenient")]
    pub lb_info: Option<LbInfo>,
    #[serde(default, deserialize_with = "lenient_integer")]
    pub seq: Option<i64>,
    /// Entries that decoded; the rest are dropped one by one.
    #[serde(rename = "ms", default, deserialize_with = "decodable_entries")]
    pub entries: Option<Vec<PullEntry>>,
    #[serde(default, deserialize_with = "lenient_integer")]
    pub reason: Option<i64>,
    #[serde(default, deserialize_with = "lenient_integer")]
    pub error: Option<i64>,
}

impl PullResponse {
    pub fn kind(&self) -> ResponseKind {
        ResponseKind::from_tag(&self.tag)
    }

    pub fn entries(&self) -> &[PullEntry] {
        self.entries.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StatusEnvelope {
    #[serde(default, deserialize_with = "lenient_integer")]
    error: Option<i64>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Any value that does not fit `T` becomes `T::default()`.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Integer sent as a JSON number or as a decimal string.
fn lenient_integer<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    })
}

fn decodable_entries<'de, D>(deserializer: D) -> Result<Option<Vec<PullEntry>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match Value::deserialize(deserializer)? {
        Value::Array(raw) => raw,
        Value::Null => return Ok(None),
        other => {
            debug!(found = %other, "chat: ignoring non-array ms field");
            return Ok(None);
        }
    };
    let entries = raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<PullEntry>(value) {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!(index, error = %err, "chat: skipping undecodable entry");
                None
            }
        })
        .collect();
    Ok(Some(entries))
}

/// Decode a backend body, skipping any anti-hijacking prefix before the first
/// `{`.
pub fn parse_payload<T: DeserializeOwned>(body: &[u8]) -> Result<T, ResponseError> {
    let start = body
        .iter()
        .position(|byte| *byte == b'{')
        .ok_or(ResponseError::MissingPayload)?;
    Ok(serde_json::from_slice(&body[start..])?)
}

pub fn parse_pull_response(body: &[u8]) -> Result<PullResponse, ResponseError> {
    let response: PullResponse = parse_payload(body)?;
    classify_error_code(response.error.unwrap_or_default())?;
    Ok(response)
}

/// For endpoints whose only meaningful content is the error code.
pub fn parse_status_response(body: &[u8]) -> Result<(), ResponseError> {
    let envelope: StatusEnvelope = parse_payload(body)?;
    classify_error_code(envelope.error.unwrap_or_default())
}
