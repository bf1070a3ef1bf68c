use chrono::{DateTime, Utc};
use shared::{domain::UserId, protocol::LbInfo};
use tracing::warn;
use uuid::Uuid;

use crate::{signer::FormParams, transport::encode_params};

const PARTITION: i32 = -2;
const CAPABILITIES: u32 = 8;
const STATE_ACTIVE: &str = "active";

/// 8 lowercase hex characters, fresh for every handshake.
pub fn generate_client_id() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    bytes[..4].iter().map(|byte| format!("{byte:02x}")).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub client_id: String,
}

impl Identity {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            client_id: generate_client_id(),
        }
    }

    pub fn channel(&self) -> String {
        format!("p_{}", self.user_id.0)
    }
}

/// Shard affinity handed out by the backend. Both halves are always present,
/// so a poll can never carry one without the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickyRoute {
    pool: String,
    token: String,
}

impl StickyRoute {
    pub fn new(pool: impl Into<String>, token: impl Into<String>) -> Option<Self> {
        let pool = pool.into();
        let token = token.into();
        if pool.is_empty() || token.is_empty() {
            return None;
        }
        Some(Self { pool, token })
    }

    pub fn from_lb_info(info: &LbInfo) -> Option<Self> {
        Self::new(info.pool.clone(), info.sticky.clone())
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Per-connection polling state. Owned by exactly one task at a time: the
/// connect flow while handshaking, then the listen loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelState {
    sequence: i64,
    sticky: Option<StickyRoute>,
    messages_received: u64,
    idle_seconds: i64,
    last_activity: DateTime<Utc>,
    last_sync: DateTime<Utc>,
}

impl ChannelState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            sequence: 0,
            sticky: None,
            messages_received: 0,
            idle_seconds: 0,
            last_activity: now,
            last_sync: now,
        }
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    pub fn sticky(&self) -> Option<&StickyRoute> {
        self.sticky.as_ref()
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    pub fn idle_seconds(&self) -> i64 {
        self.idle_seconds
    }

    pub fn last_sync(&self) -> DateTime<Utc> {
        self.last_sync
    }

    /// Move the cursor forward. A lower value is ignored so the cursor never
    /// regresses within one connection; returns whether it moved.
    pub fn advance_sequence(&mut self, seq: i64) -> bool {
        if seq < self.sequence {
            warn!(
                current = self.sequence,
                received = seq,
                "chat: ignoring sequence regression"
            );
            return false;
        }
        let moved = seq != self.sequence;
        self.sequence = seq;
        moved
    }

    pub fn set_sticky(&mut self, route: StickyRoute) {
        self.sticky = Some(route);
    }

    /// Count a payload's entries; a non-empty payload resets the idle clock.
    pub fn record_entries(&mut self, count: usize, now: DateTime<Utc>) {
        self.messages_received += count as u64;
        if count > 0 {
            self.last_activity = now;
        }
    }

    pub fn refresh_idle(&mut self, now: DateTime<Utc>) {
        self.idle_seconds = (now - self.last_activity).num_seconds().max(0);
    }

    pub fn mark_synced(&mut self, now: DateTime<Utc>) {
        self.last_sync = now;
    }
}

/// Query of one poll request, rebuilt from channel state before every send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullForm {
    channel: String,
    seq: i64,
    client_id: String,
    user_id: String,
    idle: i64,
    messages_received: u64,
    sticky: Option<StickyRoute>,
}

impl PullForm {
    pub fn build(state: &ChannelState, identity: &Identity) -> Self {
        Self {
            channel: identity.channel(),
            seq: state.sequence,
            client_id: identity.client_id.clone(),
            user_id: identity.user_id.0.clone(),
            idle: state.idle_seconds,
            messages_received: state.messages_received,
            sticky: state.sticky.clone(),
        }
    }

    pub fn params(&self) -> FormParams {
        let mut params: FormParams = vec![
            ("channel".into(), self.channel.clone()),
            ("seq".into(), self.seq.to_string()),
            ("partition".into(), PARTITION.to_string()),
            ("clientid".into(), self.client_id.clone()),
            ("viewer_uid".into(), self.user_id.clone()),
            ("uid".into(), self.user_id.clone()),
            ("state".into(), STATE_ACTIVE.into()),
            ("idle".into(), self.idle.to_string()),
            ("cap".into(), CAPABILITIES.to_string()),
            ("msgs_recv".into(), self.messages_received.to_string()),
        ];
        if let Some(route) = &self.sticky {
            params.push(("sticky_token".into(), route.token.clone()));
            params.push(("sticky_pool".into(), route.pool.clone()));
        }
        params
    }

    pub fn encode(&self) -> String {
        encode_params(&self.params())
    }
}

#[cfg(test)]
#[path = "tests/pull_form_tests.rs"]
mod tests;
