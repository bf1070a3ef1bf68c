use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_11_2) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/51.0.2704.103 Safari/537.36";

/// Where the backend lives and how requests present themselves to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEndpoints {
    pub pull_url: String,
    pub reconnect_url: String,
    pub thread_sync_url: String,
    pub notification_sync_url: String,
    pub read_status_url: String,
    pub cookie_domain: String,
    pub origin: String,
    pub referer: String,
    pub user_agent: String,
}

impl Default for ChatEndpoints {
    fn default() -> Self {
        Self {
            pull_url: "https://0-edge-chat.facebook.com/pull".into(),
            reconnect_url: "https://www.facebook.com/ajax/presence/reconnect.php".into(),
            thread_sync_url: "https://www.facebook.com/ajax/mercury/thread_sync.php".into(),
            notification_sync_url: "https://www.facebook.com/notifications/sync/".into(),
            read_status_url: "https://www.facebook.com/ajax/mercury/change_read_status.php".into(),
            cookie_domain: ".facebook.com".into(),
            origin: "https://www.facebook.com".into(),
            referer: "https://www.facebook.com/".into(),
            user_agent: DEFAULT_USER_AGENT.into(),
        }
    }
}

impl ChatEndpoints {
    /// Route every endpoint through one base URL (a local mock or a proxy).
    pub fn with_base_url(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/');
        Self {
            pull_url: format!("{base_url}/pull"),
            reconnect_url: format!("{base_url}/reconnect"),
            thread_sync_url: format!("{base_url}/thread_sync"),
            notification_sync_url: format!("{base_url}/sync"),
            read_status_url: format!("{base_url}/read_status"),
            origin: base_url.to_string(),
            referer: format!("{base_url}/"),
            ..Self::default()
        }
    }
}

/// Timing and protocol constants for the connect flow and the listen loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenSettings {
    /// Per-request network timeout; matches the backend's long-poll hold time.
    pub poll_timeout: Duration,
    /// Pause after a transport or parse failure before polling again.
    pub retry_delay: Duration,
    /// Pause after a successful poll.
    pub poll_delay: Duration,
    /// `reason` that turns a `refresh` response into a logout.
    pub logged_out_reason: i64,
    /// How far back the reload thread sync reaches.
    pub reload_overlap: Duration,
    pub event_capacity: usize,
    /// Cookie holding the authenticated user ID.
    pub identity_cookie: String,
    pub locale: String,
}

impl Default for ListenSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(70),
            retry_delay: Duration::from_secs(1),
            poll_delay: Duration::from_secs(1),
            logged_out_reason: 110,
            reload_overlap: Duration::from_secs(60),
            event_capacity: 1024,
            identity_cookie: "c_user".into(),
            locale: "en_US".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_rewrites_every_endpoint() {
        let endpoints = ChatEndpoints::with_base_url("http://127.0.0.1:9000/");
        assert_eq!(endpoints.pull_url, "http://127.0.0.1:9000/pull");
        assert_eq!(endpoints.thread_sync_url, "http://127.0.0.1:9000/thread_sync");
        assert_eq!(endpoints.notification_sync_url, "http://127.0.0.1:9000/sync");
        assert_eq!(endpoints.cookie_domain, ".facebook.com");
    }

    #[test]
    fn poll_timeout_matches_long_poll_hold() {
        assert_eq!(ListenSettings::default().poll_timeout, Duration::from_secs(70));
    }
}
