use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub secure: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: String::new(),
            secure: false,
        }
    }

    pub fn secure(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            secure: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieUpdate {
    Set(Cookie),
    Expire(String),
}

/// Interpret one `Set-Cookie` header. Only the attributes the store keeps are
/// read; an explicit `Max-Age=0` or the value `deleted` expires the cookie.
pub fn parse_set_cookie(header: &str) -> Option<CookieUpdate> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"');

    let mut cookie = Cookie::new(name, value);
    let mut expired = value == "deleted";
    for attribute in parts {
        let (key, attr_value) = attribute
            .split_once('=')
            .map(|(key, attr_value)| (key.trim(), attr_value.trim()))
            .unwrap_or((attribute.trim(), ""));
        if key.eq_ignore_ascii_case("domain") {
            cookie.domain = attr_value.to_string();
        } else if key.eq_ignore_ascii_case("secure") {
            cookie.secure = true;
        } else if key.eq_ignore_ascii_case("max-age") {
            expired |= attr_value.parse::<i64>().is_ok_and(|age| age <= 0);
        }
    }

    if expired {
        Some(CookieUpdate::Expire(cookie.name))
    } else {
        Some(CookieUpdate::Set(cookie))
    }
}

/// Cookie jar the session reads identity from and writes presence state into.
/// Reads and writes are mutually excluded so a request never observes a
/// half-applied update.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn cookie(&self, name: &str) -> Option<Cookie>;
    async fn set_cookies(&self, cookies: Vec<Cookie>);
    async fn remove_cookie(&self, name: &str);
    /// `Cookie` request header value, `None` when the jar is empty.
    async fn cookie_header(&self) -> Option<String>;
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    cookies: RwLock<BTreeMap<String, Cookie>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookies(cookies: impl IntoIterator<Item = Cookie>) -> Self {
        Self {
            cookies: RwLock::new(
                cookies
                    .into_iter()
                    .map(|cookie| (cookie.name.clone(), cookie))
                    .collect(),
            ),
        }
    }

    pub async fn snapshot(&self) -> Vec<Cookie> {
        self.cookies.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn cookie(&self, name: &str) -> Option<Cookie> {
        self.cookies.read().await.get(name).cloned()
    }

    async fn set_cookies(&self, cookies: Vec<Cookie>) {
        let mut guard = self.cookies.write().await;
        for cookie in cookies {
            guard.insert(cookie.name.clone(), cookie);
        }
    }

    async fn remove_cookie(&self, name: &str) {
        self.cookies.write().await.remove(name);
    }

    async fn cookie_header(&self) -> Option<String> {
        let guard = self.cookies.read().await;
        if guard.is_empty() {
            return None;
        }
        Some(
            guard
                .values()
                .map(|cookie| format!("{}={}", cookie.name, cookie.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
