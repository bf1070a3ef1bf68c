use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use client_core::{ChatEndpoints, Cookie, ListenSettings};
use serde::Deserialize;

pub const SETTINGS_FILE: &str = "listener.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub cookie_file: PathBuf,
    pub fb_dtsg: String,
    pub revision: String,
    pub base_url: Option<String>,
    pub poll_timeout_seconds: u64,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cookie_file: PathBuf::from("cookies.toml"),
            fb_dtsg: String::new(),
            revision: String::new(),
            base_url: None,
            poll_timeout_seconds: 70,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    pub fn endpoints(&self) -> ChatEndpoints {
        match &self.base_url {
            Some(base_url) => ChatEndpoints::with_base_url(base_url),
            None => ChatEndpoints::default(),
        }
    }

    pub fn listen_settings(&self) -> ListenSettings {
        ListenSettings {
            poll_timeout: Duration::from_secs(self.poll_timeout_seconds),
            ..ListenSettings::default()
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();
    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) else {
        return;
    };
    if let Some(v) = file_cfg.get("cookie_file") {
        settings.cookie_file = PathBuf::from(v);
    }
    if let Some(v) = file_cfg.get("fb_dtsg") {
        settings.fb_dtsg = v.clone();
    }
    if let Some(v) = file_cfg.get("revision") {
        settings.revision = v.clone();
    }
    if let Some(v) = file_cfg.get("base_url") {
        settings.base_url = Some(v.clone());
    }
    if let Some(v) = file_cfg.get("log_filter") {
        settings.log_filter = v.clone();
    }
    if let Some(parsed) = file_cfg
        .get("poll_timeout_seconds")
        .and_then(|v| v.parse::<u64>().ok())
    {
        settings.poll_timeout_seconds = parsed;
    }
}

fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("LISTENER_COOKIE_FILE") {
        settings.cookie_file = PathBuf::from(v);
    }
    if let Some(v) = lookup("APP__COOKIE_FILE") {
        settings.cookie_file = PathBuf::from(v);
    }

    if let Some(v) = lookup("APP__FB_DTSG") {
        settings.fb_dtsg = v;
    }
    if let Some(v) = lookup("APP__REVISION") {
        settings.revision = v;
    }
    if let Some(v) = lookup("APP__BASE_URL") {
        settings.base_url = Some(v);
    }

    if let Some(v) = lookup("APP__POLL_TIMEOUT_SECONDS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.poll_timeout_seconds = parsed;
        }
    }
}

#[derive(Debug, Deserialize)]
struct CookieFile {
    #[serde(default)]
    cookies: BTreeMap<String, String>,
}

/// Read a `[cookies]` table exported from a signed-in browser session.
pub fn load_cookies(path: &Path, domain: &str) -> anyhow::Result<Vec<Cookie>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read cookie file '{}'", path.display()))?;
    parse_cookies(&raw, domain)
        .with_context(|| format!("failed to parse cookie file '{}'", path.display()))
}

fn parse_cookies(raw: &str, domain: &str) -> anyhow::Result<Vec<Cookie>> {
    let file: CookieFile = toml::from_str(raw)?;
    Ok(file
        .cookies
        .into_iter()
        .map(|(name, value)| Cookie::secure(name, value, domain))
        .collect())
}
