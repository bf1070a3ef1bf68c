use std::sync::Arc;

use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    redirect, Client, RequestBuilder,
};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::debug;
use url::form_urlencoded;

use crate::{
    config::{ChatEndpoints, ListenSettings},
    credentials::{parse_set_cookie, CookieUpdate, CredentialStore},
    error::ChatError,
    signer::FormParams,
};

const DEBUG_BODY_LIMIT: usize = 10_000;

pub fn encode_params<K: AsRef<str>, V: AsRef<str>>(params: &[(K, V)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter().map(|(key, value)| (key.as_ref(), value.as_ref())))
        .finish()
}

/// HTTP plumbing shared by the connect flow, the listen loop and the reload
/// calls. Cookies come from the credential store, not from reqwest.
#[derive(Clone)]
pub struct ChatHttp {
    client: Client,
    endpoints: Arc<ChatEndpoints>,
    credentials: Arc<dyn CredentialStore>,
    request_gate: Arc<RwLock<()>>,
}

impl ChatHttp {
    pub fn new(
        endpoints: ChatEndpoints,
        settings: &ListenSettings,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, ChatError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, header_value(&endpoints.user_agent)?);
        headers.insert(header::ORIGIN, header_value(&endpoints.origin)?);
        headers.insert(header::REFERER, header_value(&endpoints.referer)?);

        let client = Client::builder()
            .default_headers(headers)
            .redirect(redirect::Policy::none())
            .timeout(settings.poll_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoints: Arc::new(endpoints),
            credentials,
            request_gate: Arc::new(RwLock::new(())),
        })
    }

    pub fn endpoints(&self) -> &ChatEndpoints {
        &self.endpoints
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Hold off every request issued through this client while the guard
    /// lives. [`crate::ChatSession::import_cookies`] takes it so a poll never
    /// sees half of an imported jar.
    pub async fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.request_gate.write().await
    }

    pub async fn get(&self, url: &str, query: &FormParams) -> Result<Vec<u8>, ChatError> {
        let url = if query.is_empty() {
            url.to_string()
        } else {
            format!("{url}?{}", encode_params(query))
        };
        self.execute("GET", self.client.get(&url), &url).await
    }

    pub async fn post_form(&self, url: &str, form: &FormParams) -> Result<Vec<u8>, ChatError> {
        let request = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(encode_params(form));
        self.execute("POST", request, url).await
    }

    async fn execute(
        &self,
        method: &'static str,
        request: RequestBuilder,
        url: &str,
    ) -> Result<Vec<u8>, ChatError> {
        let _gate = self.request_gate.read().await;
        let request = match self.credentials.cookie_header().await {
            Some(cookies) => request.header(header::COOKIE, cookies),
            None => request,
        };

        debug!(method, url, "chat: performing request");
        let response = request.send().await?;
        let status = response.status();
        debug!(method, url, status = status.as_u16(), "chat: response received");

        self.store_response_cookies(response.headers()).await;
        let body = response.error_for_status()?.bytes().await?;
        if body.len() > DEBUG_BODY_LIMIT {
            debug!(size = body.len(), "chat: response body");
        } else {
            debug!(body = %String::from_utf8_lossy(&body), "chat: response body");
        }
        Ok(body.to_vec())
    }

    async fn store_response_cookies(&self, headers: &HeaderMap) {
        let mut updated = Vec::new();
        for value in headers.get_all(header::SET_COOKIE) {
            let Ok(raw) = value.to_str() else {
                continue;
            };
            match parse_set_cookie(raw) {
                Some(CookieUpdate::Set(cookie)) => updated.push(cookie),
                Some(CookieUpdate::Expire(name)) => self.credentials.remove_cookie(&name).await,
                None => {}
            }
        }
        if !updated.is_empty() {
            self.credentials.set_cookies(updated).await;
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue, ChatError> {
    HeaderValue::from_str(value)
        .map_err(|err| ChatError::Protocol(format!("invalid header value '{value}': {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_encode_in_insertion_order() {
        let params = vec![
            ("folders[0]".to_string(), "inbox".to_string()),
            ("client".to_string(), "mercury".to_string()),
        ];
        assert_eq!(encode_params(&params), "folders%5B0%5D=inbox&client=mercury");
    }

    #[tokio::test]
    async fn exclusive_guard_holds_back_requests() {
        use std::time::Duration;

        use crate::mock_backend::{chat_http, logged_in_store, MockBackend};

        let (backend, base_url) = MockBackend::spawn().await.expect("spawn backend");
        let http = chat_http(&base_url, logged_in_store("111"));

        let guard = http.exclusive().await;
        let pending = tokio::spawn({
            let http = http.clone();
            async move {
                let url = http.endpoints().reconnect_url.clone();
                http.get(&url, &Vec::new()).await
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.hit_count("reconnect").await, 0);

        drop(guard);
        pending.await.expect("join").expect("request");
        let hits = backend.hits("reconnect").await;
        assert_eq!(hits.len(), 1);
        assert!(hits[0].cookies.contains("c_user=111"));
    }
}
