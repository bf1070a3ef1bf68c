//! Scripted stand-in for the chat backend used by the unit tests.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    extract::{RawQuery, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tokio::{net::TcpListener, sync::Mutex};

use crate::{
    config::{ChatEndpoints, ListenSettings},
    credentials::{Cookie, MemoryCredentialStore},
    transport::ChatHttp,
};

/// Reply served by `/pull` once the script runs dry.
pub(crate) const IDLE_PULL_REPLY: &str = r#"for (;;); {"t":"heartbeat"}"#;
const IDLE_PULL_HOLD: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub(crate) struct Hit {
    pub route: &'static str,
    pub query: String,
    pub body: String,
    pub cookies: String,
}

#[derive(Default)]
struct BackendState {
    pull_replies: VecDeque<(StatusCode, String)>,
    failing_routes: Vec<&'static str>,
    set_cookie: Option<String>,
    hits: Vec<Hit>,
}

#[derive(Clone, Default)]
pub(crate) struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    pub async fn spawn() -> Result<(Self, String)> {
        std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let backend = MockBackend::default();
        let app = Router::new()
            .route("/pull", get(handle_pull))
            .route(
                "/reconnect",
                get(
                    |State(backend): State<MockBackend>,
                     RawQuery(query): RawQuery,
                     headers: HeaderMap| async move {
                        backend.plain("reconnect", query, String::new(), &headers).await
                    },
                ),
            )
            .route(
                "/sync",
                get(
                    |State(backend): State<MockBackend>,
                     RawQuery(query): RawQuery,
                     headers: HeaderMap| async move {
                        backend.plain("sync", query, String::new(), &headers).await
                    },
                ),
            )
            .route(
                "/thread_sync",
                post(
                    |State(backend): State<MockBackend>, headers: HeaderMap, body: String| async move {
                        backend.plain("thread_sync", None, body, &headers).await
                    },
                ),
            )
            .route(
                "/read_status",
                post(
                    |State(backend): State<MockBackend>, headers: HeaderMap, body: String| async move {
                        backend.plain("read_status", None, body, &headers).await
                    },
                ),
            )
            .with_state(backend.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok((backend, format!("http://{addr}")))
    }

    pub async fn push_pull(&self, body: &str) {
        self.push_pull_status(StatusCode::OK, body).await;
    }

    pub async fn push_pull_status(&self, status: StatusCode, body: &str) {
        self.state
            .lock()
            .await
            .pull_replies
            .push_back((status, body.to_string()));
    }

    /// Every later request to `route` answers 500.
    pub async fn fail_route(&self, route: &'static str) {
        self.state.lock().await.failing_routes.push(route);
    }

    pub async fn set_cookie_on_reconnect(&self, header: &str) {
        self.state.lock().await.set_cookie = Some(header.to_string());
    }

    pub async fn hits(&self, route: &str) -> Vec<Hit> {
        self.state
            .lock()
            .await
            .hits
            .iter()
            .filter(|hit| hit.route == route)
            .cloned()
            .collect()
    }

    pub async fn hit_count(&self, route: &str) -> usize {
        self.hits(route).await.len()
    }

    /// Route names in arrival order.
    pub async fn routes(&self) -> Vec<&'static str> {
        self.state
            .lock()
            .await
            .hits
            .iter()
            .map(|hit| hit.route)
            .collect()
    }

    async fn plain(
        &self,
        route: &'static str,
        query: Option<String>,
        body: String,
        headers: &HeaderMap,
    ) -> Response {
        let mut state = self.state.lock().await;
        state.record(route, query, body, headers);
        if state.failing_routes.contains(&route) {
            return (StatusCode::INTERNAL_SERVER_ERROR, "backend down").into_response();
        }

        let mut response = (StatusCode::OK, r#"for (;;); {"payload":{}}"#).into_response();
        if route == "reconnect" {
            if let Some(cookie) = state.set_cookie.as_deref() {
                if let Ok(value) = HeaderValue::from_str(cookie) {
                    response.headers_mut().insert(header::SET_COOKIE, value);
                }
            }
        }
        response
    }
}

impl BackendState {
    fn record(
        &mut self,
        route: &'static str,
        query: Option<String>,
        body: String,
        headers: &HeaderMap,
    ) {
        let cookies = headers
            .get(header::COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.hits.push(Hit {
            route,
            query: query.unwrap_or_default(),
            body,
            cookies,
        });
    }
}

async fn handle_pull(
    State(backend): State<MockBackend>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let scripted = {
        let mut state = backend.state.lock().await;
        state.record("pull", query, String::new(), &headers);
        if state.failing_routes.contains(&"pull") {
            return (StatusCode::INTERNAL_SERVER_ERROR, "backend down").into_response();
        }
        state.pull_replies.pop_front()
    };
    match scripted {
        Some((status, body)) => (status, body).into_response(),
        None => {
            tokio::time::sleep(IDLE_PULL_HOLD).await;
            (StatusCode::OK, IDLE_PULL_REPLY).into_response()
        }
    }
}

/// Short delays so loop tests finish quickly.
pub(crate) fn fast_settings() -> ListenSettings {
    ListenSettings {
        poll_timeout: Duration::from_secs(5),
        retry_delay: Duration::from_millis(10),
        poll_delay: Duration::from_millis(5),
        ..ListenSettings::default()
    }
}

pub(crate) fn logged_in_store(user_id: &str) -> Arc<MemoryCredentialStore> {
    Arc::new(MemoryCredentialStore::with_cookies([
        Cookie::new("c_user", user_id),
        Cookie::new("xs", "secret"),
    ]))
}

pub(crate) fn chat_http(base_url: &str, store: Arc<MemoryCredentialStore>) -> ChatHttp {
    ChatHttp::new(
        ChatEndpoints::with_base_url(base_url),
        &fast_settings(),
        store,
    )
    .expect("http client")
}
