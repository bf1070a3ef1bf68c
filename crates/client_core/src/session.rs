use std::sync::Arc;

use shared::{
    domain::{Thread, UserId},
    protocol::parse_status_response,
};
use tokio::sync::broadcast;
use tracing::{info, Instrument, Span};

use crate::{
    config::{ChatEndpoints, ListenSettings},
    connect::{ConnectFlow, Connection},
    credentials::{Cookie, CredentialStore},
    error::ChatError,
    listen::{ListenLoop, ListenerHandle},
    signer::RequestSigner,
    transport::ChatHttp,
    ClientEvent,
};

/// Entry point for one authenticated chat account.
///
/// `connect` runs the handshake; `listen` hands the resulting channel to a
/// background poll loop. Events from that loop arrive on every receiver
/// obtained through `subscribe_events`.
pub struct ChatSession {
    http: ChatHttp,
    signer: Arc<dyn RequestSigner>,
    settings: ListenSettings,
    events: broadcast::Sender<ClientEvent>,
    span: Span,
    user_id: Option<UserId>,
    connection: Option<Connection>,
}

impl ChatSession {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        signer: Arc<dyn RequestSigner>,
    ) -> Result<Self, ChatError> {
        Self::with_config(
            ChatEndpoints::default(),
            ListenSettings::default(),
            credentials,
            signer,
        )
    }

    pub fn with_config(
        endpoints: ChatEndpoints,
        settings: ListenSettings,
        credentials: Arc<dyn CredentialStore>,
        signer: Arc<dyn RequestSigner>,
    ) -> Result<Self, ChatError> {
        let http = ChatHttp::new(endpoints, &settings, credentials)?;
        let (events, _) = broadcast::channel(settings.event_capacity);
        Ok(Self {
            http,
            signer,
            settings,
            events,
            span: Span::none(),
            user_id: None,
            connection: None,
        })
    }

    /// Attach the span every request and the listener task run under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn http(&self) -> &ChatHttp {
        &self.http
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    /// True between a successful `connect` and the following `listen`.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Write a batch of cookies into the store while no request is in
    /// flight. Usable before `connect` and while a listener runs.
    pub async fn import_cookies(&self, cookies: Vec<Cookie>) {
        let count = cookies.len();
        let _gate = self.http.exclusive().await;
        self.http.credentials().set_cookies(cookies).await;
        info!(count, "chat: imported cookies");
    }

    pub async fn connect(&mut self) -> Result<(), ChatError> {
        let connection = ConnectFlow::new(&self.http, self.signer.as_ref(), &self.settings)
            .run()
            .instrument(self.span.clone())
            .await?;
        self.user_id = Some(connection.identity.user_id.clone());
        self.connection = Some(connection);
        Ok(())
    }

    /// Start the background listener. Consumes the connected channel, so a
    /// second call needs a fresh `connect`.
    pub fn listen(&mut self) -> Result<ListenerHandle, ChatError> {
        let connection = self
            .connection
            .take()
            .ok_or(ChatError::NotConnected("listen"))?;
        let listener = ListenLoop::new(
            self.http.clone(),
            Arc::clone(&self.signer),
            self.settings.clone(),
            connection,
            self.events.clone(),
        );
        Ok(listener.spawn(self.span.clone()))
    }

    pub async fn mark_as_read(&self, thread: &Thread) -> Result<(), ChatError> {
        let user_id = self
            .user_id
            .as_ref()
            .ok_or(ChatError::NotConnected("mark_as_read"))?;
        let mut form = vec![(format!("ids[{}]", thread.thread_id), "true".to_string())];
        self.signer.sign(user_id, &mut form);

        let body = self
            .http
            .post_form(&self.http.endpoints().read_status_url, &form)
            .instrument(self.span.clone())
            .await?;
        parse_status_response(&body)?;
        info!(thread_id = %thread.thread_id, "chat: marked thread as read");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
