use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use shared::protocol::{parse_pull_response, PullResponse, ResponseKind};
use tokio::{
    sync::{broadcast, watch, Notify},
    task::{JoinError, JoinHandle},
};
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::{
    config::ListenSettings,
    connect::Connection,
    dispatch::Dispatcher,
    error::{ChatError, ErrorKind, ListenError},
    presence::heartbeat_cookie,
    pull_form::{ChannelState, Identity, PullForm, StickyRoute},
    reload::FullReload,
    signer::RequestSigner,
    transport::ChatHttp,
    ClientEvent, TerminationReason,
};

pub const OP_HTTP_LISTEN: &str = "HTTP listen";
pub const OP_PARSE_LISTEN: &str = "parse listen";
pub const OP_LISTEN_RESPONSE: &str = "listen response";
pub const OP_HEARTBEAT: &str = "heartbeat";

/// What a single poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Dispatched { events: usize },
    Reloaded,
    Failed,
    LoggedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerStatus {
    Running,
    Stopped(TerminationReason),
}

impl ListenerStatus {
    fn stopped(&self) -> Option<TerminationReason> {
        match self {
            ListenerStatus::Running => None,
            ListenerStatus::Stopped(reason) => Some(*reason),
        }
    }
}

#[derive(Default)]
struct StopSignal {
    requested: AtomicBool,
    wake: Notify,
}

impl StopSignal {
    fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Sleep that ends early on a stop request. Requests are never cut short.
    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.wake.notified() => {}
        }
    }
}

/// The perpetual poll driver. Owns the channel state for the lifetime of the
/// listener; nothing else can write it.
pub struct ListenLoop {
    http: ChatHttp,
    signer: Arc<dyn RequestSigner>,
    settings: ListenSettings,
    identity: Identity,
    channel: ChannelState,
    dispatcher: Dispatcher,
    events: broadcast::Sender<ClientEvent>,
}

impl ListenLoop {
    pub fn new(
        http: ChatHttp,
        signer: Arc<dyn RequestSigner>,
        settings: ListenSettings,
        connection: Connection,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        let dispatcher = Dispatcher::new(connection.identity.user_id.clone(), events.clone());
        Self {
            http,
            signer,
            settings,
            identity: connection.identity,
            channel: connection.channel,
            dispatcher,
            events,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn channel(&self) -> &ChannelState {
        &self.channel
    }

    pub fn spawn(self, span: Span) -> ListenerHandle {
        let stop = Arc::new(StopSignal::default());
        let (status_tx, status_rx) = watch::channel(ListenerStatus::Running);
        let task = tokio::spawn(self.run(Arc::clone(&stop), status_tx).instrument(span));
        ListenerHandle {
            stop,
            status: status_rx,
            task,
        }
    }

    async fn run(
        mut self,
        stop: Arc<StopSignal>,
        status: watch::Sender<ListenerStatus>,
    ) -> ChannelState {
        info!(user_id = %self.identity.user_id, "chat: listener started");
        let reason = loop {
            if stop.is_requested() {
                break TerminationReason::Closed;
            }
            let pause = match self.poll_once().await {
                PollOutcome::LoggedOut => break TerminationReason::LoggedOut,
                PollOutcome::Failed => self.settings.retry_delay,
                PollOutcome::Reloaded => Duration::ZERO,
                PollOutcome::Dispatched { .. } => self.settings.poll_delay,
            };
            if !pause.is_zero() {
                stop.pause(pause).await;
            }
        };

        match reason {
            TerminationReason::LoggedOut => {
                error!(seq = self.channel.sequence(), "chat: logged out; listener stopped")
            }
            _ => info!(seq = self.channel.sequence(), ?reason, "chat: listener stopped"),
        }
        let _ = self.events.send(ClientEvent::Terminated(reason));
        status.send_replace(ListenerStatus::Stopped(reason));
        self.channel
    }

    /// One full iteration minus the trailing pause: heartbeat, poll, classify.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let now = Utc::now();
        self.channel.refresh_idle(now);
        self.refresh_heartbeat(now).await;

        let form = PullForm::build(&self.channel, &self.identity);
        debug!(
            seq = self.channel.sequence(),
            idle = self.channel.idle_seconds(),
            "chat: polling"
        );
        let body = match self
            .http
            .get(&self.http.endpoints().pull_url, &form.params())
            .await
        {
            Ok(body) => body,
            Err(err) => {
                self.report(OP_HTTP_LISTEN, &err);
                return PollOutcome::Failed;
            }
        };

        match parse_pull_response(&body).map_err(ChatError::from) {
            Ok(response) => self.apply(response).await,
            Err(ChatError::SessionInvalidated) => PollOutcome::LoggedOut,
            Err(err) => {
                let op = if err.kind() == ErrorKind::Server {
                    OP_LISTEN_RESPONSE
                } else {
                    OP_PARSE_LISTEN
                };
                self.report(op, &err);
                PollOutcome::Failed
            }
        }
    }

    async fn apply(&mut self, response: PullResponse) -> PollOutcome {
        match response.kind() {
            ResponseKind::Refresh
                if response.reason == Some(self.settings.logged_out_reason) =>
            {
                PollOutcome::LoggedOut
            }
            ResponseKind::FullReload => {
                if let Some(seq) = response.seq {
                    self.channel.advance_sequence(seq);
                }
                let report = FullReload::new(&self.http, self.signer.as_ref(), &self.settings)
                    .run(&self.identity.user_id, &mut self.channel)
                    .await;
                for (op, err) in report.failures() {
                    self.report(op, err);
                }
                PollOutcome::Reloaded
            }
            _ => {
                if let Some(route) = response.lb_info.as_ref().and_then(StickyRoute::from_lb_info)
                {
                    self.channel.set_sticky(route);
                }
                if let Some(seq) = response.seq {
                    self.channel.advance_sequence(seq);
                }
                self.channel
                    .record_entries(response.entries().len(), Utc::now());

                let events = self.dispatcher.dispatch(&response);
                debug!(
                    tag = %response.tag,
                    seq = self.channel.sequence(),
                    entries = response.entries().len(),
                    events,
                    "chat: poll dispatched"
                );
                PollOutcome::Dispatched { events }
            }
        }
    }

    async fn refresh_heartbeat(&self, now: DateTime<Utc>) {
        let domain = &self.http.endpoints().cookie_domain;
        match heartbeat_cookie(&self.identity.user_id, domain, now) {
            Ok(cookie) => self.http.credentials().set_cookies(vec![cookie]).await,
            Err(err) => self.report(OP_HEARTBEAT, &err.into()),
        }
    }

    fn report(&self, op: &'static str, err: &ChatError) {
        warn!(op, kind = ?err.kind(), error = %err, "chat: listen error");
        let _ = self.events.send(ClientEvent::Error(ListenError::new(op, err)));
    }
}

/// Control over a spawned [`ListenLoop`].
pub struct ListenerHandle {
    stop: Arc<StopSignal>,
    status: watch::Receiver<ListenerStatus>,
    task: JoinHandle<ChannelState>,
}

impl ListenerHandle {
    pub fn is_running(&self) -> bool {
        self.status.borrow().stopped().is_none()
    }

    /// Ask the loop to stop and wait until it has. Safe to call repeatedly
    /// and after the loop has already ended; an in-flight poll completes first.
    pub async fn close(&self) -> TerminationReason {
        self.stop.request();
        self.wait().await
    }

    /// Block until the loop ends on its own or through [`ListenerHandle::close`].
    pub async fn wait(&self) -> TerminationReason {
        let mut status = self.status.clone();
        let result = status
            .wait_for(|status| status.stopped().is_some())
            .await
            .ok()
            .and_then(|status| status.stopped());
        result.unwrap_or(TerminationReason::Aborted)
    }

    /// Final channel state once the loop has ended.
    pub async fn join(self) -> Result<ChannelState, JoinError> {
        self.task.await
    }
}

#[cfg(test)]
#[path = "tests/listen_tests.rs"]
mod tests;
