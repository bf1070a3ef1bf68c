use chrono::Utc;
use shared::{
    domain::UserId,
    protocol::{parse_pull_response, ResponseKind},
};
use tracing::{info, warn};

use crate::{
    config::ListenSettings,
    credentials::Cookie,
    error::ChatError,
    presence::{accessibility_cookie_value, heartbeat_cookie},
    pull_form::{ChannelState, Identity, PullForm, StickyRoute},
    reload::inbox_sync_params,
    signer::{form_params, RequestSigner},
    transport::ChatHttp,
};

const RECONNECT_REASON: &str = "6";
const LOCALE_COOKIE: &str = "locale";
const ACCESSIBILITY_COOKIE: &str = "a11y";

/// Outcome of a successful handshake: who we are and where to poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub identity: Identity,
    pub channel: ChannelState,
}

/// The ordered handshake: reconnect notice, presence establishment, channel
/// confirmation and inbox sync. Any failure aborts the whole flow; callers
/// retry from the start.
pub struct ConnectFlow<'a> {
    http: &'a ChatHttp,
    signer: &'a dyn RequestSigner,
    settings: &'a ListenSettings,
}

impl<'a> ConnectFlow<'a> {
    pub fn new(
        http: &'a ChatHttp,
        signer: &'a dyn RequestSigner,
        settings: &'a ListenSettings,
    ) -> Self {
        Self {
            http,
            signer,
            settings,
        }
    }

    pub async fn run(&self) -> Result<Connection, ChatError> {
        self.request_reconnect().await?;
        let connection = self.establish_presence().await?;
        self.confirm_channel(&connection).await?;
        self.sync_threads(&connection.identity.user_id).await?;
        info!(
            user_id = %connection.identity.user_id,
            client_id = %connection.identity.client_id,
            sticky = connection.channel.sticky().is_some(),
            "chat: connected"
        );
        Ok(connection)
    }

    async fn request_reconnect(&self) -> Result<(), ChatError> {
        self.http
            .get(
                &self.http.endpoints().reconnect_url,
                &form_params([("reason", RECONNECT_REASON)]),
            )
            .await?;
        Ok(())
    }

    async fn read_identity(&self) -> Result<UserId, ChatError> {
        self.http
            .credentials()
            .cookie(&self.settings.identity_cookie)
            .await
            .map(|cookie| cookie.value)
            .filter(|value| !value.is_empty())
            .map(UserId)
            .ok_or_else(|| {
                ChatError::Protocol(format!(
                    "missing required {} user ID",
                    self.settings.identity_cookie
                ))
            })
    }

    /// Stage 1.
    async fn establish_presence(&self) -> Result<Connection, ChatError> {
        let user_id = self.read_identity().await?;
        let identity = Identity::new(user_id);
        let now = Utc::now();
        let domain = &self.http.endpoints().cookie_domain;

        self.http
            .credentials()
            .set_cookies(vec![
                heartbeat_cookie(&identity.user_id, domain, now)?,
                Cookie::secure(LOCALE_COOKIE, self.settings.locale.clone(), domain.clone()),
                Cookie::secure(
                    ACCESSIBILITY_COOKIE,
                    accessibility_cookie_value(now)?,
                    domain.clone(),
                ),
            ])
            .await;

        let mut channel = ChannelState::new(now);
        let form = PullForm::build(&channel, &identity);
        let body = self
            .http
            .get(&self.http.endpoints().pull_url, &form.params())
            .await?;
        let response = parse_pull_response(&body)?;

        if response.kind() != ResponseKind::LoadBalance {
            return Err(ChatError::Protocol(format!(
                "non t: \"lb\" response from chat server (t={:?})",
                response.tag
            )));
        }

        match response.lb_info.as_ref().and_then(StickyRoute::from_lb_info) {
            Some(route) => channel.set_sticky(route),
            None => warn!("chat: lb response carried no complete sticky route"),
        }

        Ok(Connection { identity, channel })
    }

    /// Stage 2: poll once on the assigned shard. The body is not inspected.
    async fn confirm_channel(&self, connection: &Connection) -> Result<(), ChatError> {
        let form = PullForm::build(&connection.channel, &connection.identity);
        self.http
            .get(&self.http.endpoints().pull_url, &form.params())
            .await?;
        Ok(())
    }

    /// Stage 3: baseline inbox state.
    async fn sync_threads(&self, user_id: &UserId) -> Result<(), ChatError> {
        let mut form = inbox_sync_params(0);
        self.signer.sign(user_id, &mut form);
        self.http
            .post_form(&self.http.endpoints().thread_sync_url, &form)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/connect_tests.rs"]
mod tests;
