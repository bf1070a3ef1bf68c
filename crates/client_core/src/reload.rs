use chrono::Utc;
use shared::domain::UserId;
use tracing::{info, warn};

use crate::{
    config::ListenSettings,
    error::ChatError,
    pull_form::ChannelState,
    signer::{form_params, FormParams, RequestSigner},
    transport::ChatHttp,
};

pub const OP_RELOAD_SYNC: &str = "reload sync";
pub const OP_RELOAD_THREAD_SYNC: &str = "reload thread sync";

/// Form of the inbox thread-sync request, before signing.
pub fn inbox_sync_params(last_action_timestamp: i64) -> FormParams {
    let timestamp = last_action_timestamp.to_string();
    form_params([
        ("client", "mercury"),
        ("folders[0]", "inbox"),
        ("last_action_timestamp", timestamp.as_str()),
    ])
}

#[derive(Debug)]
pub struct ReloadReport {
    pub notification_sync: Result<(), ChatError>,
    pub thread_sync: Result<(), ChatError>,
}

impl ReloadReport {
    pub fn failures(&self) -> impl Iterator<Item = (&'static str, &ChatError)> {
        [
            (OP_RELOAD_SYNC, self.notification_sync.as_ref().err()),
            (OP_RELOAD_THREAD_SYNC, self.thread_sync.as_ref().err()),
        ]
        .into_iter()
        .filter_map(|(op, err)| err.map(|err| (op, err)))
    }
}

/// Re-synchronises notification and thread state after the backend signals a
/// desync. Both calls are always attempted.
pub struct FullReload<'a> {
    http: &'a ChatHttp,
    signer: &'a dyn RequestSigner,
    settings: &'a ListenSettings,
}

impl<'a> FullReload<'a> {
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

    pub async fn run(&self, user_id: &UserId, channel: &mut ChannelState) -> ReloadReport {
        info!(last_sync = %channel.last_sync(), "chat: full reload started");
        let notification_sync = self.sync_notifications(user_id, channel).await;
        let thread_sync = self.sync_threads(user_id).await;

        let report = ReloadReport {
            notification_sync,
            thread_sync,
        };
        for (op, err) in report.failures() {
            warn!(op, kind = ?err.kind(), error = %err, "chat: full reload step failed");
        }
        info!("chat: full reload finished");
        report
    }

    async fn sync_notifications(
        &self,
        user_id: &UserId,
        channel: &mut ChannelState,
    ) -> Result<(), ChatError> {
        let last_sync = channel.last_sync().timestamp().to_string();
        let mut query = form_params([("lastSync", last_sync.as_str())]);
        self.signer.sign(user_id, &mut query);

        self.http
            .get(&self.http.endpoints().notification_sync_url, &query)
            .await?;
        channel.mark_synced(Utc::now());
        Ok(())
    }

    async fn sync_threads(&self, user_id: &UserId) -> Result<(), ChatError> {
        let overlap = self.settings.reload_overlap.as_millis() as i64;
        let mut form = inbox_sync_params(Utc::now().timestamp_millis() - overlap);
        self.signer.sign(user_id, &mut form);

        self.http
            .post_form(&self.http.endpoints().thread_sync_url, &form)
            .await?;
        Ok(())
    }
}
