use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::Parser;
use client_core::{
    ChatSession, ClientEvent, FormMetaSigner, MemoryCredentialStore, TerminationReason,
};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

mod config;

#[derive(Parser, Debug)]
struct Args {
    /// TOML file with a `[cookies]` table from a signed-in session.
    #[arg(long)]
    cookie_file: Option<PathBuf>,
    #[arg(long)]
    fb_dtsg: Option<String>,
    #[arg(long)]
    revision: Option<String>,
    /// Route every endpoint through this base URL.
    #[arg(long)]
    base_url: Option<String>,
    /// Mark each thread read as messages arrive.
    #[arg(long)]
    mark_read: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = config::load_settings();
    if let Some(v) = args.cookie_file {
        settings.cookie_file = v;
    }
    if let Some(v) = args.fb_dtsg {
        settings.fb_dtsg = v;
    }
    if let Some(v) = args.revision {
        settings.revision = v;
    }
    if let Some(v) = args.base_url {
        settings.base_url = Some(v);
    }

    tracing_subscriber::fmt()
        .with_env_filter(settings.log_filter.as_str())
        .init();

    let endpoints = settings.endpoints();
    let cookies = config::load_cookies(&settings.cookie_file, &endpoints.cookie_domain)?;
    info!(count = cookies.len(), file = %settings.cookie_file.display(), "loaded cookies");

    let mut session = ChatSession::with_config(
        endpoints,
        settings.listen_settings(),
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(FormMetaSigner::new(settings.fb_dtsg.clone(), settings.revision.clone())),
    )?
    .with_span(tracing::info_span!("chat"));

    session.import_cookies(cookies).await;

    let events = session.subscribe_events();
    session.connect().await.context("chat connect failed")?;
    let handle = session.listen()?;
    let session = Arc::new(session);
    let printer = tokio::spawn(log_events(events, Arc::clone(&session), args.mark_read));

    let reason = tokio::select! {
        reason = handle.wait() => reason,
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, closing listener");
            handle.close().await
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(5), printer).await;

    match reason {
        TerminationReason::LoggedOut => bail!("chat session logged out; refresh the cookie file"),
        TerminationReason::Aborted => bail!("listener task ended unexpectedly"),
        TerminationReason::Closed => {
            info!("listener closed");
            Ok(())
        }
    }
}

async fn log_events(
    mut events: broadcast::Receiver<ClientEvent>,
    session: Arc<ChatSession>,
    mark_read: bool,
) {
    loop {
        match events.recv().await {
            Ok(ClientEvent::Message(message)) => {
                info!(
                    from = %message.from_user_id,
                    thread = %message.thread.thread_id,
                    group = message.thread.is_group,
                    message_id = %message.message_id,
                    body = %message.body,
                    "message"
                );
                if mark_read {
                    if let Err(err) = session.mark_as_read(&message.thread).await {
                        warn!(error = %err, "mark as read failed");
                    }
                }
            }
            Ok(ClientEvent::ReadReceipt(receipt)) => {
                info!(reader = %receipt.reader, thread = %receipt.thread.thread_id, "read receipt");
            }
            Ok(ClientEvent::Error(err)) => warn!(op = err.op, error = %err, "listen error"),
            Ok(ClientEvent::Terminated(reason)) => {
                info!(?reason, "listener terminated");
                break;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event consumer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                error!("event channel closed");
                break;
            }
        }
    }
}
