use std::time::Duration;

use shared::domain::ThreadId;

use super::*;
use crate::{
    error::ErrorKind,
    mock_backend::{fast_settings, logged_in_store, MockBackend},
    signer::FormMetaSigner,
    TerminationReason,
};

const LB_REPLY: &str = r#"for (;;); {"t":"lb","lb_info":{"sticky":"TOK1","pool":"POOL1"}}"#;

fn session(base_url: &str) -> ChatSession {
    ChatSession::with_config(
        ChatEndpoints::with_base_url(base_url),
        fast_settings(),
        logged_in_store("111"),
        Arc::new(FormMetaSigner::new("dtsg-token", "4012")),
    )
    .expect("session")
}

#[tokio::test]
async fn listen_requires_connect() {
    let (_backend, base_url) = MockBackend::spawn().await.expect("spawn backend");
    let mut session = session(&base_url);

    let err = session.listen().err().expect("listen before connect");
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(session.user_id().is_none());
}

#[tokio::test]
async fn mark_as_read_requires_connect() {
    let (backend, base_url) = MockBackend::spawn().await.expect("spawn backend");
    let session = session(&base_url);

    let err = session
        .mark_as_read(&Thread::group("555"))
        .await
        .expect_err("not connected");
    assert!(matches!(err, ChatError::NotConnected("mark_as_read")));
    assert_eq!(backend.hit_count("read_status").await, 0);
}

#[tokio::test]
async fn connect_then_listen_delivers_messages() {
    let (backend, base_url) = MockBackend::spawn().await.expect("spawn backend");
    backend.push_pull(LB_REPLY).await;
    backend.push_pull(r#"{"t":"continue"}"#).await;
    backend
        .push_pull(r#"{"t":"msg","seq":3,"ms":[{"type":"delta","delta":{"class":"NewMessage","body":"ping","messageMetadata":{"actorFbId":"222","threadKey":{"threadFbId":"777"},"messageId":"mid.9"}}}]}"#)
        .await;
    let mut session = session(&base_url);
    let mut events = session.subscribe_events();

    session.connect().await.expect("connect");
    assert!(session.is_connected());
    assert_eq!(session.user_id(), Some(&UserId::from("111")));

    let handle = session.listen().expect("listen");
    assert!(!session.is_connected());

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event within timeout")
        .expect("open channel");
    let ClientEvent::Message(message) = event else {
        panic!("expected a message, got {event:?}");
    };
    assert_eq!(message.thread.thread_id, ThreadId::from("777"));
    assert!(message.thread.is_group);

    assert_eq!(handle.close().await, TerminationReason::Closed);
    let pulls = backend.hits("pull").await;
    assert!(pulls[2].query.contains("sticky_token=TOK1&sticky_pool=POOL1"));
}

#[tokio::test]
async fn mark_as_read_posts_signed_thread_id() {
    let (backend, base_url) = MockBackend::spawn().await.expect("spawn backend");
    backend.push_pull(LB_REPLY).await;
    let mut session = session(&base_url);
    session.connect().await.expect("connect");

    session
        .mark_as_read(&Thread::group("555"))
        .await
        .expect("mark as read");

    let hit = &backend.hits("read_status").await[0];
    assert!(hit.body.starts_with("ids%5B555%5D=true&__user=111&__req=2"));
}

#[tokio::test]
async fn imported_cookies_are_sent_on_the_next_request() {
    let (backend, base_url) = MockBackend::spawn().await.expect("spawn backend");
    backend.push_pull(LB_REPLY).await;
    let mut session = ChatSession::with_config(
        ChatEndpoints::with_base_url(&base_url),
        fast_settings(),
        Arc::new(crate::credentials::MemoryCredentialStore::new()),
        Arc::new(FormMetaSigner::new("dtsg-token", "4012")),
    )
    .expect("session");

    session
        .import_cookies(vec![
            Cookie::new("c_user", "111"),
            Cookie::new("xs", "secret"),
        ])
        .await;
    session.connect().await.expect("connect");

    let reconnect = &backend.hits("reconnect").await[0];
    assert!(reconnect.cookies.contains("c_user=111"));
    assert!(reconnect.cookies.contains("xs=secret"));
}
