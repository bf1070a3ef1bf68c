use super::*;
use shared::protocol::parse_pull_response;

fn dispatcher() -> (Dispatcher, broadcast::Receiver<ClientEvent>) {
    let (events, rx) = broadcast::channel(16);
    (Dispatcher::new(UserId::from("111"), events), rx)
}

fn response(body: &str) -> PullResponse {
    parse_pull_response(body.as_bytes()).expect("parse")
}

#[test]
fn direct_message_is_keyed_by_sender() {
    let (dispatcher, _rx) = dispatcher();
    let events = dispatcher.interpret(&response(
        r#"{"t":"continue","seq":42,"ms":[{"type":"delta","delta":{"class":"NewMessage","body":"hi",
            "messageMetadata":{"actorFbId":"999","threadKey":{},"messageId":"m1"}}}]}"#,
    ));

    assert_eq!(
        events,
        vec![ClientEvent::Message(Message {
            from_user_id: UserId::from("999"),
            thread: Thread {
                thread_id: "999".into(),
                is_group: false,
            },
            body: "hi".into(),
            message_id: MessageId::from("m1"),
        })]
    );
}

#[test]
fn group_message_uses_thread_identifier() {
    let (dispatcher, _rx) = dispatcher();
    let events = dispatcher.interpret(&response(
        r#"{"t":"continue","ms":[{"type":"delta","delta":{"class":"NewMessage","body":"yo",
            "messageMetadata":{"actorFbId":"999","threadKey":{"threadFbId":"555"},"messageId":"m2"}}}]}"#,
    ));
    let [ClientEvent::Message(message)] = events.as_slice() else {
        panic!("expected one message, got {events:?}");
    };
    assert_eq!(message.thread, Thread::group("555"));
}

#[test]
fn self_echo_is_suppressed_for_every_thread_shape() {
    let (dispatcher, _rx) = dispatcher();
    for thread_key in [r#"{}"#, r#"{"threadFbId":"555"}"#, r#"{"otherUserFbId":"999"}"#] {
        let body = format!(
            r#"{{"t":"continue","ms":[{{"type":"delta","delta":{{"class":"NewMessage","body":"me",
                "messageMetadata":{{"actorFbId":"111","threadKey":{thread_key},"messageId":"m3"}}}}}}]}}"#
        );
        assert!(dispatcher.interpret(&response(&body)).is_empty());
    }
}

#[test]
fn read_receipts_pick_group_or_reader_thread() {
    let (dispatcher, _rx) = dispatcher();
    let events = dispatcher.interpret(&response(
        r#"{"t":"continue","ms":[
            {"type":"messaging","event":"read_receipt","reader":222,"thread_fbid":555},
            {"type":"messaging","event":"read_receipt","reader":333}
        ]}"#,
    ));

    assert_eq!(
        events,
        vec![
            ClientEvent::ReadReceipt(ReadReceipt {
                thread: Thread::group("555"),
                reader: UserId::from("222"),
            }),
            ClientEvent::ReadReceipt(ReadReceipt {
                thread: Thread::direct(&UserId::from("333")),
                reader: UserId::from("333"),
            }),
        ]
    );
}

#[test]
fn unknown_entries_and_classes_are_ignored() {
    let (dispatcher, _rx) = dispatcher();
    let events = dispatcher.interpret(&response(
        r#"{"t":"continue","ms":[
            {"type":"typ","from":999,"st":1},
            {"type":"delta","delta":{"class":"ReadReceipt"}},
            {"type":"messaging","event":"delivery_receipt","reader":222},
            {"type":"buddylist_overlay"}
        ]}"#,
    ));
    assert!(events.is_empty());
}

#[tokio::test]
async fn dispatch_issues_events_in_entry_order() {
    let (dispatcher, mut rx) = dispatcher();
    let issued = dispatcher.dispatch(&response(
        r#"{"t":"continue","ms":[
            {"type":"delta","delta":{"class":"NewMessage","body":"one",
              "messageMetadata":{"actorFbId":"999","threadKey":{},"messageId":"m1"}}},
            {"type":"messaging","event":"read_receipt","reader":999},
            {"type":"delta","delta":{"class":"NewMessage","body":"two",
              "messageMetadata":{"actorFbId":"999","threadKey":{},"messageId":"m2"}}}
        ]}"#,
    ));
    assert_eq!(issued, 3);

    let mut order = Vec::new();
    for _ in 0..issued {
        match rx.recv().await.expect("event") {
            ClientEvent::Message(message) => order.push(message.body),
            ClientEvent::ReadReceipt(receipt) => order.push(format!("read:{}", receipt.reader)),
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(order, vec!["one", "read:999", "two"]);
}

#[test]
fn dispatch_without_subscribers_does_not_fail() {
    let (events, rx) = broadcast::channel(4);
    drop(rx);
    let dispatcher = Dispatcher::new(UserId::from("111"), events);
    let issued = dispatcher.dispatch(&response(
        r#"{"t":"continue","ms":[{"type":"messaging","event":"read_receipt","reader":9}]}"#,
    ));
    assert_eq!(issued, 1);
}
