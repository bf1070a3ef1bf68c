use shared::{
    domain::{Message, MessageId, ReadReceipt, Thread, UserId},
    protocol::{wire_id, Delta, PullEntry, PullResponse},
};
use tokio::sync::broadcast;
use tracing::debug;

use crate::ClientEvent;

const ENTRY_DELTA: &str = "delta";
const ENTRY_MESSAGING: &str = "messaging";
const CLASS_NEW_MESSAGE: &str = "NewMessage";
const EVENT_READ_RECEIPT: &str = "read_receipt";

/// Turns poll payload entries into [`ClientEvent`]s on the session's event
/// channel.
#[derive(Clone)]
pub struct Dispatcher {
    local_user: UserId,
    events: broadcast::Sender<ClientEvent>,
}

impl Dispatcher {
    pub fn new(local_user: UserId, events: broadcast::Sender<ClientEvent>) -> Self {
        Self { local_user, events }
    }

    /// Events for `response`, in entry order. Unknown shapes yield nothing.
    pub fn interpret(&self, response: &PullResponse) -> Vec<ClientEvent> {
        response
            .entries()
            .iter()
            .filter_map(|entry| self.interpret_entry(entry))
            .collect()
    }

    /// Send every event of `response` without waiting on subscribers.
    /// Returns how many events were issued.
    pub fn dispatch(&self, response: &PullResponse) -> usize {
        let events = self.interpret(response);
        let issued = events.len();
        for event in events {
            // No subscriber is not an error; events are simply dropped.
            let _ = self.events.send(event);
        }
        issued
    }

    fn interpret_entry(&self, entry: &PullEntry) -> Option<ClientEvent> {
        match entry.kind.as_str() {
            ENTRY_DELTA => {
                let delta = entry.delta.as_ref()?;
                if delta.class != CLASS_NEW_MESSAGE {
                    return None;
                }
                message_from_delta(delta, &self.local_user).map(ClientEvent::Message)
            }
            ENTRY_MESSAGING if entry.event.as_deref() == Some(EVENT_READ_RECEIPT) => {
                read_receipt_from_entry(entry).map(ClientEvent::ReadReceipt)
            }
            other => {
                debug!(entry_type = other, "chat: ignoring unhandled entry");
                None
            }
        }
    }
}

/// `None` for self-echoes and for deltas without a sender.
pub fn message_from_delta(delta: &Delta, local_user: &UserId) -> Option<Message> {
    let metadata = &delta.message_metadata;
    let sender = UserId(wire_id(&metadata.actor_fb_id)?);
    if &sender == local_user {
        return None;
    }

    let thread = match wire_id(&metadata.thread_key.thread_fb_id) {
        Some(thread_id) => Thread::group(thread_id),
        None => Thread::direct(&sender),
    };

    Some(Message {
        from_user_id: sender,
        thread,
        body: delta.body.clone().unwrap_or_default(),
        message_id: MessageId(metadata.message_id.clone().unwrap_or_default()),
    })
}

pub fn read_receipt_from_entry(entry: &PullEntry) -> Option<ReadReceipt> {
    let reader = UserId(wire_id(&entry.reader)?);
    let thread = match wire_id(&entry.thread_fbid) {
        Some(thread_id) => Thread::group(thread_id),
        None => Thread::direct(&reader),
    };
    Some(ReadReceipt { thread, reader })
}

#[cfg(test)]
#[path = "tests/dispatch_tests.rs"]
mod tests;
