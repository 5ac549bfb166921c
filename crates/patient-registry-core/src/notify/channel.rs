//! In-process named broadcast channels, one endpoint per tab.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::{ChangeEvent, ChangePort, NotifyError, Operation};

const CHANNEL_CAPACITY: usize = 64;

/// Serialized event tagged with the publishing endpoint.
#[derive(Debug, Clone)]
struct Envelope {
    origin: Uuid,
    payload: String,
}

/// Registry of named channels shared by every tab in the process.
///
/// The hub keeps every opened channel alive until [`ChannelHub::close`] is
/// called for it; receivers only see the end of a channel once it is closed
/// here and every endpoint on it has been dropped.
#[derive(Clone, Default)]
pub struct ChannelHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Envelope>>>>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the named channel, creating it on first use.
    pub fn open(&self, name: &str) -> ChannelEndpoint {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let sender = channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone();
        ChannelEndpoint {
            id: Uuid::new_v4(),
            name: name.to_string(),
            sender,
        }
    }

    /// Stop keeping the named channel alive. Open endpoints keep working
    /// until they are dropped.
    pub fn close(&self, name: &str) -> bool {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        channels.remove(name).is_some()
    }
}

/// One tab's connection to a named channel.
#[derive(Clone)]
pub struct ChannelEndpoint {
    id: Uuid,
    name: String,
    sender: broadcast::Sender<Envelope>,
}

impl ChannelEndpoint {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive other tabs' events from this point on.
    pub fn subscribe(&self) -> ChannelReceiver {
        ChannelReceiver {
            own_id: self.id,
            receiver: self.sender.subscribe(),
        }
    }
}

impl ChangePort for ChannelEndpoint {
    fn publish(&self, event: &ChangeEvent) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(event)?;
        let envelope = Envelope {
            origin: self.id,
            payload,
        };
        // Err only means nobody is listening right now.
        if self.sender.send(envelope).is_err() {
            trace!(channel = %self.name, "no listeners for change event");
        }
        Ok(())
    }
}

pub struct ChannelReceiver {
    own_id: Uuid,
    receiver: broadcast::Receiver<Envelope>,
}

impl ChannelReceiver {
    /// Next `DB_UPDATED` event from another tab; `None` once the channel is
    /// closed on the hub and no endpoint for it remains.
    ///
    /// Missed messages (receiver lag) surface as a single `unknown` event.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => {
                    if let Some(event) = self.accept(envelope) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "change channel lagged");
                    return Some(ChangeEvent::new(Operation::Unknown, None));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`ChannelReceiver::recv`].
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) => {
                    if let Some(event) = self.accept(envelope) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(missed, "change channel lagged");
                    return Some(ChangeEvent::new(Operation::Unknown, None));
                }
                Err(_) => return None,
            }
        }
    }

    fn accept(&self, envelope: Envelope) -> Option<ChangeEvent> {
        if envelope.origin == self.own_id {
            return None;
        }
        match serde_json::from_str::<ChangeEvent>(&envelope.payload) {
            Ok(event) if event.is_db_update() => Some(event),
            Ok(event) => {
                debug!(kind = %event.kind, "ignoring non-update message");
                None
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed change message");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_other_tab_receives() {
        let hub = ChannelHub::new();
        let tab_a = hub.open("patient_app_channel");
        let tab_b = hub.open("patient_app_channel");
        let mut inbox_b = tab_b.subscribe();

        tab_a
            .publish(&ChangeEvent::new(Operation::PatientAdded, None))
            .unwrap();

        let event = inbox_b.recv().await.unwrap();
        assert_eq!(event.operation, Operation::PatientAdded);
    }

    #[test]
    fn test_own_messages_skipped() {
        let hub = ChannelHub::new();
        let tab = hub.open("patient_app_channel");
        let mut inbox = tab.subscribe();

        tab.publish(&ChangeEvent::new(Operation::PatientAdded, None))
            .unwrap();
        assert!(inbox.try_recv().is_none());
    }

    #[test]
    fn test_channels_are_isolated_by_name() {
        let hub = ChannelHub::new();
        let tab_a = hub.open("one");
        let mut inbox = hub.open("two").subscribe();

        tab_a
            .publish(&ChangeEvent::new(Operation::PatientAdded, None))
            .unwrap();
        assert!(inbox.try_recv().is_none());
    }

    #[test]
    fn test_publish_without_listeners_is_ok() {
        let hub = ChannelHub::new();
        let tab = hub.open("patient_app_channel");
        assert!(tab
            .publish(&ChangeEvent::new(Operation::PatientAdded, None))
            .is_ok());
    }

    #[test]
    fn test_malformed_and_foreign_messages_dropped() {
        let hub = ChannelHub::new();
        let tab_a = hub.open("c");
        let mut inbox = hub.open("c").subscribe();

        let send_raw = |payload: &str| {
            let _ = tab_a.sender.send(Envelope {
                origin: tab_a.id,
                payload: payload.to_string(),
            });
        };
        send_raw("not json");
        send_raw(r#"{"type":"PING"}"#);
        send_raw(r#"{"type":"DB_UPDATED","operation":"PATIENT_DELETED","timestamp":1}"#);

        let event = inbox.try_recv().unwrap();
        assert_eq!(event.operation, Operation::PatientDeleted);
        assert!(inbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_receiver_ends_after_close() {
        let hub = ChannelHub::new();
        let tab_a = hub.open("c");
        let mut inbox = hub.open("c").subscribe();

        assert!(hub.close("c"));
        assert!(!hub.close("c"));

        // still open while an endpoint remains
        tab_a
            .publish(&ChangeEvent::new(Operation::PatientAdded, None))
            .unwrap();
        assert_eq!(inbox.recv().await.unwrap().operation, Operation::PatientAdded);

        drop(tab_a);
        assert!(inbox.recv().await.is_none());
    }

    #[test]
    fn test_lag_becomes_unknown_event() {
        let hub = ChannelHub::new();
        let tab_a = hub.open("c");
        let mut inbox = hub.open("c").subscribe();

        for _ in 0..(CHANNEL_CAPACITY + 5) {
            tab_a
                .publish(&ChangeEvent::new(Operation::PatientAdded, None))
                .unwrap();
        }

        let event = inbox.try_recv().unwrap();
        assert_eq!(event.operation, Operation::Unknown);
    }
}
