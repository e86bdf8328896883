//! Correlation table.
//!
//! Maps tokens to the operations waiting on them. One-shot entries are
//! removed by the first reply bearing their token; subscription entries
//! stay until they are explicitly removed.

use crate::error::ClientError;
use crate::record::Record;
use paws_protocol::{Resource, ResourceKind, Response};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// A decoded subscription update.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Token of the subscription.
    pub token: String,
    /// Status code carried by the update frame.
    pub status: u16,
    /// Resource named by the frame, if any.
    pub resource: Option<String>,
    /// Decoded body.
    pub record: Record,
}

/// Receives updates for a subscription.
///
/// Invoked inline on the connection's read path, so implementations must
/// return quickly; hand work off to a channel or task when it is not.
pub trait SubscriptionHandler: Send + Sync + 'static {
    fn on_update(&self, update: Update);

    /// Called once when the subscription is dropped by `disconnect`.
    fn on_closed(&self) {}
}

impl<F> SubscriptionHandler for F
where
    F: Fn(Update) + Send + Sync + 'static,
{
    fn on_update(&self, update: Update) {
        self(update)
    }
}

/// A registered subscription.
pub struct SubscriptionEntry {
    resource: Resource,
    handler: Arc<dyn SubscriptionHandler>,
    /// Completion for the acknowledgement still expected on this token.
    ack: Option<oneshot::Sender<Response>>,
}

impl SubscriptionEntry {
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn handler(&self) -> &Arc<dyn SubscriptionHandler> {
        &self.handler
    }
}

/// An operation waiting on one or more replies.
pub enum PendingOperation {
    /// `id` distinguishes successive registrations of the same token.
    OneShot {
        id: u64,
        completion: oneshot::Sender<Response>,
    },
    Subscription(SubscriptionEntry),
}

/// Outcome of routing one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A one-shot completion was resolved and its entry removed.
    Completed,
    /// A subscription's acknowledgement was resolved.
    Acknowledged,
    /// A subscription handler received the decoded update.
    Delivered,
    /// The body could not be decoded for the subscription's kind.
    RecordDecodeFailed(String),
    /// The subscription handler panicked.
    HandlerPanicked,
    /// No entry holds this token.
    Orphan,
}

impl Resolution {
    /// Whether an entry owned the token.
    pub fn is_handled(&self) -> bool {
        !matches!(self, Resolution::Orphan)
    }
}

enum Action {
    Complete(oneshot::Sender<Response>),
    Acknowledge(oneshot::Sender<Response>),
    Deliver(Arc<dyn SubscriptionHandler>, ResourceKind),
}

/// Token → pending operation map, shared by callers and the read path.
#[derive(Default)]
pub struct CorrelationTable {
    entries: Mutex<HashMap<String, PendingOperation>>,
    next_id: AtomicU64,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a one-shot completion, returning its registration id.
    pub fn register_one_shot(
        &self,
        token: impl Into<String>,
        completion: oneshot::Sender<Response>,
    ) -> Result<u64, ClientError> {
        let id = self.next_id();
        self.insert(token.into(), PendingOperation::OneShot { id, completion })?;
        Ok(id)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a subscription whose first reply is its acknowledgement.
    pub fn register_subscription(
        &self,
        token: impl Into<String>,
        resource: Resource,
        handler: Arc<dyn SubscriptionHandler>,
        ack: oneshot::Sender<Response>,
    ) -> Result<(), ClientError> {
        self.insert(
            token.into(),
            PendingOperation::Subscription(SubscriptionEntry {
                resource,
                handler,
                ack: Some(ack),
            }),
        )
    }

    fn insert(&self, token: String, op: PendingOperation) -> Result<(), ClientError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&token) {
            return Err(ClientError::DuplicateToken(token));
        }
        entries.insert(token, op);
        Ok(())
    }

    /// Routes an inbound message to the entry owning its token.
    ///
    /// User handlers run after the table lock is released.
    pub fn resolve(&self, response: Response) -> Resolution {
        let action = {
            let mut entries = self.entries.lock();
            match entries.remove(&response.token) {
                None => return Resolution::Orphan,
                Some(PendingOperation::OneShot { completion, .. }) => Action::Complete(completion),
                Some(PendingOperation::Subscription(mut sub)) => {
                    let action = match sub.ack.take() {
                        Some(ack) => Action::Acknowledge(ack),
                        None => Action::Deliver(sub.handler.clone(), sub.resource.kind()),
                    };
                    entries.insert(response.token.clone(), PendingOperation::Subscription(sub));
                    action
                }
            }
        };

        match action {
            Action::Complete(tx) => {
                // The caller may have given up (timeout); the entry is gone either way.
                let _ = tx.send(response);
                Resolution::Completed
            }
            Action::Acknowledge(tx) => {
                let _ = tx.send(response);
                Resolution::Acknowledged
            }
            Action::Deliver(handler, kind) => {
                let record = match Record::decode(kind, &response) {
                    Ok(record) => record,
                    Err(e) => return Resolution::RecordDecodeFailed(e.to_string()),
                };
                let update = Update {
                    token: response.token,
                    status: response.status,
                    resource: response.resource,
                    record,
                };
                match catch_unwind(AssertUnwindSafe(|| handler.on_update(update))) {
                    Ok(()) => Resolution::Delivered,
                    Err(_) => Resolution::HandlerPanicked,
                }
            }
        }
    }

    /// Removes any entry for the token. No-op when absent.
    pub fn remove(&self, token: &str) -> Option<PendingOperation> {
        self.entries.lock().remove(token)
    }

    /// Removes the token only if it is still the one-shot registered as `id`.
    ///
    /// A later registration of the same token is left alone.
    pub fn remove_one_shot(&self, token: &str, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let owned = matches!(
            entries.get(token),
            Some(PendingOperation::OneShot { id: current, .. }) if *current == id
        );
        if owned {
            entries.remove(token);
            true
        } else {
            false
        }
    }

    /// Stops waiting for a subscription's acknowledgement. The subscription
    /// stays registered.
    pub fn disarm_ack(&self, token: &str) {
        if let Some(PendingOperation::Subscription(sub)) = self.entries.lock().get_mut(token) {
            sub.ack = None;
        }
    }

    /// Replaces a subscription with a one-shot awaiting its unsubscribe
    /// acknowledgement, returning the one-shot's registration id and the
    /// removed subscription.
    ///
    /// Leaves the table untouched when the token is not a subscription.
    pub fn begin_unsubscribe(
        &self,
        token: &str,
        ack: oneshot::Sender<Response>,
    ) -> Option<(u64, SubscriptionEntry)> {
        let mut entries = self.entries.lock();
        if !matches!(entries.get(token), Some(PendingOperation::Subscription(_))) {
            return None;
        }
        let id = self.next_id();
        let removed = entries.insert(
            token.to_string(),
            PendingOperation::OneShot {
                id,
                completion: ack,
            },
        );
        match removed {
            Some(PendingOperation::Subscription(sub)) => Some((id, sub)),
            _ => None,
        }
    }

    /// Drops every one-shot completion and every outstanding subscription
    /// acknowledgement. Their callers observe `ConnectionClosed`.
    ///
    /// Subscriptions themselves are kept. Returns the number of dropped
    /// completions.
    pub fn fail_in_flight(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, op| matches!(op, PendingOperation::Subscription(_)));
        let mut dropped = before - entries.len();
        for op in entries.values_mut() {
            if let PendingOperation::Subscription(sub) = op {
                if sub.ack.take().is_some() {
                    dropped += 1;
                }
            }
        }
        dropped
    }

    /// Arms a fresh acknowledgement on every subscription so they can be
    /// re-sent over a new connection.
    pub fn rearm_subscriptions(&self) -> Vec<(String, Resource, oneshot::Receiver<Response>)> {
        let mut entries = self.entries.lock();
        entries
            .iter_mut()
            .filter_map(|(token, op)| match op {
                PendingOperation::Subscription(sub) => {
                    let (tx, rx) = oneshot::channel();
                    sub.ack = Some(tx);
                    Some((token.clone(), sub.resource.clone(), rx))
                }
                PendingOperation::OneShot { .. } => None,
            })
            .collect()
    }

    /// Removes every entry, returning the handlers of removed subscriptions.
    pub fn clear(&self) -> Vec<Arc<dyn SubscriptionHandler>> {
        self.entries
            .lock()
            .drain()
            .filter_map(|(_, op)| match op {
                PendingOperation::Subscription(sub) => Some(sub.handler),
                PendingOperation::OneShot { .. } => None,
            })
            .collect()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.entries.lock().contains_key(token)
    }

    pub fn is_subscription(&self, token: &str) -> bool {
        matches!(
            self.entries.lock().get(token),
            Some(PendingOperation::Subscription(_))
        )
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn subscription_count(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|op| matches!(op, PendingOperation::Subscription(_)))
            .count()
    }
}
