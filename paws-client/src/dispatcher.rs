//! Routes inbound frames to the correlation table.

use crate::connection::FrameHandler;
use crate::error::DispatchError;
use crate::table::{CorrelationTable, Resolution};
use paws_protocol::{Method, ProtocolError, Request, Response};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the dispatch error channel.
const ERROR_CHANNEL_CAPACITY: usize = 256;

/// Counters maintained by the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub completed: u64,
    pub delivered: u64,
    pub orphans: u64,
    pub malformed: u64,
    pub handler_failures: u64,
}

/// Delivers every decoded frame to the operation owning its token.
///
/// Nothing raised while handling one frame stops the next one from being
/// handled.
pub struct Dispatcher {
    table: Arc<CorrelationTable>,
    /// Headers attached to re-sent subscriptions.
    headers: HashMap<String, String>,
    resubscribe_on_reconnect: bool,
    errors: broadcast::Sender<DispatchError>,
    completed: AtomicU64,
    delivered: AtomicU64,
    orphans: AtomicU64,
    malformed: AtomicU64,
    handler_failures: AtomicU64,
}

impl Dispatcher {
    pub fn new(table: Arc<CorrelationTable>) -> Self {
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            table,
            headers: HashMap::new(),
            resubscribe_on_reconnect: true,
            errors,
            completed: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            orphans: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_resubscribe(mut self, enabled: bool) -> Self {
        self.resubscribe_on_reconnect = enabled;
        self
    }

    /// Subscribes to errors recorded while dispatching.
    pub fn errors(&self) -> broadcast::Receiver<DispatchError> {
        self.errors.subscribe()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            completed: self.completed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            orphans: self.orphans.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }

    /// Routes one decoded message.
    pub fn dispatch(&self, response: Response) -> Resolution {
        let token = response.token.clone();
        let resolution = self.table.resolve(response);

        match &resolution {
            Resolution::Completed | Resolution::Acknowledged => {
                tracing::debug!("dispatch: resolved token={}", token);
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            Resolution::Delivered => {
                tracing::debug!("dispatch: delivered update token={}", token);
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Resolution::Orphan => {
                tracing::warn!("dispatch: no pending operation for token={}", token);
                self.orphans.fetch_add(1, Ordering::Relaxed);
                self.record(DispatchError::Orphan { token });
            }
            Resolution::RecordDecodeFailed(reason) => {
                tracing::warn!("dispatch: undecodable update token={}: {}", token, reason);
                self.handler_failures.fetch_add(1, Ordering::Relaxed);
                self.record(DispatchError::RecordDecode {
                    token,
                    reason: reason.clone(),
                });
            }
            Resolution::HandlerPanicked => {
                tracing::error!("dispatch: subscription handler panicked token={}", token);
                self.handler_failures.fetch_add(1, Ordering::Relaxed);
                self.record(DispatchError::HandlerPanicked { token });
            }
        }

        resolution
    }

    fn record(&self, error: DispatchError) {
        // No receivers is fine.
        let _ = self.errors.send(error);
    }
}

impl FrameHandler for Dispatcher {
    fn on_frame(&self, frame: Result<Response, ProtocolError>) {
        match frame {
            Ok(response) => {
                self.dispatch(response);
            }
            Err(e) => {
                tracing::warn!("dispatch: dropping malformed frame: {}", e);
                self.malformed.fetch_add(1, Ordering::Relaxed);
                self.record(DispatchError::FrameDecode(e.to_string()));
            }
        }
    }

    fn on_connected(&self, reconnect: bool) -> Vec<Request> {
        if !reconnect || !self.resubscribe_on_reconnect {
            return Vec::new();
        }

        self.table
            .rearm_subscriptions()
            .into_iter()
            .map(|(token, resource, ack)| {
                let watched = token.clone();
                tokio::spawn(async move {
                    match ack.await {
                        Ok(response) if response.is_success() => {
                            tracing::info!("resubscribed token={}", watched);
                        }
                        Ok(response) => {
                            tracing::warn!(
                                "resubscribe rejected token={} status={}",
                                watched,
                                response.status
                            );
                        }
                        Err(_) => {
                            tracing::debug!("resubscribe abandoned token={}", watched);
                        }
                    }
                });
                Request::new(token, Method::Subscribe, resource.path())
                    .with_headers(self.headers.clone())
            })
            .collect()
    }

    fn on_connection_lost(&self) {
        let failed = self.table.fail_in_flight();
        if failed > 0 {
            tracing::info!("connection lost, failed {} in-flight operations", failed);
        }
    }
}
