//! Completion handles for in-flight operations.

use crate::error::ClientError;
use crate::table::CorrelationTable;
use paws_protocol::Response;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, Sleep};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    /// Reply to a one-shot request, with the id of its table registration.
    Reply(u64),
    /// Acknowledgement of a subscribe.
    Acknowledgement,
}

/// Resolves once with the reply to a single operation.
///
/// The deadline starts when the operation is sent, not when the completion
/// is first polled. On expiry the table entry is removed and the completion
/// yields [`ClientError::Timeout`]. Dropping an unresolved reply completion
/// also removes its entry, so a late reply is treated as an orphan. Only the
/// registration this completion was created for is ever removed.
pub struct Completion {
    token: String,
    kind: Kind,
    rx: oneshot::Receiver<Response>,
    deadline: Pin<Box<Sleep>>,
    table: Arc<CorrelationTable>,
    finished: bool,
}

impl Completion {
    pub(crate) fn reply(
        token: String,
        registration: u64,
        rx: oneshot::Receiver<Response>,
        timeout: Duration,
        table: Arc<CorrelationTable>,
    ) -> Self {
        Self::new(token, Kind::Reply(registration), rx, timeout, table)
    }

    pub(crate) fn acknowledgement(
        token: String,
        rx: oneshot::Receiver<Response>,
        timeout: Duration,
        table: Arc<CorrelationTable>,
    ) -> Self {
        Self::new(token, Kind::Acknowledgement, rx, timeout, table)
    }

    fn new(
        token: String,
        kind: Kind,
        rx: oneshot::Receiver<Response>,
        timeout: Duration,
        table: Arc<CorrelationTable>,
    ) -> Self {
        Self {
            token,
            kind,
            rx,
            deadline: Box::pin(tokio::time::sleep_until(Instant::now() + timeout)),
            table,
            finished: false,
        }
    }

    /// Token of the operation this completion belongs to.
    pub fn token(&self) -> &str {
        &self.token
    }

    fn expire(&self) {
        match self.kind {
            Kind::Reply(registration) => {
                self.table.remove_one_shot(&self.token, registration);
            }
            Kind::Acknowledgement => self.table.disarm_ack(&self.token),
        }
    }
}

impl Future for Completion {
    type Output = Result<Response, ClientError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(Err(ClientError::ConnectionClosed));
        }

        if let Poll::Ready(result) = Pin::new(&mut this.rx).poll(cx) {
            this.finished = true;
            return Poll::Ready(result.map_err(|_| ClientError::ConnectionClosed));
        }

        if this.deadline.as_mut().poll(cx).is_ready() {
            this.finished = true;
            tracing::debug!("operation token={} timed out", this.token);
            this.expire();
            return Poll::Ready(Err(ClientError::Timeout));
        }

        Poll::Pending
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.finished && matches!(self.kind, Kind::Reply(_)) {
            self.expire();
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("token", &self.token)
            .field("kind", &self.kind)
            .field("finished", &self.finished)
            .finish()
    }
}
