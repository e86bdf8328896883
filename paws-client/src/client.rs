//! High-level client API.

use crate::completion::Completion;
use crate::connection::{ConnectionConfig, ConnectionManager, ConnectionState};
use crate::dispatcher::{DispatchStats, Dispatcher};
use crate::error::{ClientError, DispatchError};
use crate::record::Record;
use crate::table::{CorrelationTable, SubscriptionHandler};
use paws_protocol::{Method, Request, Resource, Response, API_KEY_HEADER};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

/// High-level client for the PAWS streaming interface.
///
/// Every operation is multiplexed over one connection and correlated by
/// token. Requests resolve once; subscriptions deliver updates to their
/// handler until [`unsubscribe`](Self::unsubscribe) or
/// [`disconnect`](Self::disconnect).
pub struct Client {
    conn: ConnectionManager,
    table: Arc<CorrelationTable>,
    dispatcher: Arc<Dispatcher>,
    headers: HashMap<String, String>,
    request_timeout: Duration,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        let mut headers = HashMap::new();
        if let Some(key) = &config.api_key {
            headers.insert(API_KEY_HEADER.to_string(), key.clone());
        }

        let table = Arc::new(CorrelationTable::new());
        let dispatcher = Arc::new(
            Dispatcher::new(table.clone())
                .with_headers(headers.clone())
                .with_resubscribe(config.resubscribe_on_reconnect),
        );
        let request_timeout = config.request_timeout;
        let conn = ConnectionManager::new(config, dispatcher.clone());

        Self {
            conn,
            table,
            dispatcher,
            headers,
            request_timeout,
        }
    }

    /// Connects to the server. A no-op when already connected.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    /// Closes the connection and drops every registered operation.
    ///
    /// Pending completions fail with [`ClientError::ConnectionClosed`] and
    /// subscription handlers receive `on_closed`. A no-op when already
    /// disconnected.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.conn.disconnect().await?;

        let handlers = self.table.clear();
        if !handlers.is_empty() {
            tracing::debug!("closing {} subscriptions", handlers.len());
        }
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler.on_closed())).is_err() {
                tracing::error!("subscription handler panicked while closing");
            }
        }
        Ok(())
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn config(&self) -> &ConnectionConfig {
        self.conn.config()
    }

    /// Number of tokens currently registered.
    pub fn pending_count(&self) -> usize {
        self.table.len()
    }

    /// Returns whether the token is registered.
    pub fn is_pending(&self, token: &str) -> bool {
        self.table.contains(token)
    }

    /// Returns whether the token names an active subscription.
    pub fn is_subscribed(&self, token: &str) -> bool {
        self.table.is_subscription(token)
    }

    /// Observes orphans, malformed frames and handler failures.
    pub fn dispatch_errors(&self) -> broadcast::Receiver<DispatchError> {
        self.dispatcher.errors()
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Generates a fresh token.
    pub fn generate_token() -> String {
        Uuid::new_v4().to_string()
    }

    // =========================================================================
    // Core operations
    // =========================================================================

    /// Sends a request and returns a completion for its single reply.
    ///
    /// Fails without sending when not connected. The completion uses the
    /// configured request timeout.
    pub async fn request(
        &self,
        method: Method,
        resource: &str,
        body: Option<String>,
    ) -> Result<Completion, ClientError> {
        self.request_with_timeout(method, resource, body, self.request_timeout)
            .await
    }

    /// Like [`request`](Self::request) with an explicit deadline.
    pub async fn request_with_timeout(
        &self,
        method: Method,
        resource: &str,
        body: Option<String>,
        timeout: Duration,
    ) -> Result<Completion, ClientError> {
        self.send_one_shot(Self::generate_token(), method, resource, body, timeout)
            .await
    }

    /// Like [`request`](Self::request) with a caller-supplied token.
    ///
    /// Fails with [`ClientError::DuplicateToken`] when the token is in use.
    pub async fn request_with_token(
        &self,
        token: impl Into<String>,
        method: Method,
        resource: &str,
        body: Option<String>,
    ) -> Result<Completion, ClientError> {
        self.send_one_shot(token.into(), method, resource, body, self.request_timeout)
            .await
    }

    async fn send_one_shot(
        &self,
        token: String,
        method: Method,
        resource: &str,
        body: Option<String>,
        timeout: Duration,
    ) -> Result<Completion, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let (tx, rx) = oneshot::channel();
        let registration = self.table.register_one_shot(token.clone(), tx)?;
        let completion =
            Completion::reply(token.clone(), registration, rx, timeout, self.table.clone());

        let request = Request::new(token, method, resource)
            .with_headers(self.headers.clone())
            .with_body(body);
        self.conn.send(&request).await?;
        Ok(completion)
    }

    /// Subscribes to a resource.
    ///
    /// Returns the subscription token and a completion for the server's
    /// acknowledgement. Updates decode as datastream records when the
    /// resource is a datastream and as environment records otherwise.
    pub async fn subscribe<H>(
        &self,
        resource: impl Into<Resource>,
        handler: H,
    ) -> Result<(String, Completion), ClientError>
    where
        H: SubscriptionHandler,
    {
        self.subscribe_shared(resource, Arc::new(handler)).await
    }

    /// Like [`subscribe`](Self::subscribe) with an already shared handler.
    pub async fn subscribe_shared(
        &self,
        resource: impl Into<Resource>,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Result<(String, Completion), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let resource = resource.into();
        let token = Self::generate_token();
        let (ack, rx) = oneshot::channel();
        self.table
            .register_subscription(token.clone(), resource.clone(), handler, ack)?;

        let request = Request::new(token.clone(), Method::Subscribe, resource.path())
            .with_headers(self.headers.clone());
        if let Err(e) = self.conn.send(&request).await {
            self.table.remove(&token);
            return Err(e);
        }

        tracing::debug!("subscribed to {} token={}", resource, token);
        let completion =
            Completion::acknowledgement(token.clone(), rx, self.request_timeout, self.table.clone());
        Ok((token, completion))
    }

    /// Cancels a subscription.
    ///
    /// The handler stops receiving updates immediately, even for frames
    /// already in flight. The returned completion resolves with the
    /// server's acknowledgement of the `unsubscribe` frame.
    pub async fn unsubscribe(&self, token: &str) -> Result<Completion, ClientError> {
        if !self.is_connected() {
            if self.table.is_subscription(token) {
                self.table.remove(token);
                return Err(ClientError::NotConnected);
            }
            return Err(ClientError::UnknownSubscription(token.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        let (registration, entry) = self
            .table
            .begin_unsubscribe(token, tx)
            .ok_or_else(|| ClientError::UnknownSubscription(token.to_string()))?;
        let completion = Completion::reply(
            token.to_string(),
            registration,
            rx,
            self.request_timeout,
            self.table.clone(),
        );

        let request = Request::new(token, Method::Unsubscribe, entry.resource().path())
            .with_headers(self.headers.clone());
        self.conn.send(&request).await?;
        tracing::debug!("unsubscribed from {} token={}", entry.resource(), token);
        Ok(completion)
    }

    // =========================================================================
    // Convenience operations
    // =========================================================================

    /// Sends a `get` and waits for the reply.
    pub async fn get(&self, resource: &str) -> Result<Response, ClientError> {
        self.request(Method::Get, resource, None).await?.await
    }

    /// Sends a `put` and waits for the reply.
    pub async fn put(&self, resource: &str, body: impl Into<String>) -> Result<Response, ClientError> {
        self.request(Method::Put, resource, Some(body.into()))
            .await?
            .await
    }

    /// Sends a `post` and waits for the reply.
    pub async fn post(&self, resource: &str, body: impl Into<String>) -> Result<Response, ClientError> {
        self.request(Method::Post, resource, Some(body.into()))
            .await?
            .await
    }

    /// Sends a `delete` and waits for the reply.
    pub async fn delete(&self, resource: &str) -> Result<Response, ClientError> {
        self.request(Method::Delete, resource, None).await?.await
    }

    /// Reads a feed as an environment record.
    pub async fn read_feed(&self, feed_id: impl std::fmt::Display) -> Result<Record, ClientError> {
        let resource = Resource::feed(feed_id);
        let response = self.get(resource.path()).await?;
        if !response.is_success() {
            return Err(ClientError::UnexpectedStatus {
                status: response.status,
            });
        }
        Ok(Record::decode(resource.kind(), &response)?)
    }

    /// Creates a feed and returns its id, taken from the `LOCATION` header.
    pub async fn create_feed(&self, body: impl Into<String>) -> Result<String, ClientError> {
        let response = self.post("/feeds", body).await?;
        if !response.is_created() {
            return Err(ClientError::UnexpectedStatus {
                status: response.status,
            });
        }
        response
            .created_id()
            .map(str::to_string)
            .ok_or(ClientError::MissingLocation)
    }
}
