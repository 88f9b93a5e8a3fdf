//! Channel connections.
//!
//! A connection binds one channel descriptor to a shared pub/sub client. It
//! tracks at most one live subscription and routes incoming envelopes to the
//! listeners registered with [`Connection::on`].
//!
//! Every asynchronous operation (`listen`, `stop`, `send`) is spawned on the
//! current Tokio runtime and reports its outcome through an optional
//! [`Callback`], invoked exactly once per call.

use crate::descriptor::ChannelDescriptor;
use crate::router::{ListenerId, MessageRouter};
use grid_protocol::Envelope;
use grid_transport::{ClientError, PubSubClient, Subscription};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// Completion for an asynchronous connection operation.
pub type Callback<T> = Box<dyn FnOnce(Result<T, ConnectionError>) + Send + 'static>;

type SubscriptionSlot = Arc<Mutex<Option<Arc<dyn Subscription>>>>;

/// Connection errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The channel descriptor is missing a field or is malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The client rejected the subscribe request.
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(#[source] ClientError),

    /// The client rejected the publish request.
    #[error("Publish failed: {0}")]
    PublishFailed(#[source] ClientError),

    /// There is no cancellable subscription to stop.
    #[error("No active subscription to stop")]
    NoActiveSubscription,

    /// The client failed to cancel the subscription.
    #[error("Cancel failed: {0}")]
    CancelFailed(#[source] ClientError),

    /// The operation was invoked outside a Tokio runtime.
    #[error("No Tokio runtime available")]
    NoRuntime,
}

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No live subscription.
    Idle,
    /// A subscription is held.
    Listening,
}

/// A callback-oriented connection to one channel.
pub struct Connection {
    descriptor: ChannelDescriptor,
    channel_name: String,
    client: Arc<dyn PubSubClient>,
    subscription: SubscriptionSlot,
    router: Arc<MessageRouter>,
}

impl Connection {
    /// Create a connection over a channel descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidArgument`] if the descriptor is
    /// missing its endpoint or identifier.
    pub fn new(
        descriptor: ChannelDescriptor,
        client: Arc<dyn PubSubClient>,
    ) -> Result<Self, ConnectionError> {
        descriptor
            .validate()
            .map_err(ConnectionError::InvalidArgument)?;

        let channel_name = descriptor.channel_name();
        debug!(channel = %channel_name, "Connection created");

        Ok(Self {
            descriptor,
            channel_name,
            client,
            subscription: Arc::new(Mutex::new(None)),
            router: Arc::new(MessageRouter::new()),
        })
    }

    /// Create a connection from a loosely-typed descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidArgument`] if the value is not a
    /// well-formed, complete descriptor.
    pub fn from_value(
        value: Value,
        client: Arc<dyn PubSubClient>,
    ) -> Result<Self, ConnectionError> {
        let descriptor =
            ChannelDescriptor::from_value(value).map_err(ConnectionError::InvalidArgument)?;
        Self::new(descriptor, client)
    }

    /// The descriptor this connection was built from.
    #[must_use]
    pub fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    /// The derived channel name.
    #[must_use]
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// The router incoming envelopes are dispatched through.
    #[must_use]
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Current state.
    ///
    /// A held subscription that the transport reports as closed is dropped
    /// here, returning the connection to [`ConnectionState::Idle`].
    pub fn state(&self) -> ConnectionState {
        let mut slot = lock(&self.subscription);
        if slot.as_ref().is_some_and(|s| s.is_closed()) {
            debug!(channel = %self.channel_name, "Subscription closed by transport");
            slot.take();
        }
        if slot.is_some() {
            ConnectionState::Listening
        } else {
            ConnectionState::Idle
        }
    }

    /// Whether a subscription is currently held.
    pub fn is_listening(&self) -> bool {
        self.state() == ConnectionState::Listening
    }

    /// Subscribe to the channel.
    ///
    /// On success the new subscription replaces any previously held one and
    /// `on_event` receives the client's subscribe response. On failure the
    /// held subscription is left untouched.
    ///
    /// Returns the spawned task, or `None` if no runtime was available (in
    /// which case `on_event` has already received [`ConnectionError::NoRuntime`]).
    pub fn listen(&self, on_event: Option<Callback<Value>>) -> Option<JoinHandle<()>> {
        let client = Arc::clone(&self.client);
        let slot = Arc::clone(&self.subscription);
        let channel = self.channel_name.clone();
        let handler = MessageRouter::handler(&self.router);

        self.spawn(
            async move {
                match client.subscribe(&channel, handler).await {
                    Ok(subscription) => {
                        let response = subscription.response().clone();
                        if lock(&slot).replace(subscription).is_some() {
                            debug!(channel = %channel, "Replaced previous subscription");
                        }
                        debug!(channel = %channel, "Listening");
                        Ok(response)
                    }
                    Err(e) => {
                        debug!(channel = %channel, error = %e, "Subscribe failed");
                        Err(ConnectionError::SubscribeFailed(e))
                    }
                }
            },
            on_event,
        )
    }

    /// Cancel the held subscription.
    ///
    /// The connection is idle once this is called, whatever the outcome.
    /// `on_done` receives [`ConnectionError::NoActiveSubscription`] if nothing
    /// was held or the held handle cannot be cancelled.
    pub fn stop(&self, on_done: Option<Callback<()>>) -> Option<JoinHandle<()>> {
        let current = lock(&self.subscription).take();
        let channel = self.channel_name.clone();

        self.spawn(
            async move {
                let Some(subscription) = current else {
                    return Err(ConnectionError::NoActiveSubscription);
                };
                if !subscription.is_cancellable() {
                    debug!(channel = %channel, "Held subscription cannot be cancelled");
                    return Err(ConnectionError::NoActiveSubscription);
                }
                let result = subscription
                    .cancel()
                    .await
                    .map_err(ConnectionError::CancelFailed);
                if result.is_ok() {
                    debug!(channel = %channel, "Stopped listening");
                }
                result
            },
            on_done,
        )
    }

    /// Publish a typed message to the channel.
    ///
    /// Does not require an active subscription. `on_ack` receives the
    /// client's acknowledgement.
    pub fn send(
        &self,
        type_tag: impl Into<String>,
        payload: Value,
        on_ack: Option<Callback<Value>>,
    ) -> Option<JoinHandle<()>> {
        let client = Arc::clone(&self.client);
        let channel = self.channel_name.clone();
        let envelope = Envelope::new(type_tag, payload);

        self.spawn(
            async move {
                client
                    .publish(&channel, envelope)
                    .await
                    .map_err(ConnectionError::PublishFailed)
            },
            on_ack,
        )
    }

    /// Register a listener for messages tagged `type_tag`.
    pub fn on<F>(&self, type_tag: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.router.on(type_tag, listener)
    }

    /// Remove a listener. Unknown listeners are ignored.
    pub fn off(&self, type_tag: &str, id: ListenerId) -> bool {
        self.router.off(type_tag, id)
    }

    /// Route an envelope to its listeners, as the transport does for each
    /// delivered message. Returns the number of listeners invoked.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        self.router.dispatch(envelope)
    }

    fn spawn<T, F>(&self, operation: F, callback: Option<Callback<T>>) -> Option<JoinHandle<()>>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, ConnectionError>> + Send + 'static,
    {
        match Handle::try_current() {
            Ok(runtime) => Some(runtime.spawn(async move {
                let result = operation.await;
                if let Some(callback) = callback {
                    callback(result);
                }
            })),
            Err(_) => {
                debug!(channel = %self.channel_name, "No runtime for connection operation");
                if let Some(callback) = callback {
                    callback(Err(ConnectionError::NoRuntime));
                }
                None
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("channel", &self.channel_name)
            .field("listening", &lock(&self.subscription).is_some())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use grid_transport::MessageHandler;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::oneshot;

    /// A client whose subscribe/publish outcomes are fixed up front.
    #[derive(Default)]
    struct StubClient {
        subscribe_error: Mutex<Option<&'static str>>,
        publish_error: Option<&'static str>,
        cancel_error: Option<&'static str>,
        subscribe_response: Value,
        not_cancellable: bool,
        handler: Mutex<Option<MessageHandler>>,
        subscriptions: Mutex<Vec<Arc<StubSubscription>>>,
        published: Mutex<Vec<(String, Envelope)>>,
    }

    struct StubSubscription {
        channel: String,
        response: Value,
        cancellable: bool,
        cancel_error: Option<&'static str>,
        cancelled: AtomicBool,
        closed: AtomicBool,
    }

    #[async_trait]
    impl PubSubClient for StubClient {
        async fn subscribe(
            &self,
            channel: &str,
            on_message: MessageHandler,
        ) -> Result<Arc<dyn Subscription>, ClientError> {
            if let Some(reason) = *self.subscribe_error.lock().unwrap() {
                return Err(ClientError::Rejected(reason.into()));
            }
            *self.handler.lock().unwrap() = Some(on_message);
            let subscription = Arc::new(StubSubscription {
                channel: channel.to_string(),
                response: self.subscribe_response.clone(),
                cancellable: !self.not_cancellable,
                cancel_error: self.cancel_error,
                cancelled: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            });
            self.subscriptions
                .lock()
                .unwrap()
                .push(Arc::clone(&subscription));
            Ok(subscription)
        }

        async fn publish(&self, channel: &str, envelope: Envelope) -> Result<Value, ClientError> {
            if let Some(reason) = self.publish_error {
                return Err(ClientError::Rejected(reason.into()));
            }
            self.published
                .lock()
                .unwrap()
                .push((channel.to_string(), envelope));
            Ok(json!("Message Sent Successfully"))
        }
    }

    #[async_trait]
    impl Subscription for StubSubscription {
        fn channel(&self) -> &str {
            &self.channel
        }

        fn response(&self) -> &Value {
            &self.response
        }

        fn is_cancellable(&self) -> bool {
            self.cancellable
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        async fn cancel(&self) -> Result<(), ClientError> {
            if let Some(reason) = self.cancel_error {
                return Err(ClientError::Other(reason.into()));
            }
            self.cancelled.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn capture<T: Send + 'static>() -> (
        Option<Callback<T>>,
        oneshot::Receiver<Result<T, ConnectionError>>,
    ) {
        let (tx, rx) = oneshot::channel();
        let callback: Callback<T> = Box::new(move |result| {
            let _ = tx.send(result);
        });
        (Some(callback), rx)
    }

    fn device(client: &Arc<StubClient>) -> Connection {
        let client: Arc<dyn PubSubClient> = Arc::clone(client) as Arc<dyn PubSubClient>;
        Connection::new(ChannelDescriptor::new("/devices", 15), client).unwrap()
    }

    #[test]
    fn test_construct_requires_descriptor_fields() {
        let client: Arc<dyn PubSubClient> = Arc::new(StubClient::default());

        for value in [
            Value::Null,
            json!({}),
            json!({"endpoint": "/devices"}),
            json!({"identifier": 15}),
            json!({"endpoint": "/devices", "identifier": ""}),
        ] {
            assert!(matches!(
                Connection::from_value(value, Arc::clone(&client)),
                Err(ConnectionError::InvalidArgument(_))
            ));
        }

        let connection =
            Connection::from_value(json!({"endpoint": "/devices", "identifier": 15}), client)
                .unwrap();
        assert_eq!(connection.channel_name(), "/devices/15");
        assert_eq!(connection.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_construct_with_unusual_identifiers() {
        let client: Arc<dyn PubSubClient> = Arc::new(StubClient::default());

        let connection =
            Connection::new(ChannelDescriptor::new("/devices", "café"), Arc::clone(&client))
                .unwrap();
        assert_eq!(connection.channel_name(), "/devices/café");

        let tabbed =
            Connection::new(ChannelDescriptor::new("/devices", "room\tA"), Arc::clone(&client));
        assert!(tabbed.is_ok());

        let long = "a".repeat(300);
        let connection = Connection::new(ChannelDescriptor::new("/spaces", &long), client).unwrap();
        assert_eq!(connection.channel_name().len(), "/spaces/".len() + 300);
    }

    #[tokio::test]
    async fn test_listen_rejected() {
        let client = Arc::new(StubClient {
            subscribe_error: Mutex::new(Some("error")),
            ..Default::default()
        });
        let connection = device(&client);

        let (callback, rx) = capture();
        connection.listen(callback);

        assert!(matches!(
            rx.await.unwrap(),
            Err(ConnectionError::SubscribeFailed(_))
        ));
        assert_eq!(connection.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_listen_resolved() {
        let client = Arc::new(StubClient {
            subscribe_response: json!("Resolved Message"),
            ..Default::default()
        });
        let connection = device(&client);

        let (callback, rx) = capture();
        connection.listen(callback);

        assert_eq!(rx.await.unwrap().unwrap(), json!("Resolved Message"));
        assert_eq!(connection.state(), ConnectionState::Listening);
        assert_eq!(client.subscriptions.lock().unwrap()[0].channel, "/devices/15");
    }

    #[tokio::test]
    async fn test_listen_without_callback() {
        let client = Arc::new(StubClient::default());
        let connection = device(&client);

        connection.listen(None).unwrap().await.unwrap();
        assert!(connection.is_listening());
    }

    #[tokio::test]
    async fn test_delivered_messages_reach_listeners() {
        let client = Arc::new(StubClient::default());
        let connection = device(&client);

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        connection.on("data", move |payload| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(payload.clone());
            }
        });

        connection.listen(None).unwrap().await.unwrap();
        let handler = client.handler.lock().unwrap().clone().unwrap();
        handler(Envelope::new("data", json!({"foo": "bar"})));

        assert_eq!(rx.await.unwrap(), json!({"foo": "bar"}));
    }

    #[tokio::test]
    async fn test_stop_without_listen() {
        let connection = device(&Arc::new(StubClient::default()));

        let (callback, rx) = capture();
        connection.stop(callback);

        assert!(matches!(
            rx.await.unwrap(),
            Err(ConnectionError::NoActiveSubscription)
        ));
    }

    #[tokio::test]
    async fn test_stop_after_listen() {
        let client = Arc::new(StubClient::default());
        let connection = device(&client);
        connection.listen(None).unwrap().await.unwrap();

        let (callback, rx) = capture();
        connection.stop(callback);

        assert!(rx.await.unwrap().is_ok());
        assert_eq!(connection.state(), ConnectionState::Idle);
        assert!(client.subscriptions.lock().unwrap()[0]
            .cancelled
            .load(Ordering::SeqCst));

        let (callback, rx) = capture();
        connection.stop(callback);
        assert!(matches!(
            rx.await.unwrap(),
            Err(ConnectionError::NoActiveSubscription)
        ));
    }

    #[tokio::test]
    async fn test_stop_non_cancellable_subscription() {
        let client = Arc::new(StubClient {
            not_cancellable: true,
            ..Default::default()
        });
        let connection = device(&client);
        connection.listen(None).unwrap().await.unwrap();

        let (callback, rx) = capture();
        connection.stop(callback);

        assert!(matches!(
            rx.await.unwrap(),
            Err(ConnectionError::NoActiveSubscription)
        ));
        assert_eq!(connection.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_stop_cancel_failure_leaves_idle() {
        let client = Arc::new(StubClient {
            cancel_error: Some("transport gone"),
            ..Default::default()
        });
        let connection = device(&client);
        connection.listen(None).unwrap().await.unwrap();

        let (callback, rx) = capture();
        connection.stop(callback);

        assert!(matches!(
            rx.await.unwrap(),
            Err(ConnectionError::CancelFailed(_))
        ));
        assert_eq!(connection.state(), ConnectionState::Idle);

        // Reusable after a failure.
        connection.listen(None).unwrap().await.unwrap();
        assert!(connection.is_listening());
    }

    #[tokio::test]
    async fn test_relisten_last_subscription_wins() {
        let client = Arc::new(StubClient::default());
        let connection = device(&client);

        connection.listen(None).unwrap().await.unwrap();
        connection.listen(None).unwrap().await.unwrap();
        connection.stop(None).unwrap().await.unwrap();

        let subscriptions = client.subscriptions.lock().unwrap();
        assert_eq!(subscriptions.len(), 2);
        assert!(!subscriptions[0].cancelled.load(Ordering::SeqCst));
        assert!(subscriptions[1].cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_relisten_keeps_subscription() {
        let client = Arc::new(StubClient::default());
        let connection = device(&client);
        connection.listen(None).unwrap().await.unwrap();

        *client.subscribe_error.lock().unwrap() = Some("error");
        let (callback, rx) = capture();
        connection.listen(callback);
        assert!(matches!(
            rx.await.unwrap(),
            Err(ConnectionError::SubscribeFailed(_))
        ));
        assert!(connection.is_listening());

        let (callback, rx) = capture();
        connection.stop(callback);
        assert!(rx.await.unwrap().is_ok());
        assert!(client.subscriptions.lock().unwrap()[0]
            .cancelled
            .load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_transport_closed_subscription_is_idle() {
        let client = Arc::new(StubClient::default());
        let connection = device(&client);
        connection.listen(None).unwrap().await.unwrap();

        client.subscriptions.lock().unwrap()[0]
            .closed
            .store(true, Ordering::SeqCst);

        assert_eq!(connection.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_send_rejected() {
        let client = Arc::new(StubClient {
            publish_error: Some("Can't send this message now"),
            ..Default::default()
        });
        let connection = device(&client);

        let (callback, rx) = capture();
        connection.send("data", json!({"foo": "bar"}), callback);

        assert!(matches!(
            rx.await.unwrap(),
            Err(ConnectionError::PublishFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_send_resolved_without_subscription() {
        let client = Arc::new(StubClient::default());
        let connection = device(&client);

        let (callback, rx) = capture();
        connection.send("data", json!({"foo": "bar"}), callback);

        assert_eq!(
            rx.await.unwrap().unwrap(),
            json!("Message Sent Successfully")
        );

        let published = client.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "/devices/15");
        assert_eq!(published[0].1, Envelope::new("data", json!({"foo": "bar"})));
    }

    #[test]
    fn test_dispatch_and_off() {
        let connection = device(&Arc::new(StubClient::default()));
        let hits = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&hits);
        let id = connection.on("data", move |payload| sink.lock().unwrap().push(payload.clone()));

        assert_eq!(connection.dispatch(&Envelope::new("data", json!({"foo": "bar"}))), 1);
        assert_eq!(connection.dispatch(&Envelope::new("other", json!(0))), 0);

        assert!(connection.off("data", id));
        assert_eq!(connection.dispatch(&Envelope::new("data", json!(1))), 0);
        assert_eq!(*hits.lock().unwrap(), vec![json!({"foo": "bar"})]);
    }

    #[test]
    fn test_operations_without_runtime() {
        let connection = device(&Arc::new(StubClient::default()));

        let (callback, mut rx) = capture();
        assert!(connection.listen(callback).is_none());
        assert!(matches!(rx.try_recv(), Ok(Err(ConnectionError::NoRuntime))));

        let (callback, mut rx) = capture();
        assert!(connection.send("data", Value::Null, callback).is_none());
        assert!(matches!(rx.try_recv(), Ok(Err(ConnectionError::NoRuntime))));
    }
}
