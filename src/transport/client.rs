//! Transport client: one duplex session with reconnection.
//!
//! The client is a cheap `Clone` handle. Connection state, the retry counter
//! and the live session share a single mutex. Each session owns two tokio
//! tasks: a writer draining the outbound queue in order, and a receive loop
//! that delivers inbound messages and drives reconnection after a failure.

use crate::error::{Error, Result};
use crate::transport::channel::{ConnectRequest, Connector, DuplexChannel, WireMessage};
use crate::transport::state::{ConnectionState, RetryPolicy};
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

const GOING_AWAY: &str = "client closing";

type ConnectedCallback = Arc<dyn Fn() + Send + Sync>;
type DisconnectedCallback = Arc<dyn Fn(Option<&Error>) + Send + Sync>;
type MessageCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Default)]
struct Callbacks {
    on_connected: Option<ConnectedCallback>,
    on_disconnected: Option<DisconnectedCallback>,
    on_message: Option<MessageCallback>,
}

struct Session {
    request: ConnectRequest,
    channel: Arc<dyn DuplexChannel>,
    outbound: mpsc::UnboundedSender<WireMessage>,
    cancel: CancellationToken,
}

struct Inner {
    state: ConnectionState,
    /// Mirrors `state` for observers outside the lock
    state_tx: watch::Sender<ConnectionState>,
    retry_count: u32,
    /// Bumped by every `connect` and `disconnect`; tasks of an older generation stand down
    generation: u64,
    session: Option<Session>,
}

impl Inner {
    fn set_state(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        if self.state != next {
            log::debug!("TransportClient: {} -> {}", self.state, next);
            self.state = next;
            self.state_tx.send_replace(next);
        }
    }
}

/// Puts a `connect` that never finished back to `Disconnected`, e.g. when its future is dropped.
struct ConnectGuard<'a> {
    shared: &'a Shared,
    generation: u64,
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        if inner.generation == self.generation && inner.state == ConnectionState::Connecting {
            inner.set_state(ConnectionState::Disconnected);
        }
    }
}

struct Shared {
    connector: Arc<dyn Connector>,
    options: TransportOptions,
    inner: Mutex<Inner>,
    callbacks: RwLock<Callbacks>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn callbacks(&self) -> std::sync::RwLockReadGuard<'_, Callbacks> {
        self.callbacks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fire_connected(&self) {
        let callback = self.callbacks().on_connected.clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    fn fire_disconnected(&self, error: Option<&Error>) {
        let callback = self.callbacks().on_disconnected.clone();
        if let Some(callback) = callback {
            callback(error);
        }
    }

    fn fire_message(&self, data: Bytes) {
        let callback = self.callbacks().on_message.clone();
        match callback {
            Some(callback) => callback(data),
            None => log::debug!("TransportClient: no consumer, {} bytes discarded", data.len()),
        }
    }

    async fn open_channel(&self, request: &ConnectRequest) -> Result<Arc<dyn DuplexChannel>> {
        match tokio::time::timeout(self.options.connect_timeout, self.connector.open(request)).await
        {
            Ok(result) => result,
            Err(_) => Err(Error::TransportConnect(format!(
                "{}: timed out after {:?}",
                request.url, self.options.connect_timeout
            ))),
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self
            .inner
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(session) = inner.session.take() {
            session.cancel.cancel();
        }
    }
}

#[derive(Clone)]
pub struct TransportClient {
    shared: Arc<Shared>,
}

impl TransportClient {
    pub fn new(connector: Arc<dyn Connector>, options: TransportOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                options,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    state_tx: watch::Sender::new(ConnectionState::Disconnected),
                    retry_count: 0,
                    generation: 0,
                    session: None,
                }),
                callbacks: RwLock::new(Callbacks::default()),
            }),
        }
    }

    pub fn set_on_connected<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks_mut().on_connected = Some(Arc::new(callback));
    }

    /// `None` for a deliberate disconnect, `Some` for a receive failure.
    pub fn set_on_disconnected<F>(&self, callback: F)
    where
        F: Fn(Option<&Error>) + Send + Sync + 'static,
    {
        self.callbacks_mut().on_disconnected = Some(Arc::new(callback));
    }

    /// Every inbound message; text arrives as its UTF-8 bytes.
    pub fn set_on_message_data<F>(&self, callback: F)
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        self.callbacks_mut().on_message = Some(Arc::new(callback));
    }

    fn callbacks_mut(&self) -> std::sync::RwLockWriteGuard<'_, Callbacks> {
        self.shared
            .callbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Retries spent since the last explicit `connect`.
    pub fn retry_count(&self) -> u32 {
        self.shared.lock().retry_count
    }

    /// Every state change, including `Failing` while a retry runs.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.lock().state_tx.subscribe()
    }

    /// Open the channel. A no-op while already connected or connecting.
    ///
    /// Failure leaves the client `Disconnected`; it is not retried.
    pub async fn connect(&self, url: &str, token: Option<&str>) -> Result<()> {
        let generation = {
            let mut inner = self.shared.lock();
            if matches!(
                inner.state,
                ConnectionState::Connected | ConnectionState::Connecting
            ) {
                log::debug!("TransportClient: connect ignored, already {}", inner.state);
                return Ok(());
            }
            if let Some(stale) = inner.session.take() {
                stale.cancel.cancel();
            }
            inner.set_state(ConnectionState::Connecting);
            inner.retry_count = 0;
            inner.generation += 1;
            inner.generation
        };
        let _guard = ConnectGuard {
            shared: &self.shared,
            generation,
        };

        let request = ConnectRequest::new(url, token.map(str::to_owned));
        log::info!("TransportClient: connecting to {}", request.url);

        match self.shared.open_channel(&request).await {
            Ok(channel) => {
                let accepted = {
                    let mut inner = self.shared.lock();
                    if inner.generation == generation {
                        let session = self.start_session(request, channel.clone(), generation);
                        inner.session = Some(session);
                        inner.set_state(ConnectionState::Connected);
                        true
                    } else {
                        false
                    }
                };
                if !accepted {
                    log::info!("TransportClient: connect superseded, closing channel");
                    let _ = channel.close(GOING_AWAY).await;
                    return Err(Error::TransportConnect("connect was cancelled".into()));
                }
                log::info!("TransportClient: connected");
                self.shared.fire_connected();
                Ok(())
            }
            Err(e) => {
                let mut inner = self.shared.lock();
                if inner.generation == generation {
                    inner.set_state(ConnectionState::Disconnected);
                }
                log::error!("TransportClient: connect failed: {}", e);
                Err(e)
            }
        }
    }

    fn start_session(
        &self,
        request: ConnectRequest,
        channel: Arc<dyn DuplexChannel>,
        generation: u64,
    ) -> Session {
        let cancel = CancellationToken::new();
        let outbound = spawn_writer(channel.clone(), cancel.clone());
        tokio::spawn(receive_loop(
            Arc::downgrade(&self.shared),
            channel.clone(),
            cancel.clone(),
            generation,
        ));
        Session {
            request,
            channel,
            outbound,
            cancel,
        }
    }

    /// Queue a text message. Returns `false` (and drops it) unless connected.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(WireMessage::Text(text.into()))
    }

    /// Queue a binary message. Returns `false` (and drops it) unless connected.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.send(WireMessage::Binary(data.into()))
    }

    fn send(&self, message: WireMessage) -> bool {
        let inner = self.shared.lock();
        if inner.state != ConnectionState::Connected {
            log::warn!(
                "TransportClient: {}, dropping {} byte message",
                inner.state,
                message.len()
            );
            return false;
        }
        match &inner.session {
            Some(session) => session.outbound.send(message).is_ok(),
            None => false,
        }
    }

    /// Close the session. Idempotent; `on_disconnected(None)` fires once per session.
    pub fn disconnect(&self) {
        let session = {
            let mut inner = self.shared.lock();
            inner.generation += 1;
            inner.set_state(ConnectionState::Disconnected);
            inner.retry_count = 0;
            inner.session.take()
        };
        let Some(session) = session else {
            return;
        };

        session.cancel.cancel();
        let channel = session.channel;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = channel.close(GOING_AWAY).await {
                        log::debug!("TransportClient: close failed: {}", e);
                    }
                });
            }
            Err(_) => log::debug!("TransportClient: no runtime, channel dropped without close"),
        }

        log::info!("TransportClient: disconnected");
        self.shared.fire_disconnected(None);
    }
}

fn spawn_writer(
    channel: Arc<dyn DuplexChannel>,
    cancel: CancellationToken,
) -> mpsc::UnboundedSender<WireMessage> {
    let (tx, mut rx) = mpsc::unbounded_channel::<WireMessage>();
    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            if let Err(e) = channel.send(message).await {
                log::error!("TransportClient: send failed: {}", e);
            }
        }
    });
    tx
}

async fn receive_loop(
    shared: Weak<Shared>,
    mut channel: Arc<dyn DuplexChannel>,
    cancel: CancellationToken,
    generation: u64,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => return,
            received = channel.recv() => received,
        };
        let Some(shared) = shared.upgrade() else {
            return;
        };

        match received {
            Ok(message) => {
                shared.fire_message(message.into_bytes());
            }
            Err(e) => {
                {
                    let mut inner = shared.lock();
                    if inner.generation != generation {
                        return;
                    }
                    inner.set_state(ConnectionState::Disconnected);
                }
                log::error!("TransportClient: receive failed: {}", e);
                shared.fire_disconnected(Some(&e));

                match reconnect(&shared, &cancel, generation).await {
                    Some(reopened) => channel = reopened,
                    None => return,
                }
            }
        }
    }
}

/// Retry opening the channel until it succeeds or the budget runs out.
async fn reconnect(
    shared: &Arc<Shared>,
    cancel: &CancellationToken,
    generation: u64,
) -> Option<Arc<dyn DuplexChannel>> {
    let policy = shared.options.retry;
    loop {
        let (attempt, request) = {
            let mut inner = shared.lock();
            if inner.generation != generation {
                return None;
            }
            if inner.retry_count >= policy.max_retries {
                log::error!(
                    "TransportClient: giving up after {} retries",
                    inner.retry_count
                );
                inner.session = None;
                inner.set_state(ConnectionState::Disconnected);
                return None;
            }
            inner.retry_count += 1;
            let request = inner.session.as_ref()?.request.clone();
            (inner.retry_count, request)
        };

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(policy.delay) => {}
        }

        {
            let mut inner = shared.lock();
            if inner.generation != generation {
                return None;
            }
            inner.set_state(ConnectionState::Failing);
        }
        log::info!(
            "TransportClient: retry {}/{} to {}",
            attempt,
            policy.max_retries,
            request.url
        );

        let opened = tokio::select! {
            _ = cancel.cancelled() => return None,
            opened = shared.open_channel(&request) => opened,
        };

        match opened {
            Ok(channel) => {
                {
                    let mut inner = shared.lock();
                    if inner.generation != generation {
                        return None;
                    }
                    let Some(session) = inner.session.as_mut() else {
                        return None;
                    };
                    session.outbound = spawn_writer(channel.clone(), session.cancel.clone());
                    session.channel = channel.clone();
                    inner.set_state(ConnectionState::Connected);
                }
                log::info!("TransportClient: reconnected on attempt {}", attempt);
                shared.fire_connected();
                return Some(channel);
            }
            Err(e) => {
                let mut inner = shared.lock();
                if inner.generation == generation {
                    inner.set_state(ConnectionState::Disconnected);
                }
                log::warn!("TransportClient: retry {} failed: {}", attempt, e);
            }
        }
    }
}
