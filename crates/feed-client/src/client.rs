use crate::config::FeedConfig;
use crate::protocol::{self, HistoryStyle, Inbound, Payload, Request, RequestKind};
use crate::{FeedError, Result};
use futures::stream::{self, Stream};
use futures::{SinkExt, StreamExt};
use market_data::{Candle, Tick};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type FeedStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Connected { url: String },
    Disconnected,
    Error(String),
}

struct PendingRequest {
    kind: RequestKind,
    reply: oneshot::Sender<Result<Inbound>>,
    /// Set for subscribe requests; registered under the subscription id once
    /// the feed acknowledges.
    ticks: Option<mpsc::UnboundedSender<Tick>>,
}

struct Connection {
    generation: u64,
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// State shared between the client handle, its subscriptions and the
/// reader task.
struct Shared {
    next_req_id: AtomicU64,
    next_generation: AtomicU64,
    connection: Mutex<Option<Connection>>,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    subscriptions: Mutex<HashMap<String, mpsc::UnboundedSender<Tick>>>,
    event_tx: mpsc::UnboundedSender<FeedEvent>,
}

impl Shared {
    fn new(event_tx: mpsc::UnboundedSender<FeedEvent>) -> Self {
        Self {
            next_req_id: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
            connection: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            event_tx,
        }
    }

    fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    fn outbound(&self) -> Option<mpsc::UnboundedSender<Message>> {
        self.connection.lock().as_ref().map(|c| c.outbound.clone())
    }

    fn emit(&self, event: FeedEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn request(
        &self,
        request: Request,
        ticks: Option<mpsc::UnboundedSender<Tick>>,
        wait: Duration,
    ) -> Result<Inbound> {
        let outbound = self.outbound().ok_or(FeedError::ConnectionClosed)?;
        let req_id = self.next_req_id.fetch_add(1, Ordering::Relaxed);
        let (reply, response) = oneshot::channel();

        self.pending.lock().insert(
            req_id,
            PendingRequest {
                kind: request.kind(),
                reply,
                ticks,
            },
        );

        debug!("Sending {:?} request {}", request.kind(), req_id);
        if outbound.send(Message::Text(request.encode(req_id))).is_err() {
            self.pending.lock().remove(&req_id);
            return Err(FeedError::ConnectionClosed);
        }

        match timeout(wait, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(FeedError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().remove(&req_id);
                warn!("Request {} got no response within {:?}", req_id, wait);
                Err(FeedError::Timeout(wait))
            }
        }
    }

    /// Routes one inbound text frame: live ticks to their subscription,
    /// everything else to the request waiting for it.
    fn dispatch(&self, text: &str) {
        let inbound = match protocol::decode(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("Undecodable feed message: {}", e);
                self.emit(FeedEvent::Error(e.to_string()));
                return;
            }
        };

        if let Payload::Tick {
            subscription_id: Some(id),
            tick,
        } = &inbound.payload
        {
            let mut subscriptions = self.subscriptions.lock();
            match subscriptions.get(id).map(|sender| sender.send(tick.clone()).is_ok()) {
                Some(true) => return,
                Some(false) => {
                    debug!("Subscriber for {} went away", id);
                    subscriptions.remove(id);
                    return;
                }
                None => {}
            }
        }

        match self.take_pending(&inbound) {
            Some(pending) => self.resolve(pending, inbound),
            None => match &inbound.payload {
                Payload::Error { message, .. } => {
                    warn!("Feed error: {}", message);
                    self.emit(FeedEvent::Error(message.clone()));
                }
                Payload::Tick { subscription_id, .. } => {
                    debug!("Dropping tick for unknown subscription {:?}", subscription_id);
                }
                _ => debug!("Unmatched {} message", inbound.msg_type),
            },
        }
    }

    fn take_pending(&self, inbound: &Inbound) -> Option<PendingRequest> {
        let mut pending = self.pending.lock();
        match inbound.req_id {
            Some(req_id) => pending.remove(&req_id),
            None => {
                let oldest = pending
                    .iter()
                    .filter(|(_, p)| p.kind.matches(&inbound.msg_type))
                    .map(|(id, _)| *id)
                    .min()?;
                pending.remove(&oldest)
            }
        }
    }

    fn resolve(&self, pending: PendingRequest, inbound: Inbound) {
        if let Payload::Error { message, code } = &inbound.payload {
            let _ = pending.reply.send(Err(FeedError::SubscriptionError {
                message: message.clone(),
                code: code.clone(),
            }));
            return;
        }

        if let (Payload::Tick { subscription_id: Some(id), tick }, Some(sender)) = (&inbound.payload, &pending.ticks) {
            self.subscriptions.lock().insert(id.clone(), sender.clone());
            let _ = sender.send(tick.clone());
        }

        if let Err(Ok(inbound)) = pending.reply.send(Ok(inbound)) {
            // requester already timed out
            if let Some(id) = inbound.subscription_id() {
                self.subscriptions.lock().remove(id);
            }
            debug!("Late {} response discarded", inbound.msg_type);
        }
    }

    fn on_transport_closed(&self, generation: u64) {
        let lost = {
            let mut slot = self.connection.lock();
            match slot.as_ref() {
                Some(connection) if connection.generation == generation => slot.take(),
                _ => None,
            }
        };

        if lost.is_some() {
            warn!("Feed connection lost");
            self.teardown();
        }
    }

    /// Invalidates every subscription and fails every in-flight request.
    fn teardown(&self) {
        let dropped = {
            let mut subscriptions = self.subscriptions.lock();
            let count = subscriptions.len();
            subscriptions.clear();
            count
        };

        let pending: Vec<PendingRequest> = self.pending.lock().drain().map(|(_, p)| p).collect();
        let failed = pending.len();
        for request in pending {
            let _ = request.reply.send(Err(FeedError::ConnectionClosed));
        }

        info!("Feed disconnected: {} subscriptions dropped, {} requests failed", dropped, failed);
        self.emit(FeedEvent::Disconnected);
    }
}

/// Client for the tick feed. One logical connection, opened lazily and
/// retried with exponential backoff. Subscriptions do not survive a
/// reconnect.
pub struct PriceFeedClient {
    config: FeedConfig,
    shared: Arc<Shared>,
    connect_lock: tokio::sync::Mutex<()>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<FeedEvent>>>,
}

impl PriceFeedClient {
    pub fn new(config: FeedConfig) -> Result<Self> {
        config.validate()?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            shared: Arc::new(Shared::new(event_tx)),
            connect_lock: tokio::sync::Mutex::new(()),
            event_rx: Mutex::new(Some(event_rx)),
        })
    }

    #[inline]
    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<FeedEvent>> {
        self.event_rx.lock().take()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Opens the connection unless one is already up.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            debug!("Feed already connected");
            return Ok(());
        }

        let url = self.config.connection_url()?;
        let attempts = self.config.max_retries;
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.config.retry_delay(attempt - 1);
                info!("Retrying feed connection in {:?} ({}/{})", delay, attempt + 1, attempts);
                sleep(delay).await;
            }

            info!("Connecting to feed: {}", url);
            match timeout(self.config.websocket_timeout(), connect_async(url.as_str())).await {
                Ok(Ok((stream, _response))) => {
                    self.attach(stream);
                    info!("Feed connected on attempt {}", attempt + 1);
                    self.shared.emit(FeedEvent::Connected { url: url.to_string() });
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!("Feed connection attempt {} failed: {}", attempt + 1, e);
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!("Feed connection attempt {} timed out", attempt + 1);
                    last_error = format!("handshake timed out after {:?}", self.config.websocket_timeout());
                }
            }
        }

        error!("Giving up on feed after {} attempts: {}", attempts, last_error);
        Err(FeedError::ConnectionFailed {
            attempts,
            reason: last_error,
        })
    }

    fn attach(&self, stream: FeedStream) {
        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
        let (mut sink, mut source) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    warn!("Feed write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // held across the spawn so the reader cannot report a close before
        // the connection is registered
        let mut slot = self.shared.connection.lock();
        let shared = Arc::clone(&self.shared);
        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => shared.dispatch(&text),
                    Ok(Message::Close(frame)) => {
                        info!("Feed closed by server: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Feed read failed: {}", e);
                        shared.emit(FeedEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
            shared.on_transport_closed(generation);
        });

        *slot = Some(Connection {
            generation,
            outbound,
            reader,
            writer,
        });
    }

    pub async fn subscribe(&self, symbol: &str) -> Result<Subscription> {
        self.connect().await?;

        let (ticks_tx, ticks_rx) = mpsc::unbounded_channel();
        let request = Request::Ticks {
            symbol: symbol.to_string(),
        };
        let response = self
            .shared
            .request(request, Some(ticks_tx), self.config.request_timeout())
            .await?;

        let id = response
            .subscription_id()
            .map(str::to_string)
            .ok_or_else(|| FeedError::Protocol(format!("subscription to {} returned no id", symbol)))?;

        info!("Subscribed to {} ({})", symbol, id);
        Ok(Subscription {
            id,
            symbol: symbol.to_string(),
            ticks: ticks_rx,
            shared: Arc::clone(&self.shared),
            request_timeout: self.config.request_timeout(),
            detached: false,
        })
    }

    pub async fn fetch_history(&self, symbol: &str, granularity: u32, count: u32) -> Result<Vec<Candle>> {
        self.connect().await?;

        let request = Request::TicksHistory {
            symbol: symbol.to_string(),
            style: HistoryStyle::Candles,
            granularity: Some(granularity),
            count,
        };
        let response = self.shared.request(request, None, self.config.request_timeout()).await?;
        match response.payload {
            Payload::Candles(candles) => {
                debug!("Fetched {} candles for {}", candles.len(), symbol);
                Ok(candles)
            }
            _ => Err(FeedError::Protocol(format!("expected candles, got {}", response.msg_type))),
        }
    }

    pub async fn fetch_tick_history(&self, symbol: &str, count: u32) -> Result<Vec<Tick>> {
        self.connect().await?;

        let request = Request::TicksHistory {
            symbol: symbol.to_string(),
            style: HistoryStyle::Ticks,
            granularity: None,
            count,
        };
        let response = self.shared.request(request, None, self.config.request_timeout()).await?;
        match response.payload {
            Payload::History { prices, times } => Ok(times
                .into_iter()
                .zip(prices)
                .map(|(epoch, quote)| Tick::new(symbol, quote, epoch))
                .collect()),
            _ => Err(FeedError::Protocol(format!("expected history, got {}", response.msg_type))),
        }
    }

    /// Closes the connection. Subscriptions end and pending requests fail
    /// with [`FeedError::ConnectionClosed`].
    pub async fn close(&self) {
        let _guard = self.connect_lock.lock().await;
        let connection = self.shared.connection.lock().take();
        let Some(connection) = connection else {
            return;
        };

        let _ = connection.outbound.send(Message::Close(None));
        connection.reader.abort();
        drop(connection.outbound);
        if timeout(Duration::from_secs(1), connection.writer).await.is_err() {
            debug!("Feed writer did not flush close frame in time");
        }

        info!("Feed connection closed");
        self.shared.teardown();
    }
}

impl Drop for PriceFeedClient {
    fn drop(&mut self) {
        let connection = self.shared.connection.lock().take();
        if let Some(connection) = connection {
            connection.reader.abort();
            connection.writer.abort();
            self.shared.teardown();
        }
    }
}

/// Live tick stream for one symbol. Dropping it without
/// [`unsubscribe`](Self::unsubscribe) still releases the feed subscription,
/// without waiting for the acknowledgement.
pub struct Subscription {
    id: String,
    symbol: String,
    ticks: mpsc::UnboundedReceiver<Tick>,
    shared: Arc<Shared>,
    request_timeout: Duration,
    detached: bool,
}

impl Subscription {
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Next tick, or `None` once the subscription has been invalidated.
    pub async fn recv(&mut self) -> Option<Tick> {
        self.ticks.recv().await
    }

    pub fn into_stream(self) -> impl Stream<Item = Tick> + Send + 'static {
        stream::unfold(self, |mut subscription| async move {
            subscription.recv().await.map(|tick| (tick, subscription))
        })
    }

    pub async fn unsubscribe(mut self) -> Result<()> {
        self.detached = true;
        self.shared.subscriptions.lock().remove(&self.id);
        if !self.shared.is_connected() {
            debug!("Subscription {} already ended with its connection", self.id);
            return Ok(());
        }

        let request = Request::Forget {
            subscription_id: self.id.clone(),
        };
        let response = self.shared.request(request, None, self.request_timeout).await?;
        match response.payload {
            Payload::Forget { succeeded: true } => {
                info!("Unsubscribed from {} ({})", self.symbol, self.id);
                Ok(())
            }
            _ => Err(FeedError::SubscriptionError {
                message: format!("feed did not release subscription {}", self.id),
                code: None,
            }),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.detached || self.shared.subscriptions.lock().remove(&self.id).is_none() {
            return;
        }

        if let Some(outbound) = self.shared.outbound() {
            let req_id = self.shared.next_req_id.fetch_add(1, Ordering::Relaxed);
            let request = Request::Forget {
                subscription_id: self.id.clone(),
            };
            let _ = outbound.send(Message::Text(request.encode(req_id)));
            debug!("Released subscription {} on drop", self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("symbol", &self.symbol)
            .finish()
    }
}
