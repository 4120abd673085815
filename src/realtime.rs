//! Realtime event client.
//!
//! One persistent WebSocket per process, owned by a spawned dispatch task.
//! The task is the only writer of the status cache and the only place
//! connection state changes: commands from the handle and transport frames
//! are multiplexed through a single loop, so no event handler ever calls
//! back into the connection re-entrantly.
//!
//! A `listen_installation` call resolves only after the `DEVICE_STATE_END`
//! sentinel, guaranteeing the caller observes a fully-populated snapshot.
//! Subscription retries are capped at 5 consecutive failures; a successful
//! subscription resets the counter.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::client::AirzoneClient;
use crate::logger::MessageLogger;
use crate::protocol::{
    EMIT_AUTH, EMIT_CLEAR_LISTENERS, EMIT_LISTEN_INSTALLATION, EMIT_LISTEN_WS, EVT_DEVICE_STATE,
    EVT_DEVICE_STATE_END, EVT_DEVICES_UPDATES, EVT_USERS_UPDATE, ServerFrame, emission,
    parse_frame,
};
use crate::status::{DeviceStatus, StatusCache, delta_from_value};
use crate::types::Units;
use crate::{Config, Error, Result, SubscriptionError};

const RECONNECT_CEILING: u8 = 5;
const RECONNECT_DELAY: Duration = Duration::from_millis(250);
const LISTEN_TIMEOUT: Duration = Duration::from_secs(30);
const COMMAND_QUEUE: usize = 16;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type StatusMap = HashMap<String, DeviceStatus>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenTarget {
    Installation(String),
    Webserver(String),
}

impl ListenTarget {
    fn event(&self) -> &'static str {
        match self {
            ListenTarget::Installation(_) => EMIT_LISTEN_INSTALLATION,
            ListenTarget::Webserver(_) => EMIT_LISTEN_WS,
        }
    }

    fn id(&self) -> &str {
        match self {
            ListenTarget::Installation(id) | ListenTarget::Webserver(id) => id,
        }
    }

    /// Installation subscriptions start with a snapshot that ends in a
    /// `DEVICE_STATE_END` sentinel; webserver subscriptions do not.
    fn awaits_snapshot(&self) -> bool {
        matches!(self, ListenTarget::Installation(_))
    }
}

enum Command {
    Connect {
        done: oneshot::Sender<Result<()>>,
    },
    Listen {
        target: ListenTarget,
        done: oneshot::Sender<Result<StatusMap>>,
    },
    ClearListeners {
        done: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
}

enum AckKind {
    Auth,
    Clear(Option<oneshot::Sender<Result<()>>>),
    Listen,
}

struct PendingListen {
    done: oneshot::Sender<Result<StatusMap>>,
    awaits_snapshot: bool,
}

/// Handle to the realtime dispatch task.
pub struct EventListener {
    cmd_tx: mpsc::Sender<Command>,
    cache: Arc<RwLock<StatusCache>>,
    cancel: CancellationToken,
}

impl EventListener {
    /// Spawn the dispatch task against the client's websocket endpoint.
    /// Token updates from the client are picked up on every reconnect.
    pub fn spawn(client: Arc<AirzoneClient>, config: &Config) -> Result<Self> {
        let ws_url = client.ws_url()?;
        Self::spawn_at(ws_url, client, config)
    }

    /// Spawn against an explicit websocket URL (custom endpoints, tests).
    pub fn spawn_at(ws_url: Url, client: Arc<AirzoneClient>, config: &Config) -> Result<Self> {
        let logger = match config.message_log {
            Some(ref log) => Some(MessageLogger::new(log.mode, &log.path)?),
            None => None,
        };
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let cache = Arc::new(RwLock::new(StatusCache::default()));
        let cancel = CancellationToken::new();

        let dispatcher = Dispatcher {
            ws_url,
            token_rx: client.token_watch(),
            client,
            cache: Arc::clone(&cache),
            logger,
            conn: None,
            listening: None,
            pending: None,
            acks: HashMap::new(),
            attempts: 0,
        };
        let task_cancel = cancel.clone();
        tokio::spawn(dispatcher.run(cmd_rx, task_cancel));

        Ok(Self {
            cmd_tx,
            cache,
            cancel,
        })
    }

    pub async fn connect(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Connect { done }).await?;
        rx.await.map_err(|_| Error::ListenerClosed)?
    }

    /// Subscribe to an installation. Resolves with the accumulated
    /// per-device status map once the initial snapshot is complete.
    pub async fn listen_installation(&self, installation_id: &str) -> Result<StatusMap> {
        self.listen(ListenTarget::Installation(installation_id.to_string()))
            .await
    }

    /// Subscribe to a webserver. No snapshot sentinel is defined for this
    /// target; resolves on subscription acknowledgement.
    pub async fn listen_webserver(&self, webserver_id: &str) -> Result<()> {
        self.listen(ListenTarget::Webserver(webserver_id.to_string()))
            .await?;
        Ok(())
    }

    async fn listen(&self, target: ListenTarget) -> Result<StatusMap> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Listen { target, done }).await?;
        match tokio::time::timeout(LISTEN_TIMEOUT, rx).await {
            Ok(result) => result.map_err(|_| Error::ListenerClosed)?,
            Err(_) => Err(Error::Connection("listen timed out".to_string())),
        }
    }

    pub async fn clear_listeners(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(Command::ClearListeners { done }).await?;
        rx.await.map_err(|_| Error::ListenerClosed)?
    }

    /// Close the transport. The remembered listen target is kept, so a
    /// later reconnect resumes the subscription.
    pub async fn disconnect(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Disconnect { done }).await?;
        rx.await.map_err(|_| Error::ListenerClosed)
    }

    /// Stop the dispatch task entirely.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Snapshot of one device's last known status.
    pub fn status(&self, device_id: &str) -> Option<DeviceStatus> {
        self.cache
            .read()
            .expect("status cache lock poisoned")
            .get(device_id)
            .cloned()
    }

    /// Snapshot of the whole cache.
    pub fn statuses(&self) -> StatusMap {
        self.cache
            .read()
            .expect("status cache lock poisoned")
            .snapshot()
    }

    /// Account display units, as last pushed by a `USERS.update` event.
    pub fn display_units(&self) -> Option<Units> {
        self.cache
            .read()
            .expect("status cache lock poisoned")
            .display_units()
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| Error::ListenerClosed)
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Input {
    Cancelled,
    Cmd(Option<Command>),
    Frame(Option<std::result::Result<Message, tungstenite::Error>>),
}

enum DialError {
    Unauthorized,
    Other(String),
}

struct Dispatcher {
    ws_url: Url,
    client: Arc<AirzoneClient>,
    token_rx: watch::Receiver<Option<String>>,
    cache: Arc<RwLock<StatusCache>>,
    logger: Option<MessageLogger>,
    conn: Option<WsStream>,
    /// Remembered subscription target, retried across reconnects.
    listening: Option<ListenTarget>,
    pending: Option<PendingListen>,
    acks: HashMap<String, AckKind>,
    /// Consecutive subscription failures for the current target.
    attempts: u8,
}

impl Dispatcher {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
        loop {
            let input = match self.conn.as_mut() {
                Some(ws) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Input::Cancelled,
                        cmd = cmd_rx.recv() => Input::Cmd(cmd),
                        frame = ws.next() => Input::Frame(frame),
                    }
                }
                None => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Input::Cancelled,
                        cmd = cmd_rx.recv() => Input::Cmd(cmd),
                    }
                }
            };

            match input {
                Input::Cancelled => break,
                Input::Cmd(None) => break,
                Input::Cmd(Some(cmd)) => self.handle_command(cmd).await,
                Input::Frame(frame) => self.handle_frame(frame).await,
            }
        }

        debug!("realtime dispatch loop exiting");
    }

    // -- Commands --

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { done } => {
                let result = self.ensure_connected().await;
                let _ = done.send(result);
            }
            Command::Listen { target, done } => {
                self.listening = Some(target.clone());
                self.attempts = 0;
                match self.subscribe(&target).await {
                    Ok(()) => {
                        self.pending = Some(PendingListen {
                            done,
                            awaits_snapshot: target.awaits_snapshot(),
                        });
                    }
                    Err(e) => {
                        self.listening = None;
                        let _ = done.send(Err(e));
                    }
                }
            }
            Command::ClearListeners { done } => {
                self.listening = None;
                self.attempts = 0;
                match self.emit(EMIT_CLEAR_LISTENERS, vec![]).await {
                    Ok(ack) => {
                        self.acks.insert(ack, AckKind::Clear(Some(done)));
                    }
                    Err(e) => {
                        let _ = done.send(Err(e));
                    }
                }
            }
            Command::Disconnect { done } => {
                self.close_transport().await;
                info!("realtime transport closed");
                let _ = done.send(());
            }
        }
    }

    // -- Connection --

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let current = self.token_rx.borrow().clone();
        let token = match current {
            Some(token) => token,
            None => self.client.ensure_token().await?,
        };

        match self.dial(&token).await {
            Ok(ws) => {
                self.conn = Some(ws);
            }
            Err(DialError::Unauthorized) => {
                // Transport-level 401: refresh via the HTTP client before
                // reconnecting.
                warn!("websocket handshake unauthorized, refreshing token");
                let token = self.client.renew_token().await?;
                let ws = self
                    .dial(&token)
                    .await
                    .map_err(|e| match e {
                        DialError::Unauthorized => {
                            Error::Auth("websocket unauthorized after token recovery".to_string())
                        }
                        DialError::Other(reason) => Error::Connection(reason),
                    })?;
                self.conn = Some(ws);
                return self.authenticate(&token).await;
            }
            Err(DialError::Other(reason)) => return Err(Error::Connection(reason)),
        }

        self.authenticate(&token).await
    }

    async fn dial(&self, token: &str) -> std::result::Result<WsStream, DialError> {
        let mut url = self.ws_url.clone();
        url.query_pairs_mut().clear().append_pair("jwt", token);
        debug!(url = %self.ws_url, "connecting websocket");

        let uri: tungstenite::http::Uri = url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| DialError::Other(e.to_string()))?;
        let request = ClientRequestBuilder::new(uri)
            .with_header("Authorization", format!("Bearer {token}"));

        match tokio_tungstenite::connect_async(request).await {
            Ok((ws, _response)) => {
                info!("websocket connected");
                Ok(ws)
            }
            Err(tungstenite::Error::Http(response))
                if response.status() == tungstenite::http::StatusCode::UNAUTHORIZED =>
            {
                Err(DialError::Unauthorized)
            }
            Err(e) => Err(DialError::Other(e.to_string())),
        }
    }

    /// Explicit challenge-response on top of the handshake token.
    async fn authenticate(&mut self, token: &str) -> Result<()> {
        let ack = self.emit(EMIT_AUTH, vec![json!(token)]).await?;
        self.acks.insert(ack, AckKind::Auth);
        Ok(())
    }

    async fn close_transport(&mut self) {
        if let Some(mut ws) = self.conn.take() {
            let _ = ws.close(None).await;
        }
    }

    async fn emit(&mut self, event: &str, args: Vec<Value>) -> Result<String> {
        let ws = self
            .conn
            .as_mut()
            .ok_or_else(|| Error::Connection("not connected".to_string()))?;
        let (ack, frame) = emission(event, args.clone());
        if let Some(ref mut logger) = self.logger {
            logger.log_emission(event, &Value::Array(args));
        }
        debug!(event, %ack, "emit");
        ws.send(Message::Text(frame.into()))
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        Ok(ack)
    }

    // -- Subscription --

    /// Clear server-side filters and subscribe to the target. The cache is
    /// reset: the snapshot that follows repopulates it from scratch.
    async fn subscribe(&mut self, target: &ListenTarget) -> Result<()> {
        self.ensure_connected().await?;

        let clear_ack = self.emit(EMIT_CLEAR_LISTENERS, vec![]).await?;
        self.acks.insert(clear_ack, AckKind::Clear(None));

        self.cache
            .write()
            .expect("status cache lock poisoned")
            .clear();

        info!(id = target.id(), event = target.event(), "listen");
        let ack = self.emit(target.event(), vec![json!(target.id())]).await?;
        self.acks.insert(ack, AckKind::Listen);
        Ok(())
    }

    /// Reconnect-and-resubscribe loop, bounded by the retry ceiling.
    /// Exceeding the ceiling abandons the subscription and resets the
    /// counter; a fresh listen request starts over.
    async fn retry_subscription(&mut self) {
        self.close_transport().await;
        let Some(target) = self.listening.clone() else {
            return;
        };

        loop {
            self.attempts += 1;
            if self.attempts > RECONNECT_CEILING {
                error!(
                    id = target.id(),
                    "subscription retry ceiling reached, abandoning"
                );
                self.attempts = 0;
                self.listening = None;
                if let Some(pending) = self.pending.take() {
                    let _ = pending.done.send(Err(Error::Connection(
                        "subscription retry ceiling reached".to_string(),
                    )));
                }
                return;
            }

            info!(attempt = self.attempts, id = target.id(), "reconnecting");
            tokio::time::sleep(RECONNECT_DELAY).await;
            match self.subscribe(&target).await {
                // The listen ack (or the next transport error) decides
                // whether this attempt actually succeeded.
                Ok(()) => return,
                Err(e) => {
                    warn!(attempt = self.attempts, "reconnect failed: {e}");
                    self.close_transport().await;
                }
            }
        }
    }

    // -- Frames --

    async fn handle_frame(
        &mut self,
        frame: Option<std::result::Result<Message, tungstenite::Error>>,
    ) {
        match frame {
            Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                Ok(frame) => self.dispatch_frame(frame).await,
                Err(e) => warn!("dropping unparseable frame: {e}"),
            },
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => {
                warn!("websocket closed by server");
                self.retry_subscription_after_drop().await;
            }
            Some(Err(e)) => {
                warn!("websocket error: {e}");
                self.retry_subscription_after_drop().await;
            }
            Some(Ok(_)) => {} // binary frames are not part of the protocol
        }
    }

    async fn retry_subscription_after_drop(&mut self) {
        self.conn = None;
        self.acks.clear();
        if self.listening.is_some() {
            self.retry_subscription().await;
        }
    }

    async fn dispatch_frame(&mut self, frame: ServerFrame) {
        if let Some(ack) = frame.ack.clone() {
            self.handle_ack(&ack, frame.error.map(|e| e.id)).await;
            return;
        }
        match frame.event.as_deref() {
            Some(event) => self.handle_event(event, &frame.args),
            None => warn!("dropping frame with neither event nor ack"),
        }
    }

    async fn handle_ack(&mut self, ack: &str, error: Option<String>) {
        let Some(kind) = self.acks.remove(ack) else {
            debug!(ack, "ack for unknown emission");
            return;
        };

        match kind {
            AckKind::Auth => {
                if let Some(id) = error {
                    error!(code = %id, "realtime authentication rejected");
                    self.fail_subscription_structurally(&id);
                }
            }
            AckKind::Clear(done) => {
                let result = match error {
                    Some(id) => {
                        warn!(code = %id, "clear_listeners rejected");
                        Err(subscription_error(&id))
                    }
                    None => Ok(()),
                };
                if let Some(done) = done {
                    let _ = done.send(result);
                }
            }
            AckKind::Listen => match error {
                None => {
                    // Subscription confirmed.
                    self.attempts = 0;
                    let resolve_now = self.pending.as_ref().is_some_and(|p| !p.awaits_snapshot);
                    if resolve_now
                        && let Some(pending) = self.pending.take()
                    {
                        let snapshot = self
                            .cache
                            .read()
                            .expect("status cache lock poisoned")
                            .snapshot();
                        let _ = pending.done.send(Ok(snapshot));
                    }
                    // Installation targets keep waiting for DEVICE_STATE_END.
                }
                Some(id) if SubscriptionError::from_id(&id).is_some() => {
                    self.fail_subscription_structurally(&id);
                }
                Some(id) => {
                    warn!(code = %id, "subscription failed, scheduling retry");
                    self.retry_subscription().await;
                }
            },
        }
    }

    /// `tooManyConnections` / `notAuthorized`: misconfiguration, not retried.
    fn fail_subscription_structurally(&mut self, id: &str) {
        error!(code = %id, "subscription rejected");
        self.listening = None;
        self.attempts = 0;
        if let Some(pending) = self.pending.take() {
            let _ = pending.done.send(Err(subscription_error(id)));
        }
    }

    fn handle_event(&mut self, event: &str, args: &[Value]) {
        let payload = args.first().cloned().unwrap_or(Value::Null);
        match event {
            EVT_DEVICE_STATE => self.apply_device_event(event, &payload, true),
            EVT_DEVICES_UPDATES => self.apply_device_event(event, &payload, false),
            EVT_DEVICE_STATE_END => {
                debug!("device state snapshot complete");
                if let Some(pending) = self.pending.take() {
                    if pending.awaits_snapshot {
                        let snapshot = self
                            .cache
                            .read()
                            .expect("status cache lock poisoned")
                            .snapshot();
                        let _ = pending.done.send(Ok(snapshot));
                    } else {
                        self.pending = Some(pending);
                    }
                }
            }
            EVT_USERS_UPDATE => {
                if let Some(units) = payload
                    .get("units")
                    .and_then(Value::as_u64)
                    .and_then(|code| Units::try_from(code as u8).ok())
                {
                    self.cache
                        .write()
                        .expect("status cache lock poisoned")
                        .set_display_units(units);
                    debug!(?units, "display units updated");
                }
            }
            other => warn!(event = other, "dropping unknown event"),
        }
    }

    fn apply_device_event(&mut self, event: &str, payload: &Value, full_state: bool) {
        let Some(device_id) = payload.get("device_id").and_then(Value::as_str) else {
            warn!(event, "device event without device_id");
            return;
        };
        let delta = match delta_from_value(payload) {
            Ok(delta) => delta,
            Err(e) => {
                warn!(event, device_id, "dropping malformed delta: {e}");
                return;
            }
        };

        let changed = {
            let mut cache = self.cache.write().expect("status cache lock poisoned");
            if full_state {
                cache.apply_state(device_id, &delta)
            } else {
                cache.apply_update(device_id, &delta)
            }
        };

        if !changed.is_empty() {
            debug!(event, device_id, ?changed, "status updated");
        }
        if let Some(ref mut logger) = self.logger {
            logger.log_event(event, Some(device_id), payload, &changed);
        }
    }
}

fn subscription_error(id: &str) -> Error {
    match SubscriptionError::from_id(id) {
        Some(e) => Error::Subscription(e),
        None => Error::Connection(format!("subscription error: {id}")),
    }
}
