//! Phoenix channels transport
//!
//! Frames use the v2 JSON serializer, an array of
//! `[join_ref, ref, topic, event, payload]`. Media events travel as the
//! `mediaEvent` channel event with payload `{"data": <serialized event>}`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::ConnectOptions;
use crate::error::TransportError;
use crate::model::endpoint::Metadata;
use crate::transport::{EventTransport, TransportEvent, TransportHandler};

const PROTOCOL_VERSION: &str = "2.0.0";
const MEDIA_EVENT: &str = "mediaEvent";
const HEARTBEAT_TOPIC: &str = "phoenix";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type JoinReply = oneshot::Sender<Result<(), TransportError>>;

/// One Phoenix protocol frame.
#[derive(Debug, Clone, PartialEq)]
struct Frame {
    join_ref: Option<String>,
    msg_ref: Option<String>,
    topic: String,
    event: String,
    payload: Value,
}

impl Frame {
    fn new(
        join_ref: Option<&str>,
        msg_ref: Option<String>,
        topic: &str,
        event: &str,
        payload: Value,
    ) -> Self {
        Self {
            join_ref: join_ref.map(str::to_string),
            msg_ref,
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
        }
    }

    fn encode(&self) -> String {
        json!([
            self.join_ref,
            self.msg_ref,
            self.topic,
            self.event,
            self.payload
        ])
        .to_string()
    }

    fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        let (join_ref, msg_ref, topic, event, payload) = serde_json::from_str(raw)?;
        Ok(Self {
            join_ref,
            msg_ref,
            topic,
            event,
            payload,
        })
    }

    fn into_message(self) -> Message {
        Message::Text(self.encode().into())
    }
}

/// Interpret the payload of a `phx_reply` to the join request.
fn join_result(payload: &Value) -> Result<(), TransportError> {
    match payload.get("status").and_then(Value::as_str) {
        Some("ok") => Ok(()),
        Some("error") => Err(TransportError::Unauthorized(
            payload
                .get("response")
                .map(Value::to_string)
                .unwrap_or_default(),
        )),
        other => Err(TransportError::Connection(format!(
            "unexpected join reply status {other:?}"
        ))),
    }
}

struct Connection {
    join_ref: String,
    outgoing: mpsc::UnboundedSender<Message>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

/// [`EventTransport`] over a Phoenix channel.
pub struct PhoenixTransport {
    url: Url,
    topic: String,
    channel_params: Metadata,
    join_timeout: Duration,
    heartbeat_interval: Duration,
    refs: Arc<AtomicU64>,
    connection: Mutex<Option<Connection>>,
}

impl PhoenixTransport {
    /// Create a transport for the socket at `url`, joining `topic`.
    ///
    /// `socket_params` are appended to the socket URL query, `channel_params`
    /// are sent with the join request.
    pub fn new(
        url: &str,
        topic: impl Into<String>,
        socket_params: &Metadata,
        channel_params: Metadata,
        options: &ConnectOptions,
    ) -> Result<Self, TransportError> {
        if options.heartbeat_interval.is_zero() {
            return Err(TransportError::Connection(
                "heartbeat interval must be positive".to_string(),
            ));
        }
        if options.join_timeout.is_zero() {
            return Err(TransportError::Connection(
                "join timeout must be positive".to_string(),
            ));
        }

        Ok(Self {
            url: socket_url(url, socket_params)?,
            topic: topic.into(),
            channel_params,
            join_timeout: options.join_timeout,
            heartbeat_interval: options.heartbeat_interval,
            refs: Arc::new(AtomicU64::new(1)),
            connection: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn next_ref(&self) -> String {
        next_ref(&self.refs)
    }
}

fn next_ref(refs: &AtomicU64) -> String {
    refs.fetch_add(1, Ordering::Relaxed).to_string()
}

/// Build the websocket URL, e.g. `ws://host/socket/websocket?vsn=2.0.0&token=..`.
fn socket_url(url: &str, params: &Metadata) -> Result<Url, TransportError> {
    let mut url = Url::parse(url).map_err(|e| TransportError::Connection(e.to_string()))?;

    match url.scheme() {
        "ws" | "wss" => {}
        "http" | "https" => {
            let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
            url.set_scheme(scheme)
                .map_err(|_| TransportError::Connection(format!("invalid socket url {url}")))?;
        }
        other => {
            return Err(TransportError::Connection(format!(
                "unsupported url scheme `{other}`"
            )))
        }
    }

    if !url.path().ends_with("/websocket") {
        let path = format!("{}/websocket", url.path().trim_end_matches('/'));
        url.set_path(&path);
    }

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("vsn", PROTOCOL_VERSION);
        for (key, value) in params {
            match value {
                Value::String(s) => query.append_pair(key, s),
                other => query.append_pair(key, &other.to_string()),
            };
        }
    }

    Ok(url)
}

async fn write_loop(
    mut sink: SplitSink<Socket, Message>,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    heartbeat_interval: Duration,
    refs: Arc<AtomicU64>,
) {
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.tick().await;

    loop {
        let message = tokio::select! {
            message = outgoing.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = heartbeat.tick() => Frame::new(
                None,
                Some(next_ref(&refs)),
                HEARTBEAT_TOPIC,
                "heartbeat",
                json!({}),
            )
            .into_message(),
        };

        if let Err(e) = sink.send(message).await {
            warn!("Failed to write to socket: {}", e);
            break;
        }
    }

    let _ = sink.close().await;
}

async fn read_loop(
    mut stream: SplitStream<Socket>,
    topic: String,
    join_ref: String,
    mut join_reply: Option<JoinReply>,
    handler: TransportHandler,
) {
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                debug!("Socket closed by remote: {:?}", frame);
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                match join_reply.take() {
                    Some(reply) => {
                        let _ = reply.send(Err(TransportError::Connection(e.to_string())));
                    }
                    None => {
                        let _ = handler.send(TransportEvent::Error(e.to_string()));
                    }
                }
                return;
            }
        };

        let frame = match Frame::decode(text.as_str()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping malformed frame: {}", e);
                continue;
            }
        };

        if frame.topic != topic {
            trace!("Ignoring frame for topic {}: {}", frame.topic, frame.event);
            continue;
        }

        match frame.event.as_str() {
            "phx_reply" if frame.msg_ref.as_deref() == Some(join_ref.as_str()) => {
                if let Some(reply) = join_reply.take() {
                    let result = join_result(&frame.payload);
                    let joined = result.is_ok();
                    let _ = reply.send(result);
                    if !joined {
                        return;
                    }
                }
            }
            MEDIA_EVENT => match frame.payload.get("data").and_then(Value::as_str) {
                Some(data) => {
                    let _ = handler.send(TransportEvent::Event(data.to_string()));
                }
                None => warn!("Media event without data: {}", frame.payload),
            },
            "phx_error" => {
                let reason = format!("channel {topic} crashed");
                match join_reply.take() {
                    Some(reply) => {
                        let _ = reply.send(Err(TransportError::Connection(reason)));
                        return;
                    }
                    None => {
                        let _ = handler.send(TransportEvent::Error(reason));
                    }
                }
            }
            "phx_close" => break,
            other => trace!("Ignoring channel event {}", other),
        }
    }

    // Dropping a pending join reply fails the handshake in `connect`.
    if join_reply.is_none() {
        let _ = handler.send(TransportEvent::Closed);
    }
}

#[async_trait]
impl EventTransport for PhoenixTransport {
    async fn connect(&self, handler: TransportHandler) -> Result<(), TransportError> {
        let mut connection = self.connection.lock().await;
        if connection.is_some() {
            warn!("Transport already connected to {}", self.topic);
            return Ok(());
        }

        info!("Connecting to {}", self.url);
        let (socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let (sink, stream) = socket.split();

        let join_ref = self.next_ref();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (join_tx, join_rx) = oneshot::channel();

        let writer = tokio::spawn(write_loop(
            sink,
            outgoing_rx,
            self.heartbeat_interval,
            self.refs.clone(),
        ));
        let reader = tokio::spawn(read_loop(
            stream,
            self.topic.clone(),
            join_ref.clone(),
            Some(join_tx),
            handler,
        ));

        let join = Frame::new(
            Some(&join_ref),
            Some(join_ref.clone()),
            &self.topic,
            "phx_join",
            Value::Object(self.channel_params.clone()),
        );
        let result = match outgoing.send(join.into_message()) {
            Err(_) => Err(TransportError::Connection(
                "socket writer stopped before the join was sent".to_string(),
            )),
            Ok(()) => match timeout(self.join_timeout, join_rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(TransportError::Connection(
                    "socket closed before the join was acknowledged".to_string(),
                )),
                Err(_) => Err(TransportError::Connection(format!(
                    "joining {} timed out after {:?}",
                    self.topic, self.join_timeout
                ))),
            },
        };

        match result {
            Ok(()) => {
                info!("Joined channel {}", self.topic);
                *connection = Some(Connection {
                    join_ref,
                    outgoing,
                    writer,
                    reader,
                });
                Ok(())
            }
            Err(e) => {
                warn!("Failed to join channel {}: {}", self.topic, e);
                reader.abort();
                writer.abort();
                Err(e)
            }
        }
    }

    async fn send(&self, event: String) -> Result<(), TransportError> {
        let connection = self.connection.lock().await;
        let Some(connection) = connection.as_ref() else {
            return Err(TransportError::Closed);
        };

        let frame = Frame::new(
            Some(&connection.join_ref),
            Some(self.next_ref()),
            &self.topic,
            MEDIA_EVENT,
            json!({ "data": event }),
        );

        connection
            .outgoing
            .send(frame.into_message())
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(connection) = self.connection.lock().await.take() else {
            return Ok(());
        };

        let leave = Frame::new(
            Some(&connection.join_ref),
            Some(self.next_ref()),
            &self.topic,
            "phx_leave",
            json!({}),
        );
        let _ = connection.outgoing.send(leave.into_message());
        let _ = connection.outgoing.send(Message::Close(None));
        drop(connection.outgoing);

        connection.reader.abort();
        if timeout(Duration::from_secs(1), connection.writer).await.is_err() {
            debug!("Socket writer did not flush in time");
        }

        info!("Left channel {}", self.topic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    fn params(value: Value) -> Metadata {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn builds_socket_url() {
        let url = socket_url(
            "http://localhost:4000/socket",
            &params(json!({"token": "abc", "n": 1})),
        )
        .unwrap();

        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), "/socket/websocket");
        assert_eq!(url.query(), Some("vsn=2.0.0&n=1&token=abc"));

        assert!(socket_url("ftp://localhost", &Metadata::new()).is_err());
    }

    #[test]
    fn frames_are_arrays() {
        let frame = Frame::new(Some("1"), Some("2".into()), "room:a", "phx_join", json!({}));
        assert_eq!(frame.encode(), r#"["1","2","room:a","phx_join",{}]"#);

        let decoded = Frame::decode(r#"[null,"7","phoenix","phx_reply",{"status":"ok"}]"#).unwrap();
        assert_eq!(decoded.join_ref, None);
        assert_eq!(decoded.msg_ref.as_deref(), Some("7"));
        assert_eq!(decoded.topic, "phoenix");
    }

    #[test]
    fn join_reply_status() {
        assert_eq!(join_result(&json!({"status": "ok", "response": {}})), Ok(()));
        assert!(matches!(
            join_result(&json!({"status": "error", "response": {"reason": "unauthorized"}})),
            Err(TransportError::Unauthorized(reason)) if reason.contains("unauthorized")
        ));
    }

    /// How the test server answers the join request.
    #[derive(Clone, Copy)]
    enum JoinAnswer {
        Status(&'static str),
        Silent,
        Hangup,
    }

    /// Accept one socket and answer the join. When the join succeeds push one
    /// media event and return the first media event sent by the client.
    async fn serve_once(listener: TcpListener, answer: JoinAnswer) -> Option<String> {
        let (stream, _) = listener.accept().await.ok()?;
        let mut socket = tokio_tungstenite::accept_async(stream).await.ok()?;

        let join = loop {
            if let Message::Text(text) = socket.next().await?.ok()? {
                break Frame::decode(text.as_str()).ok()?;
            }
        };
        assert_eq!(join.event, "phx_join");

        let status = match answer {
            JoinAnswer::Status(status) => status,
            JoinAnswer::Silent => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                return None;
            }
            JoinAnswer::Hangup => {
                let _ = socket.close(None).await;
                return None;
            }
        };

        let reply = Frame::new(
            join.join_ref.as_deref(),
            join.msg_ref.clone(),
            &join.topic,
            "phx_reply",
            json!({"status": status, "response": {}}),
        );
        socket.send(reply.into_message()).await.ok()?;
        if status != "ok" {
            return None;
        }

        let push = Frame::new(
            join.join_ref.as_deref(),
            None,
            &join.topic,
            MEDIA_EVENT,
            json!({"data": r#"{"type":"connected"}"#}),
        );
        socket.send(push.into_message()).await.ok()?;

        loop {
            if let Message::Text(text) = socket.next().await?.ok()? {
                let frame = Frame::decode(text.as_str()).ok()?;
                if frame.event == MEDIA_EVENT {
                    return frame.payload["data"].as_str().map(str::to_string);
                }
            }
        }
    }

    async fn start_server(answer: JoinAnswer, options: &ConnectOptions) -> PhoenixTransport {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_once(listener, answer));

        PhoenixTransport::new(
            &format!("ws://{addr}/socket"),
            "room:test",
            &Metadata::new(),
            Metadata::new(),
            options,
        )
        .unwrap()
    }

    /// After a failed join the handler sees no events and is dropped.
    async fn assert_handler_silent(events: &mut mpsc::UnboundedReceiver<TransportEvent>) {
        let next = timeout(Duration::from_secs(1), events.recv()).await;
        assert_eq!(next, Ok(None));
    }

    #[tokio::test]
    async fn joins_and_exchanges_media_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_once(listener, JoinAnswer::Status("ok")));

        let transport = PhoenixTransport::new(
            &format!("ws://{addr}/socket"),
            "room:test",
            &Metadata::new(),
            Metadata::new(),
            &ConnectOptions::default(),
        )
        .unwrap();

        let (handler, mut events) = mpsc::unbounded_channel();
        transport.connect(handler).await.unwrap();

        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Event(r#"{"type":"connected"}"#.to_string()))
        );

        transport.send("hello".to_string()).await.unwrap();
        assert_eq!(server.await.unwrap().as_deref(), Some("hello"));

        transport.disconnect().await.unwrap();
        assert_eq!(
            transport.send("late".to_string()).await,
            Err(TransportError::Closed)
        );
    }

    #[tokio::test]
    async fn rejected_join_is_unauthorized() {
        let transport = start_server(JoinAnswer::Status("error"), &ConnectOptions::default()).await;

        let (handler, mut events) = mpsc::unbounded_channel();
        let result = transport.connect(handler).await;
        assert!(matches!(result, Err(TransportError::Unauthorized(_))));
        assert_handler_silent(&mut events).await;
    }

    #[tokio::test]
    async fn unanswered_join_times_out() {
        let options = ConnectOptions {
            join_timeout: Duration::from_millis(100),
            ..ConnectOptions::default()
        };
        let transport = start_server(JoinAnswer::Silent, &options).await;

        let (handler, mut events) = mpsc::unbounded_channel();
        let result = transport.connect(handler).await;
        assert!(matches!(result, Err(TransportError::Connection(reason)) if reason.contains("timed out")));
        assert_handler_silent(&mut events).await;

        assert_eq!(
            transport.send("late".to_string()).await,
            Err(TransportError::Closed)
        );
    }

    #[tokio::test]
    async fn socket_closed_during_join_is_a_connection_error() {
        let options = ConnectOptions {
            join_timeout: Duration::from_secs(2),
            ..ConnectOptions::default()
        };
        let transport = start_server(JoinAnswer::Hangup, &options).await;

        let (handler, mut events) = mpsc::unbounded_channel();
        let result = transport.connect(handler).await;
        assert!(
            matches!(&result, Err(TransportError::Connection(reason)) if !reason.contains("timed out")),
            "unexpected result {result:?}"
        );
        assert_handler_silent(&mut events).await;
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let heartbeat = ConnectOptions::from_json(r#"{"heartbeatInterval": 0}"#).unwrap();
        let join = ConnectOptions {
            join_timeout: Duration::ZERO,
            ..ConnectOptions::default()
        };

        for options in [heartbeat, join] {
            let result = PhoenixTransport::new(
                "ws://localhost/socket",
                "room:test",
                &Metadata::new(),
                Metadata::new(),
                &options,
            );
            assert!(matches!(result, Err(TransportError::Connection(_))));
        }
    }
}
