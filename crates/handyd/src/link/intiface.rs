//! Intiface hub link: Buttplug JSON messages (message version 3) over WebSocket.
//!
//! Architecture: reactor pattern, one task per hub connection.
//! - The reactor owns the socket
//! - Requests flow in through an mpsc channel
//! - Replies are routed back through oneshot channels keyed by message `Id`
//! - Server-initiated messages (`Id` 0) become [`LinkEvent`]s
//!
//! Every Buttplug frame is a JSON array of single-key objects:
//! `[{"LinearCmd": {"Id": 7, "DeviceIndex": 0, "Vectors": [...]}}]`.

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use handyconf::HubConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, trace, warn};

use super::{DeviceHandle, DeviceLink, LinkError, LinkEvent, LinkEvents, EVENT_BUFFER};

/// Buttplug message version we speak.
const MESSAGE_VERSION: u32 = 3;

// ============================================================================
// Wire messages
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct IdOnly {
    id: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RequestServerInfo {
    id: u32,
    client_name: String,
    message_version: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct LinearCmd {
    id: u32,
    device_index: u32,
    vectors: Vec<LinearVector>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct LinearVector {
    index: u32,
    duration: u32,
    position: f64,
}

/// Messages this client sends. Serializes as `{"Name": {...}}`.
#[derive(Debug, Serialize)]
enum ClientMessage {
    RequestServerInfo(RequestServerInfo),
    StartScanning(IdOnly),
    StopScanning(IdOnly),
    RequestDeviceList(IdOnly),
    LinearCmd(LinearCmd),
    Ping(IdOnly),
}

impl ClientMessage {
    fn id(&self) -> u32 {
        match self {
            ClientMessage::RequestServerInfo(m) => m.id,
            ClientMessage::LinearCmd(m) => m.id,
            ClientMessage::StartScanning(m)
            | ClientMessage::StopScanning(m)
            | ClientMessage::RequestDeviceList(m)
            | ClientMessage::Ping(m) => m.id,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ClientMessage::RequestServerInfo(_) => "RequestServerInfo",
            ClientMessage::StartScanning(_) => "StartScanning",
            ClientMessage::StopScanning(_) => "StopScanning",
            ClientMessage::RequestDeviceList(_) => "RequestDeviceList",
            ClientMessage::LinearCmd(_) => "LinearCmd",
            ClientMessage::Ping(_) => "Ping",
        }
    }

    fn to_frame(&self) -> Result<String, LinkError> {
        serde_json::to_string(&[self]).map_err(|e| LinkError::Protocol(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdBody {
    id: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorBody {
    id: u32,
    error_message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServerInfoBody {
    id: u32,
    #[serde(default)]
    server_name: String,
    #[serde(default)]
    max_ping_time: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeviceBody {
    device_name: String,
    device_index: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeviceListBody {
    id: u32,
    devices: Vec<DeviceBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeviceRemovedBody {
    device_index: u32,
}

/// A decoded server message.
#[derive(Debug, PartialEq)]
enum ServerMessage {
    Ok { id: u32 },
    Error { id: u32, message: String },
    ServerInfo { id: u32, name: String, max_ping_time: u64 },
    DeviceList { id: u32, devices: Vec<DeviceHandle> },
    DeviceAdded(DeviceHandle),
    DeviceRemoved { index: u32 },
    ScanningFinished,
    /// Anything we do not act on (sensor readings, future messages).
    Unhandled(String),
}

impl ServerMessage {
    /// Reply correlation id, if this message answers a request.
    fn reply_id(&self) -> Option<u32> {
        match self {
            ServerMessage::Ok { id }
            | ServerMessage::Error { id, .. }
            | ServerMessage::ServerInfo { id, .. }
            | ServerMessage::DeviceList { id, .. } => Some(*id),
            _ => None,
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(name: &str, body: Value) -> Result<T, LinkError> {
    serde_json::from_value(body).map_err(|e| LinkError::Protocol(format!("{}: {}", name, e)))
}

/// Decode one text frame into its messages.
fn parse_frame(text: &str) -> Result<Vec<ServerMessage>, LinkError> {
    let objects: Vec<Map<String, Value>> =
        serde_json::from_str(text).map_err(|e| LinkError::Protocol(e.to_string()))?;

    let mut messages = Vec::with_capacity(objects.len());
    for object in objects {
        for (name, body) in object {
            let message = match name.as_str() {
                "Ok" => ServerMessage::Ok {
                    id: decode::<IdBody>(&name, body)?.id,
                },
                "Error" => {
                    let e: ErrorBody = decode(&name, body)?;
                    ServerMessage::Error {
                        id: e.id,
                        message: e.error_message,
                    }
                }
                "ServerInfo" => {
                    let info: ServerInfoBody = decode(&name, body)?;
                    ServerMessage::ServerInfo {
                        id: info.id,
                        name: info.server_name,
                        max_ping_time: info.max_ping_time,
                    }
                }
                "DeviceList" => {
                    let list: DeviceListBody = decode(&name, body)?;
                    ServerMessage::DeviceList {
                        id: list.id,
                        devices: list
                            .devices
                            .into_iter()
                            .map(|d| DeviceHandle::new(d.device_index, d.device_name))
                            .collect(),
                    }
                }
                "DeviceAdded" => {
                    let d: DeviceBody = decode(&name, body)?;
                    ServerMessage::DeviceAdded(DeviceHandle::new(d.device_index, d.device_name))
                }
                "DeviceRemoved" => ServerMessage::DeviceRemoved {
                    index: decode::<DeviceRemovedBody>(&name, body)?.device_index,
                },
                "ScanningFinished" => ServerMessage::ScanningFinished,
                _ => ServerMessage::Unhandled(name),
            };
            messages.push(message);
        }
    }
    Ok(messages)
}

// ============================================================================
// Reactor
// ============================================================================

/// Successful reply payloads.
#[derive(Debug)]
enum Reply {
    Ok,
    ServerInfo { name: String, max_ping_time: u64 },
    DeviceList(Vec<DeviceHandle>),
}

type ReplySender = oneshot::Sender<Result<Reply, LinkError>>;

enum ReactorCommand {
    Request {
        message: ClientMessage,
        reply: ReplySender,
    },
    /// Start the keepalive the server asked for in `ServerInfo`.
    StartPing(Duration),
    /// Close the socket without reporting a hub loss.
    Close { done: oneshot::Sender<()> },
}

struct PendingRequest {
    reply: ReplySender,
    deadline: Instant,
}

/// The reactor task - owns the socket, handles all I/O.
async fn reactor_task<S>(
    mut socket: S,
    mut cmd_rx: mpsc::Receiver<ReactorCommand>,
    events: mpsc::Sender<LinkEvent>,
    ids: Arc<AtomicU32>,
    request_timeout: Duration,
    endpoint: String,
) where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    let mut pending: HashMap<u32, PendingRequest> = HashMap::new();
    let mut cleanup_interval = tokio::time::interval(Duration::from_secs(1));
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut ping_interval: Option<tokio::time::Interval> = None;

    debug!(endpoint = %endpoint, "hub reactor started");

    let lost_reason = loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ReactorCommand::Request { message, reply }) => {
                        let id = message.id();
                        let frame = match message.to_frame() {
                            Ok(frame) => frame,
                            Err(e) => {
                                let _ = reply.send(Err(e));
                                continue;
                            }
                        };
                        trace!(id, message = message.name(), "sending to hub");

                        if let Err(e) = socket.send(Message::Text(frame)).await {
                            let _ = reply.send(Err(LinkError::Transport(e.to_string())));
                            break format!("send failed: {}", e);
                        }
                        pending.insert(id, PendingRequest {
                            reply,
                            deadline: Instant::now() + request_timeout,
                        });
                    }
                    Some(ReactorCommand::StartPing(every)) => {
                        let mut interval = tokio::time::interval(every);
                        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                        ping_interval = Some(interval);
                    }
                    Some(ReactorCommand::Close { done }) => {
                        let _ = socket.close().await;
                        fail_pending(&mut pending, || LinkError::NotConnected);
                        let _ = done.send(());
                        debug!(endpoint = %endpoint, "hub reactor closed on request");
                        return;
                    }
                    None => {
                        let _ = socket.close().await;
                        fail_pending(&mut pending, || LinkError::NotConnected);
                        return;
                    }
                }
            }

            frame = socket.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                        Ok(messages) => {
                            for message in messages {
                                route_message(message, &mut pending, &events);
                            }
                        }
                        Err(e) => warn!(endpoint = %endpoint, "undecodable hub frame: {}", e),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        break "hub closed the connection".to_string()
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("receive failed: {}", e),
                }
            }

            _ = async {
                match ping_interval.as_mut() {
                    Some(interval) => interval.tick().await,
                    None => std::future::pending().await,
                }
            } => {
                let id = next_id(&ids);
                match ClientMessage::Ping(IdOnly { id }).to_frame() {
                    Ok(frame) => {
                        if let Err(e) = socket.send(Message::Text(frame)).await {
                            break format!("ping failed: {}", e);
                        }
                    }
                    Err(e) => warn!("ping encode failed: {}", e),
                }
            }

            _ = cleanup_interval.tick() => {
                let now = Instant::now();
                let expired: Vec<u32> = pending
                    .iter()
                    .filter(|(_, req)| now > req.deadline)
                    .map(|(id, _)| *id)
                    .collect();

                for id in expired {
                    if let Some(req) = pending.remove(&id) {
                        debug!(id, "hub request expired");
                        let _ = req.reply.send(Err(LinkError::Timeout(request_timeout)));
                    }
                }
            }
        }
    };

    warn!(endpoint = %endpoint, reason = %lost_reason, "hub connection lost");
    fail_pending(&mut pending, || LinkError::Transport(lost_reason.clone()));
    if events
        .send(LinkEvent::HubDisconnected { reason: lost_reason })
        .await
        .is_err()
    {
        warn!("event receiver dropped; hub loss not delivered");
    }
}

fn fail_pending(pending: &mut HashMap<u32, PendingRequest>, error: impl Fn() -> LinkError) {
    for (_, req) in pending.drain() {
        let _ = req.reply.send(Err(error()));
    }
}

fn route_message(
    message: ServerMessage,
    pending: &mut HashMap<u32, PendingRequest>,
    events: &mpsc::Sender<LinkEvent>,
) {
    if let Some(id) = message.reply_id().filter(|id| *id != 0) {
        let Some(req) = pending.remove(&id) else {
            // Keepalive acks land here too.
            trace!(id, "reply with no waiting request");
            return;
        };
        let result = match message {
            ServerMessage::Ok { .. } => Ok(Reply::Ok),
            ServerMessage::Error { message, .. } => Err(LinkError::Rejected(message)),
            ServerMessage::ServerInfo {
                name,
                max_ping_time,
                ..
            } => Ok(Reply::ServerInfo {
                name,
                max_ping_time,
            }),
            ServerMessage::DeviceList { devices, .. } => Ok(Reply::DeviceList(devices)),
            other => Err(LinkError::Protocol(format!("{:?}", other))),
        };
        let _ = req.reply.send(result);
        return;
    }

    let event = match message {
        ServerMessage::DeviceAdded(device) => LinkEvent::DeviceAdded(device),
        ServerMessage::DeviceRemoved { index } => LinkEvent::DeviceRemoved { index },
        ServerMessage::ScanningFinished => {
            debug!("hub finished scanning");
            return;
        }
        ServerMessage::Error { message, .. } => {
            warn!("hub error: {}", message);
            return;
        }
        other => {
            trace!("ignoring hub message {:?}", other);
            return;
        }
    };

    if let Err(e) = events.try_send(event) {
        warn!("dropping hub notification: {}", e);
    }
}

/// Message ids start at 1; 0 is reserved for server-initiated messages.
fn next_id(ids: &AtomicU32) -> u32 {
    loop {
        let id = ids.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

// ============================================================================
// Link
// ============================================================================

struct Connection {
    endpoint: String,
    cmd_tx: mpsc::Sender<ReactorCommand>,
}

/// [`DeviceLink`] that talks to an Intiface Central / Engine server.
pub struct IntifaceLink {
    client_name: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    events: mpsc::Sender<LinkEvent>,
    ids: Arc<AtomicU32>,
    connection: Option<Connection>,
}

impl IntifaceLink {
    /// Create a disconnected link and its notification stream.
    pub fn new(hub: &HubConfig) -> (Self, LinkEvents) {
        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        let link = Self {
            client_name: hub.client_name.clone(),
            connect_timeout: Duration::from_millis(hub.connect_timeout_ms),
            request_timeout: Duration::from_millis(hub.request_timeout_ms),
            events,
            ids: Arc::new(AtomicU32::new(1)),
            connection: None,
        };
        (link, rx)
    }

    async fn request(
        &self,
        build: impl FnOnce(u32) -> ClientMessage,
    ) -> Result<Reply, LinkError> {
        let conn = self.connection.as_ref().ok_or(LinkError::NotConnected)?;
        request_on(&conn.cmd_tx, build(next_id(&self.ids)), self.request_timeout).await
    }

    /// Spawn a reactor for `socket` and run the handshake on it.
    async fn attach<S>(&mut self, socket: S, endpoint: &str) -> Result<(), LinkError>
    where
        S: Stream<Item = Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Unpin
            + Send
            + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        tokio::spawn(reactor_task(
            socket,
            cmd_rx,
            self.events.clone(),
            Arc::clone(&self.ids),
            self.request_timeout,
            endpoint.to_string(),
        ));

        match self.handshake(&cmd_tx).await {
            Ok(()) => {
                self.connection = Some(Connection {
                    endpoint: endpoint.to_string(),
                    cmd_tx,
                });
                Ok(())
            }
            Err(e) => {
                close_reactor(&cmd_tx, self.request_timeout).await;
                Err(e)
            }
        }
    }

    async fn handshake(&self, cmd_tx: &mpsc::Sender<ReactorCommand>) -> Result<(), LinkError> {
        let hello = ClientMessage::RequestServerInfo(RequestServerInfo {
            id: next_id(&self.ids),
            client_name: self.client_name.clone(),
            message_version: MESSAGE_VERSION,
        });

        match request_on(cmd_tx, hello, self.request_timeout).await? {
            Reply::ServerInfo {
                name,
                max_ping_time,
            } => {
                info!(server = %name, max_ping_time, "hub handshake complete");
                if max_ping_time > 0 {
                    // Ping at half the server's deadline.
                    let every = Duration::from_millis((max_ping_time / 2).max(1));
                    let _ = cmd_tx.send(ReactorCommand::StartPing(every)).await;
                }
            }
            other => {
                return Err(LinkError::Protocol(format!(
                    "expected ServerInfo, got {:?}",
                    other
                )))
            }
        }

        // Devices the hub already knows about are announced like fresh finds.
        let list = ClientMessage::RequestDeviceList(IdOnly {
            id: next_id(&self.ids),
        });
        if let Reply::DeviceList(devices) = request_on(cmd_tx, list, self.request_timeout).await? {
            for device in devices {
                if let Err(e) = self.events.try_send(LinkEvent::DeviceAdded(device)) {
                    warn!("dropping known-device notification: {}", e);
                }
            }
        }

        Ok(())
    }
}

async fn request_on(
    cmd_tx: &mpsc::Sender<ReactorCommand>,
    message: ClientMessage,
    timeout: Duration,
) -> Result<Reply, LinkError> {
    let (reply, rx) = oneshot::channel();
    cmd_tx
        .send(ReactorCommand::Request { message, reply })
        .await
        .map_err(|_| LinkError::NotConnected)?;

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(LinkError::NotConnected),
        Err(_) => Err(LinkError::Timeout(timeout)),
    }
}

async fn close_reactor(cmd_tx: &mpsc::Sender<ReactorCommand>, timeout: Duration) {
    let (done, rx) = oneshot::channel();
    if cmd_tx.send(ReactorCommand::Close { done }).await.is_ok() {
        let _ = tokio::time::timeout(timeout, rx).await;
    }
}

fn expect_ok(reply: Reply, what: &str) -> Result<(), LinkError> {
    match reply {
        Reply::Ok => Ok(()),
        other => Err(LinkError::Protocol(format!("{}: expected Ok, got {:?}", what, other))),
    }
}

#[async_trait]
impl DeviceLink for IntifaceLink {
    async fn connect(&mut self, endpoints: &[String]) -> Result<String, LinkError> {
        if let Some(conn) = &self.connection {
            if !conn.cmd_tx.is_closed() {
                return Ok(conn.endpoint.clone());
            }
            self.connection = None;
        }

        let mut attempted = Vec::new();
        let mut failures = Vec::new();

        for endpoint in endpoints {
            attempted.push(endpoint.clone());
            info!(endpoint = %endpoint, "connecting to hub");

            let socket = match tokio::time::timeout(
                self.connect_timeout,
                tokio_tungstenite::connect_async(endpoint.as_str()),
            )
            .await
            {
                Ok(Ok((socket, _response))) => socket,
                Ok(Err(e)) => {
                    warn!(endpoint = %endpoint, "hub connect failed: {}", e);
                    failures.push(format!("{}: {}", endpoint, e));
                    continue;
                }
                Err(_) => {
                    warn!(endpoint = %endpoint, "hub connect timed out");
                    failures.push(format!("{}: timed out", endpoint));
                    continue;
                }
            };

            match self.attach(socket, endpoint).await {
                Ok(()) => return Ok(endpoint.clone()),
                Err(e) => {
                    warn!(endpoint = %endpoint, "hub handshake failed: {}", e);
                    failures.push(format!("{}: {}", endpoint, e));
                }
            }
        }

        Err(LinkError::ConnectFailed {
            attempted,
            reason: if failures.is_empty() {
                "no endpoints configured".to_string()
            } else {
                failures.join("; ")
            },
        })
    }

    async fn scan(&mut self, window: Duration) -> Result<(), LinkError> {
        let started = self
            .request(|id| ClientMessage::StartScanning(IdOnly { id }))
            .await
            .and_then(|reply| expect_ok(reply, "StartScanning"));

        if started.is_ok() {
            tokio::time::sleep(window).await;
        }

        // Stop even when the start failed; the hub may have begun anyway.
        let stopped = self
            .request(|id| ClientMessage::StopScanning(IdOnly { id }))
            .await
            .and_then(|reply| expect_ok(reply, "StopScanning"));

        started.and(stopped)
    }

    async fn send_linear(
        &mut self,
        device: &DeviceHandle,
        duration_ms: u32,
        position: f64,
    ) -> Result<(), LinkError> {
        let device_index = device.index;
        let reply = self
            .request(|id| {
                ClientMessage::LinearCmd(LinearCmd {
                    id,
                    device_index,
                    vectors: vec![LinearVector {
                        index: 0,
                        duration: duration_ms,
                        position,
                    }],
                })
            })
            .await?;
        expect_ok(reply, "LinearCmd")
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        if let Some(conn) = self.connection.take() {
            info!(endpoint = %conn.endpoint, "disconnecting from hub");
            close_reactor(&conn.cmd_tx, self.request_timeout).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn linear_cmd_wire_format() {
        let message = ClientMessage::LinearCmd(LinearCmd {
            id: 7,
            device_index: 0,
            vectors: vec![LinearVector {
                index: 0,
                duration: 35,
                position: 0.75,
            }],
        });
        let json: Value = serde_json::from_str(&message.to_frame().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"LinearCmd": {
                "Id": 7,
                "DeviceIndex": 0,
                "Vectors": [{"Index": 0, "Duration": 35, "Position": 0.75}]
            }}])
        );
    }

    #[test]
    fn handshake_wire_format() {
        let message = ClientMessage::RequestServerInfo(RequestServerInfo {
            id: 1,
            client_name: "handyd".to_string(),
            message_version: MESSAGE_VERSION,
        });
        let json: Value = serde_json::from_str(&message.to_frame().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"RequestServerInfo": {
                "Id": 1, "ClientName": "handyd", "MessageVersion": 3
            }}])
        );
    }

    #[test]
    fn parse_device_notifications() {
        let frame = r#"[
            {"DeviceAdded": {
                "Id": 0, "DeviceName": "The Handy", "DeviceIndex": 2, "DeviceMessages": {}
            }},
            {"DeviceRemoved": {"Id": 0, "DeviceIndex": 1}},
            {"ScanningFinished": {"Id": 0}},
            {"SensorReading": {"Id": 0}}
        ]"#;
        let messages = parse_frame(frame).unwrap();
        assert_eq!(
            messages,
            vec![
                ServerMessage::DeviceAdded(DeviceHandle::new(2, "The Handy")),
                ServerMessage::DeviceRemoved { index: 1 },
                ServerMessage::ScanningFinished,
                ServerMessage::Unhandled("SensorReading".to_string()),
            ]
        );
    }

    #[test]
    fn parse_replies() {
        let frame = r#"[
            {"Ok": {"Id": 4}},
            {"Error": {"Id": 5, "ErrorMessage": "Device not found", "ErrorCode": 3}},
            {"ServerInfo": {
                "Id": 1, "ServerName": "Intiface", "MessageVersion": 3, "MaxPingTime": 0
            }}
        ]"#;
        let messages = parse_frame(frame).unwrap();
        assert_eq!(messages[0], ServerMessage::Ok { id: 4 });
        assert_eq!(
            messages[1],
            ServerMessage::Error {
                id: 5,
                message: "Device not found".to_string()
            }
        );
        assert_eq!(messages[2].reply_id(), Some(1));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(parse_frame("not json"), Err(LinkError::Protocol(_))));
        assert!(matches!(
            parse_frame(r#"[{"Ok": {"Nope": 1}}]"#),
            Err(LinkError::Protocol(_))
        ));
    }

    #[test]
    fn ids_skip_zero() {
        let ids = AtomicU32::new(u32::MAX);
        assert_eq!(next_id(&ids), u32::MAX);
        assert_eq!(next_id(&ids), 1);
    }

    /// Minimal Intiface stand-in: answers the handshake, reports one known
    /// device, acks every other request, and records LinearCmd bodies.
    async fn fake_hub(listener: TcpListener, linear_tx: mpsc::UnboundedSender<Value>) {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let frames: Vec<Map<String, Value>> = serde_json::from_str(&text).unwrap();
            for frame in frames {
                for (name, body) in frame {
                    let id = body["Id"].clone();
                    let reply = match name.as_str() {
                        "RequestServerInfo" => serde_json::json!([{"ServerInfo": {
                            "Id": id, "ServerName": "fake", "MessageVersion": 3, "MaxPingTime": 0
                        }}]),
                        "RequestDeviceList" => serde_json::json!([{"DeviceList": {
                            "Id": id,
                            "Devices": [{
                                "DeviceName": "The Handy", "DeviceIndex": 0, "DeviceMessages": {}
                            }]
                        }}]),
                        "LinearCmd" => {
                            linear_tx.send(body.clone()).unwrap();
                            serde_json::json!([{"Ok": {"Id": id}}])
                        }
                        _ => serde_json::json!([{"Ok": {"Id": id}}]),
                    };
                    ws.send(Message::Text(reply.to_string())).await.unwrap();
                }
            }
        }
    }

    fn test_hub_config() -> HubConfig {
        HubConfig {
            request_timeout_ms: 1000,
            connect_timeout_ms: 1000,
            ..HubConfig::default()
        }
    }

    #[tokio::test]
    async fn connect_handshake_and_linear_against_fake_hub() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}", listener.local_addr().unwrap());
        let (linear_tx, mut linear_rx) = mpsc::unbounded_channel();
        tokio::spawn(fake_hub(listener, linear_tx));

        let (mut link, mut events) = IntifaceLink::new(&test_hub_config());
        let accepted = link.connect(&[endpoint.clone()]).await.unwrap();
        assert_eq!(accepted, endpoint);

        assert_eq!(
            events.recv().await,
            Some(LinkEvent::DeviceAdded(DeviceHandle::new(0, "The Handy")))
        );

        link.scan(Duration::from_millis(10)).await.unwrap();
        link.send_linear(&DeviceHandle::new(0, "The Handy"), 40, 0.25)
            .await
            .unwrap();

        let body = linear_rx.recv().await.unwrap();
        assert_eq!(body["DeviceIndex"], 0);
        assert_eq!(body["Vectors"][0]["Duration"], 40);
        assert_eq!(body["Vectors"][0]["Position"], 0.25);

        link.disconnect().await.unwrap();
        assert!(matches!(
            link.send_linear(&DeviceHandle::new(0, "The Handy"), 40, 0.25).await,
            Err(LinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn connect_reports_every_refused_endpoint() {
        // Bind then drop to get ports nothing listens on.
        let mut endpoints = Vec::new();
        for _ in 0..2 {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            endpoints.push(format!("ws://{}", listener.local_addr().unwrap()));
        }

        let (mut link, _events) = IntifaceLink::new(&test_hub_config());
        match link.connect(&endpoints).await {
            Err(LinkError::ConnectFailed { attempted, .. }) => assert_eq!(attempted, endpoints),
            other => panic!("expected ConnectFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn hub_loss_is_reported_as_event() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            // Answer the handshake, then hang up.
            for _ in 0..2 {
                let Some(Ok(Message::Text(text))) = ws.next().await else { return };
                let frames: Vec<Map<String, Value>> = serde_json::from_str(&text).unwrap();
                let (name, body) = frames[0].iter().next().unwrap();
                let reply = if name == "RequestServerInfo" {
                    serde_json::json!([{"ServerInfo": {"Id": body["Id"], "MaxPingTime": 0}}])
                } else {
                    serde_json::json!([{"DeviceList": {"Id": body["Id"], "Devices": []}}])
                };
                ws.send(Message::Text(reply.to_string())).await.unwrap();
            }
            let _ = ws.close(None).await;
        });

        let (mut link, mut events) = IntifaceLink::new(&test_hub_config());
        link.connect(&[endpoint]).await.unwrap();

        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(LinkEvent::HubDisconnected { .. })) => {}
            other => panic!("expected HubDisconnected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn hub_loss_waits_for_a_full_event_queue() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for _ in 0..2 {
                let Some(Ok(Message::Text(text))) = ws.next().await else { return };
                let frames: Vec<Map<String, Value>> = serde_json::from_str(&text).unwrap();
                let (name, body) = frames[0].iter().next().unwrap();
                let reply = if name == "RequestServerInfo" {
                    serde_json::json!([{"ServerInfo": {"Id": body["Id"], "MaxPingTime": 0}}])
                } else {
                    serde_json::json!([{"DeviceList": {"Id": body["Id"], "Devices": []}}])
                };
                ws.send(Message::Text(reply.to_string())).await.unwrap();
            }
            // Fill the event queue before hanging up.
            let added: Vec<Value> = (0..EVENT_BUFFER)
                .map(|i| {
                    serde_json::json!({"DeviceAdded": {
                        "Id": 0, "DeviceName": "Filler", "DeviceIndex": i, "DeviceMessages": {}
                    }})
                })
                .collect();
            ws.send(Message::Text(Value::Array(added).to_string()))
                .await
                .unwrap();
            let _ = ws.close(None).await;
        });

        let (mut link, mut events) = IntifaceLink::new(&test_hub_config());
        link.connect(&[endpoint]).await.unwrap();

        // Let the reactor see the close while nobody is reading.
        tokio::time::sleep(Duration::from_millis(200)).await;

        for _ in 0..EVENT_BUFFER {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await;
            assert!(matches!(event, Ok(Some(LinkEvent::DeviceAdded(_)))));
        }
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(LinkEvent::HubDisconnected { .. })) => {}
            other => panic!("expected HubDisconnected, got {:?}", other),
        }
    }
}
