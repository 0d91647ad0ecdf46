use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;

use super::{Connection, Connector, EngineChannel, Inbound};
use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::messages::{ClientMessage, ServerMessage};
use crate::packet::{EnginePacket, SocketPacket};

const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Opens a brand new Engine.IO session and Socket.IO namespace on every
/// `connect`; nothing is shared between connections.
pub struct SocketIoConnector {
    config: ClientConfig,
}

impl SocketIoConnector {
    pub fn new(config: ClientConfig) -> Self {
        SocketIoConnector { config }
    }
}

#[async_trait]
impl Connector for SocketIoConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        let timeout = self.config.handshake_timeout();
        let connection = tokio::time::timeout(timeout, SocketIoConnection::establish(&self.config))
            .await
            .map_err(|_| TransportError::HandshakeTimeout(timeout))??;
        Ok(Box::new(connection))
    }
}

pub struct SocketIoConnection {
    engine: EngineChannel,
}

impl SocketIoConnection {
    pub async fn establish(config: &ClientConfig) -> Result<Self, TransportError> {
        let mut engine = EngineChannel::open(config).await?;
        send_socket_packet(&engine, &SocketPacket::Connect(None))?;

        loop {
            let packet = engine.inbound.recv().await.ok_or(TransportError::Closed)??;
            match packet {
                EnginePacket::Message(data) => match SocketPacket::decode(&data)? {
                    SocketPacket::Connect(_) => {
                        debug!("Namespace connected");
                        return Ok(SocketIoConnection { engine });
                    }
                    SocketPacket::ConnectError(data) => {
                        return Err(TransportError::ConnectRefused(error_message(&data)));
                    }
                    other => debug!("Ignoring {other:?} before namespace connect"),
                },
                EnginePacket::Close => return Err(TransportError::Closed),
                other => debug!("Ignoring {other:?} during handshake"),
            }
        }
    }
}

#[async_trait]
impl Connection for SocketIoConnection {
    async fn emit(&mut self, message: ClientMessage) -> Result<(), TransportError> {
        let packet = SocketPacket::Event {
            args: message.to_event_args()?,
            ack: None,
        };
        send_socket_packet(&self.engine, &packet)
    }

    async fn recv(&mut self) -> Result<Inbound, TransportError> {
        loop {
            let packet = self.engine.inbound.recv().await.ok_or(TransportError::Closed)??;
            let data = match packet {
                EnginePacket::Message(data) => data,
                EnginePacket::Close => return Err(TransportError::Closed),
                _ => continue,
            };

            let packet = match SocketPacket::decode(&data) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("Dropping malformed packet: {e}");
                    continue;
                }
            };
            if packet == SocketPacket::Disconnect {
                return Ok(Inbound::ServerDisconnect);
            }

            let Some((name, data)) = packet.into_named_event() else {
                continue;
            };
            match ServerMessage::from_event(&name, data) {
                Ok(Some(message)) => return Ok(Inbound::Message(message)),
                Ok(None) => debug!("Ignoring unhandled event {name}"),
                Err(e) => warn!("Dropping malformed {name} event: {e}"),
            }
        }
    }

    async fn close(&mut self) {
        let _ = send_socket_packet(&self.engine, &SocketPacket::Disconnect);
        self.engine.close(CLOSE_GRACE).await;
    }
}

fn send_socket_packet(engine: &EngineChannel, packet: &SocketPacket) -> Result<(), TransportError> {
    engine
        .outbound
        .send(EnginePacket::Message(packet.encode()?))
        .map_err(|_| TransportError::Closed)
}

fn error_message(data: &Value) -> String {
    data.get("message")
        .and_then(Value::as_str)
        .map_or_else(|| data.to_string(), str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::config::TransportKind;
    use crate::transport::fake::{client_config, open_packet, PollingServer, WebSocketServer};

    fn engine_pair() -> (
        EngineChannel,
        mpsc::UnboundedReceiver<EnginePacket>,
        mpsc::UnboundedSender<Result<EnginePacket, TransportError>>,
    ) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let engine = EngineChannel {
            outbound,
            inbound,
            reader: None,
            writer: None,
        };
        (engine, outbound_rx, inbound_tx)
    }

    #[tokio::test]
    async fn emit_wraps_event_in_message_packet() {
        let (engine, mut sent, _inbound) = engine_pair();
        let mut connection = SocketIoConnection { engine };
        connection.emit(ClientMessage::LeaveRoom {}).await.unwrap();
        assert_eq!(
            sent.recv().await.unwrap(),
            EnginePacket::Message(r#"2["leaveRoom",{}]"#.to_string())
        );
    }

    #[tokio::test]
    async fn recv_skips_unknown_and_malformed_events() {
        let (engine, _sent, inbound) = engine_pair();
        let mut connection = SocketIoConnection { engine };
        inbound
            .send(Ok(EnginePacket::Message(r#"2["typing",{"username":"bob"}]"#.to_string())))
            .unwrap();
        inbound
            .send(Ok(EnginePacket::Message(r#"2["userJoined","bob"]"#.to_string())))
            .unwrap();
        inbound.send(Ok(EnginePacket::Pong(String::new()))).unwrap();
        let user = json!({"id": "s2", "username": "bob", "room": "lobby"});
        inbound
            .send(Ok(EnginePacket::Message(format!(r#"2["userJoined",{user}]"#))))
            .unwrap();

        let Inbound::Message(ServerMessage::UserJoined(joined)) = connection.recv().await.unwrap()
        else {
            panic!("expected userJoined");
        };
        assert_eq!(joined.username, "bob");
    }

    #[tokio::test]
    async fn server_namespace_disconnect_is_reported() {
        let (engine, _sent, inbound) = engine_pair();
        let mut connection = SocketIoConnection { engine };
        inbound.send(Ok(EnginePacket::Message("1".to_string()))).unwrap();
        assert_eq!(connection.recv().await.unwrap(), Inbound::ServerDisconnect);
    }

    #[tokio::test]
    async fn engine_close_is_a_transport_error() {
        let (engine, _sent, inbound) = engine_pair();
        let mut connection = SocketIoConnection { engine };
        inbound.send(Ok(EnginePacket::Close)).unwrap();
        assert!(matches!(connection.recv().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn close_sends_namespace_disconnect_then_engine_close() {
        let (engine, mut sent, _inbound) = engine_pair();
        let mut connection = SocketIoConnection { engine };
        connection.close().await;
        assert_eq!(sent.recv().await.unwrap(), EnginePacket::Message("1".to_string()));
        assert_eq!(sent.recv().await.unwrap(), EnginePacket::Close);
    }

    #[test]
    fn connect_error_message_is_extracted() {
        assert_eq!(error_message(&json!({"message": "Invalid namespace"})), "Invalid namespace");
        assert_eq!(error_message(&json!("nope")), "\"nope\"");
    }

    const CHAT_MESSAGE: &str =
        r#"42["message",{"id":"m1","text":"hi","username":"bob","room":"lobby"}]"#;

    async fn expect_chat_message(connection: &mut dyn Connection) {
        let Inbound::Message(ServerMessage::Message(message)) = connection.recv().await.unwrap()
        else {
            panic!("expected a chat message");
        };
        assert_eq!(message.id, "m1");
    }

    #[tokio::test]
    async fn connects_over_polling() {
        let mut server =
            PollingServer::start(open_packet(25_000, 20_000, None), Duration::ZERO).await;
        server
            .downlink
            .send("2\u{1e}40{\"sid\":\"ns-1\"}".to_string())
            .unwrap();

        let connector = SocketIoConnector::new(client_config(server.addr, TransportKind::Polling));
        let mut connection = connector.connect().await.unwrap();
        let mut posted = server.posted_packets(2).await;
        posted.sort_by_key(|packet| packet.encode().unwrap());
        assert_eq!(
            posted,
            [
                EnginePacket::Pong(String::new()),
                EnginePacket::Message("0".to_string()),
            ]
        );

        connection.emit(ClientMessage::LeaveRoom {}).await.unwrap();
        assert_eq!(
            server.posted_packets(1).await,
            [EnginePacket::Message(r#"2["leaveRoom",{}]"#.to_string())]
        );

        server.downlink.send(CHAT_MESSAGE.to_string()).unwrap();
        expect_chat_message(connection.as_mut()).await;

        connection.close().await;
        assert_eq!(
            server.posted_packets(2).await,
            [EnginePacket::Message("1".to_string()), EnginePacket::Close]
        );
    }

    #[tokio::test]
    async fn connects_over_websocket() {
        let mut server = WebSocketServer::start(open_packet(25_000, 20_000, None)).await;
        server.downlink.send(r#"40{"sid":"ns-1"}"#.to_string()).unwrap();

        let connector =
            SocketIoConnector::new(client_config(server.addr, TransportKind::Websocket));
        let mut connection = connector.connect().await.unwrap();
        assert_eq!(server.next_packet().await, EnginePacket::Message("0".to_string()));

        server.downlink.send("2".to_string()).unwrap();
        assert_eq!(server.next_packet().await, EnginePacket::Pong(String::new()));

        connection
            .emit(ClientMessage::SendMessage {
                text: "hi".to_string(),
                username: "alice".to_string(),
                room: "lobby".to_string(),
                uid: Some("user-1".to_string()),
            })
            .await
            .unwrap();
        let EnginePacket::Message(data) = server.next_packet().await else {
            panic!("expected a message packet");
        };
        let SocketPacket::Event { args, ack: None } = SocketPacket::decode(&data).unwrap() else {
            panic!("expected an event");
        };
        assert_eq!(
            args,
            [
                json!("sendMessage"),
                json!({"text": "hi", "username": "alice", "room": "lobby", "uid": "user-1"}),
            ]
        );

        server.downlink.send(CHAT_MESSAGE.to_string()).unwrap();
        expect_chat_message(connection.as_mut()).await;
    }

    #[tokio::test]
    async fn connect_error_is_a_refusal() {
        let server = PollingServer::start(open_packet(25_000, 20_000, None), Duration::ZERO).await;
        server
            .downlink
            .send(r#"44{"message":"Not authorized"}"#.to_string())
            .unwrap();

        let connector = SocketIoConnector::new(client_config(server.addr, TransportKind::Polling));
        match connector.connect().await {
            Err(TransportError::ConnectRefused(reason)) => assert_eq!(reason, "Not authorized"),
            Err(e) => panic!("expected a refusal, got {e}"),
            Ok(_) => panic!("expected a refusal, got a connection"),
        }
    }

    #[tokio::test]
    async fn missing_namespace_ack_times_out() {
        let server = PollingServer::start(open_packet(25_000, 20_000, None), Duration::ZERO).await;
        let config = ClientConfig {
            handshake_timeout_ms: 300,
            ..client_config(server.addr, TransportKind::Polling)
        };

        match SocketIoConnector::new(config).connect().await {
            Err(TransportError::HandshakeTimeout(after)) => {
                assert_eq!(after, Duration::from_millis(300));
            }
            Err(e) => panic!("expected a handshake timeout, got {e}"),
            Ok(_) => panic!("expected a handshake timeout, got a connection"),
        }
    }
}
