use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, trace};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{heartbeat_deadline, EngineChannel};
use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::packet::EnginePacket;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type InboundTx = mpsc::UnboundedSender<Result<EnginePacket, TransportError>>;

pub(super) async fn open(config: &ClientConfig) -> Result<EngineChannel, TransportError> {
    let endpoint = config.endpoint()?;
    debug!("Opening websocket session at {endpoint}");
    let (ws_stream, _) = connect_async(endpoint.as_str()).await?;
    let (write, mut read) = ws_stream.split();

    let info = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match EnginePacket::decode(text.as_str())? {
                EnginePacket::Open(info) => break info,
                other => return Err(TransportError::UnexpectedHandshake(format!("{other:?}"))),
            },
            Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    };
    debug!("Websocket session {} open", info.sid);

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let deadline = heartbeat_deadline(info.ping_interval, info.ping_timeout);
    let reader = tokio::spawn(read_loop(read, deadline, outbound_tx.clone(), inbound_tx.clone()));
    let writer = tokio::spawn(write_loop(write, outbound_rx, inbound_tx));

    Ok(EngineChannel {
        outbound: outbound_tx,
        inbound: inbound_rx,
        reader: Some(reader),
        writer: Some(writer),
    })
}

async fn read_loop(
    mut read: SplitStream<WsStream>,
    deadline: Duration,
    outbound: mpsc::UnboundedSender<EnginePacket>,
    inbound: InboundTx,
) {
    loop {
        let frame = match tokio::time::timeout(deadline, read.next()).await {
            Err(_) => {
                let _ = inbound.send(Err(TransportError::PingTimeout(deadline)));
                return;
            }
            Ok(None | Some(Ok(Message::Close(_)))) => {
                let _ = inbound.send(Err(TransportError::Closed));
                return;
            }
            Ok(Some(Err(e))) => {
                let _ = inbound.send(Err(e.into()));
                return;
            }
            Ok(Some(Ok(Message::Text(text)))) => text,
            Ok(Some(Ok(_))) => continue,
        };

        match EnginePacket::decode(frame.as_str()) {
            Ok(EnginePacket::Ping(data)) => {
                trace!("Ping from server");
                if outbound.send(EnginePacket::Pong(data)).is_err() {
                    return;
                }
            }
            Ok(EnginePacket::Noop) => {}
            Ok(EnginePacket::Close) => {
                let _ = inbound.send(Ok(EnginePacket::Close));
                return;
            }
            Ok(packet) => {
                if inbound.send(Ok(packet)).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = inbound.send(Err(e.into()));
                return;
            }
        }
    }
}

async fn write_loop(
    mut write: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<EnginePacket>,
    inbound: InboundTx,
) {
    while let Some(packet) = outbound.recv().await {
        let closing = packet == EnginePacket::Close;
        let text = match packet.encode() {
            Ok(text) => text,
            Err(e) => {
                let _ = inbound.send(Err(e.into()));
                return;
            }
        };
        if let Err(e) = write.send(Message::text(text)).await {
            let _ = inbound.send(Err(e.into()));
            return;
        }
        if closing {
            let _ = write.close().await;
            return;
        }
    }
}
