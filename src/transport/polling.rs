use std::time::Duration;

use chrono::Utc;
use log::{debug, trace};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tokio::sync::mpsc;
use url::Url;

use super::{heartbeat_deadline, EngineChannel};
use crate::config::ClientConfig;
use crate::error::{ProtocolError, TransportError};
use crate::packet::{decode_payload, EnginePacket, RECORD_SEPARATOR};

type InboundTx = mpsc::UnboundedSender<Result<EnginePacket, TransportError>>;

pub(super) async fn open(config: &ClientConfig) -> Result<EngineChannel, TransportError> {
    let client = Client::builder()
        .cookie_store(config.with_credentials)
        .build()?;
    let endpoint = config.endpoint()?;
    debug!("Opening polling session at {endpoint}");

    let mut packets = decode_payload(&get(&client, &endpoint).await?)?.into_iter();
    let info = match packets.next() {
        Some(EnginePacket::Open(info)) => info,
        other => return Err(TransportError::UnexpectedHandshake(format!("{other:?}"))),
    };
    debug!(
        "Polling session {} open (ping every {} ms)",
        info.sid, info.ping_interval
    );

    let mut session_url = endpoint;
    session_url.query_pairs_mut().append_pair("sid", &info.sid);

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    for packet in packets {
        route(packet, &outbound_tx, &inbound_tx);
    }

    let deadline = heartbeat_deadline(info.ping_interval, info.ping_timeout);
    let reader = tokio::spawn(poll_loop(
        client.clone(),
        session_url.clone(),
        deadline,
        outbound_tx.clone(),
        inbound_tx.clone(),
    ));
    let writer = tokio::spawn(write_loop(
        client,
        session_url,
        info.max_payload,
        outbound_rx,
        inbound_tx,
    ));

    Ok(EngineChannel {
        outbound: outbound_tx,
        inbound: inbound_rx,
        reader: Some(reader),
        writer: Some(writer),
    })
}

/// Returns `false` once the session is over.
fn route(
    packet: EnginePacket,
    outbound: &mpsc::UnboundedSender<EnginePacket>,
    inbound: &InboundTx,
) -> bool {
    match packet {
        EnginePacket::Ping(data) => {
            trace!("Ping from server");
            outbound.send(EnginePacket::Pong(data)).is_ok()
        }
        EnginePacket::Noop => true,
        EnginePacket::Close => {
            let _ = inbound.send(Ok(EnginePacket::Close));
            false
        }
        other => inbound.send(Ok(other)).is_ok(),
    }
}

async fn poll_loop(
    client: Client,
    url: Url,
    deadline: Duration,
    outbound: mpsc::UnboundedSender<EnginePacket>,
    inbound: InboundTx,
) {
    loop {
        let body = match tokio::time::timeout(deadline, get(&client, &url)).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                let _ = inbound.send(Err(e));
                return;
            }
            Err(_) => {
                let _ = inbound.send(Err(TransportError::PingTimeout(deadline)));
                return;
            }
        };

        let packets = match decode_payload(&body) {
            Ok(packets) => packets,
            Err(e) => {
                let _ = inbound.send(Err(e.into()));
                return;
            }
        };

        for packet in packets {
            if !route(packet, &outbound, &inbound) {
                return;
            }
        }
    }
}

/// The server rejects overlapping POSTs, so every write goes through here.
/// Packets queued while a POST is in flight are batched into the next one.
async fn write_loop(
    client: Client,
    url: Url,
    max_payload: Option<u64>,
    mut outbound: mpsc::UnboundedReceiver<EnginePacket>,
    inbound: InboundTx,
) {
    while let Some(first) = outbound.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = outbound.try_recv() {
            batch.push(next);
        }
        let closing = batch.contains(&EnginePacket::Close);

        let bodies = match split_payloads(&batch, max_payload) {
            Ok(bodies) => bodies,
            Err(e) => {
                let _ = inbound.send(Err(e.into()));
                return;
            }
        };
        for body in bodies {
            if let Err(e) = post(&client, &url, body).await {
                let _ = inbound.send(Err(e));
                return;
            }
        }
        if closing {
            return;
        }
    }
}

/// Joins packets into POST bodies of at most `max_payload` bytes. A packet
/// that is over the limit by itself still goes out alone.
fn split_payloads(
    packets: &[EnginePacket],
    max_payload: Option<u64>,
) -> Result<Vec<String>, ProtocolError> {
    let limit = max_payload
        .and_then(|max| usize::try_from(max).ok())
        .unwrap_or(usize::MAX);
    let mut bodies = Vec::new();
    let mut body = String::new();
    for packet in packets {
        let encoded = packet.encode()?;
        if !body.is_empty() {
            if body.len() + RECORD_SEPARATOR.len_utf8() + encoded.len() > limit {
                bodies.push(std::mem::take(&mut body));
            } else {
                body.push(RECORD_SEPARATOR);
            }
        }
        body.push_str(&encoded);
    }
    if !body.is_empty() {
        bodies.push(body);
    }
    Ok(bodies)
}

/// Adds a cache-busting timestamp the way browser clients do.
fn request_url(url: &Url) -> Url {
    let mut url = url.clone();
    url.query_pairs_mut()
        .append_pair("t", &Utc::now().timestamp_millis().to_string());
    url
}

async fn get(client: &Client, url: &Url) -> Result<String, TransportError> {
    let response = client.get(request_url(url)).send().await?;
    if !response.status().is_success() {
        return Err(TransportError::HttpStatus(response.status()));
    }
    Ok(response.text().await?)
}

async fn post(client: &Client, url: &Url, body: String) -> Result<(), TransportError> {
    trace!("POST {} bytes", body.len());
    let response = client
        .post(request_url(url))
        .header(CONTENT_TYPE, "text/plain;charset=UTF-8")
        .body(body)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(TransportError::HttpStatus(response.status()));
    }
    Ok(())
}
