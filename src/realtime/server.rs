//! WebSocket gateway for real-time observers.
//!
//! Thin transport glue around the [`Hub`]: accepts connections, forwards
//! each observer's queue onto its socket, and routes inbound control
//! messages. Stale-observer eviction runs on its own timer, decoupled
//! from publish and connect traffic.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::Tuning;
use crate::error::{Error, Result};
use crate::event::NotificationLevel;
use crate::model::ObserverId;
use crate::realtime::hub::Hub;
use crate::realtime::protocol::{parse_inbound, parse_kinds, ClientMessage, Inbound};

/// Run the gateway until the listener fails. Spawns one task per
/// connection plus a periodic stale-eviction sweep.
pub async fn serve(hub: Arc<Hub>, tuning: Tuning, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Other(format!("cannot bind gateway to {addr}: {e}")))?;

    info!(%addr, "realtime gateway listening");

    let evictor_hub = Arc::clone(&hub);
    let max_idle = tuning.heartbeat_max_idle();
    let mut ticker = tokio::time::interval(tuning.eviction_interval());
    tokio::spawn(async move {
        loop {
            ticker.tick().await;
            let evicted = evictor_hub.evict_stale(max_idle);
            if !evicted.is_empty() {
                debug!(count = evicted.len(), "stale eviction sweep");
            }
        }
    });

    loop {
        let (stream, peer) = listener.accept().await?;
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            debug!(%peer, "incoming connection");
            handle_connection(hub, stream).await;
        });
    }
}

async fn handle_connection(hub: Arc<Hub>, stream: TcpStream) {
    // Reconnecting clients pass their previous id as a query parameter.
    let mut requested: Option<ObserverId> = None;
    let callback = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        requested = observer_id_from_query(req.uri().query());
        Ok(resp)
    };

    let ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("websocket handshake failed: {e}");
            return;
        }
    };

    let (id, mut queue) = hub.connect(requested);
    let (mut sink, mut source) = ws.split();

    // Drain the observer's queue onto the socket. Ends when the hub drops
    // the sender (disconnect or eviction) or the socket breaks.
    let forward = tokio::spawn(async move {
        while let Some(event) = queue.recv().await {
            let json = match serde_json::to_string(event.as_ref()) {
                Ok(json) => json,
                Err(e) => {
                    warn!(observer = %id, "event serialization failed: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = source.next().await {
        match msg {
            Ok(Message::Text(text)) => dispatch(&hub, id, &text),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(observer = %id, "websocket read error: {e}");
                break;
            }
        }
    }

    hub.disconnect(id);
    forward.abort();
}

fn dispatch(hub: &Hub, id: ObserverId, text: &str) {
    match parse_inbound(text) {
        Inbound::Message(ClientMessage::Heartbeat) | Inbound::Message(ClientMessage::Ping) => {
            hub.heartbeat(id);
        }
        Inbound::Message(ClientMessage::Subscribe { kinds }) => {
            hub.subscribe(id, &parse_kinds(&kinds));
        }
        Inbound::Message(ClientMessage::Unsubscribe { kinds }) => {
            hub.unsubscribe(id, &parse_kinds(&kinds));
        }
        Inbound::Unknown => {
            debug!(observer = %id, "unknown message type");
        }
        Inbound::Malformed => {
            hub.notify_observer(
                id,
                NotificationLevel::Error,
                "Invalid message",
                "could not parse JSON message",
            );
        }
    }
}

fn observer_id_from_query(query: Option<&str>) -> Option<ObserverId> {
    let query = query?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "observer_id")
        .and_then(|(_, value)| ObserverId::parse(value))
}
