//! Tether client entry point.
//!
//! Reads push-feed frames as JSON lines on stdin, reconciles them into a
//! cache session and prints every bus event as a JSON line on stdout.

use std::sync::Arc;

use tether_client::{
    decode_push_frame, init_tracing, spawn_inbound_pump, CacheSession, ClientConfig, ClientError,
};
use tether_events::{BroadcastBus, EventBus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    let config = ClientConfig::load()?;
    init_tracing(&config.log)?;

    let bus = Arc::new(BroadcastBus::new(config.cache.bus_capacity));
    let mut events = bus.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(err) => tracing::warn!(error = %err, "Failed to encode bus event"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event printer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let session = CacheSession::start(config.cache.clone(), bus.clone() as Arc<dyn EventBus>).await?;
    tracing::info!(
        session_id = %session.id(),
        started_at = %session.started_at(),
        identity_field = %session.config().identity_field,
        "Reading push frames from stdin"
    );
    let (inbound_tx, inbound_rx) = mpsc::channel(256);
    let pump = spawn_inbound_pump(inbound_rx, session.reconciler());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match decode_push_frame(&line) {
            Ok(message) => {
                if inbound_tx.send(message).await.is_err() {
                    break;
                }
            }
            Err(err) => tracing::warn!(error = %err, "Skipping undecodable frame"),
        }
    }

    drop(inbound_tx);
    let pumped = pump.await?;
    let summary = session.teardown().await?;
    tracing::info!(
        messages = pumped.messages,
        accepted = pumped.accepted,
        rejected = pumped.rejected,
        hit_rate = summary.store.hit_rate(),
        "Input exhausted"
    );

    drop(bus);
    printer.await?;
    Ok(())
}
