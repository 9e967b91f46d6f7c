//! Inbound feed plumbing.
//!
//! Transport collaborators hand decoded traffic to the cache through an
//! `mpsc` channel; the pump drains it into the reconciler one message at a
//! time, which keeps ingestion order equal to arrival order.

use std::sync::Arc;

use tether_events::{InboundMessage, PushMessage};
use tether_store::Reconciler;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ClientResult;

/// Totals reported when the pump stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub messages: u64,
    pub accepted: u64,
    pub rejected: u64,
}

/// Decode one push-feed text frame.
pub fn decode_push_frame(text: &str) -> ClientResult<InboundMessage> {
    let push: PushMessage = serde_json::from_str(text)?;
    Ok(InboundMessage::Push(push))
}

/// Drain `receiver` into `reconciler` until every sender is dropped.
pub fn spawn_inbound_pump(
    mut receiver: mpsc::Receiver<InboundMessage>,
    reconciler: Arc<Reconciler>,
) -> JoinHandle<PumpStats> {
    tokio::spawn(async move {
        let mut stats = PumpStats::default();
        while let Some(message) = receiver.recv().await {
            let origin = message.origin();
            let kind = message.kind();
            let report = reconciler.ingest_message(message);
            stats.messages += 1;
            stats.accepted += report.accepted() as u64;
            stats.rejected += report.rejected.len() as u64;
            tracing::trace!(
                origin,
                %kind,
                accepted = report.accepted(),
                rejected = report.rejected.len(),
                "Pumped inbound message"
            );
        }
        tracing::debug!(
            messages = stats.messages,
            accepted = stats.accepted,
            rejected = stats.rejected,
            "Inbound pump stopped"
        );
        stats
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use tether_core::EntityKind;

    #[test]
    fn test_decode_push_frame() {
        let message =
            decode_push_frame(r#"{"Type":"Updated","Object":"Notification","Data":{"ID":"n1"}}"#)
                .unwrap();
        assert_eq!(message.kind(), EntityKind::Notification);
        assert_eq!(message.origin(), "push");
    }

    #[test]
    fn test_decode_rejects_unknown_object() {
        let err = decode_push_frame(r#"{"Type":"Updated","Object":"Planet"}"#).unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
        assert!(decode_push_frame("not json").is_err());
    }
}
