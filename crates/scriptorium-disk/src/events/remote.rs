//! Cross-context event channel.
//!
//! Named broadcast channels keyed by disk id. Only serialized payloads
//! cross: [`encode_remote`] and [`decode_remote`] are the single
//! serialization boundary. Every disk instance carries a sender id so it
//! can drop its own echoes.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use scriptorium_types::{DiskEvent, DiskId};

/// Remote channel errors.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote event JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope for {got} arrived on channel {expected}")]
    WrongChannel { expected: DiskId, got: DiskId },
}

/// What travels over a remote channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEnvelope {
    pub disk_id: DiskId,
    /// Instance id of the emitting disk.
    pub sender: String,
    /// The serialized [`DiskEvent`].
    pub json: String,
}

/// Serialize an event for another execution context.
pub fn encode_remote(
    disk_id: &DiskId,
    sender: &str,
    event: &DiskEvent,
) -> Result<RemoteEnvelope, RemoteError> {
    Ok(RemoteEnvelope {
        disk_id: disk_id.clone(),
        sender: sender.to_string(),
        json: serde_json::to_string(event)?,
    })
}

/// Parse an envelope received on `expected`'s channel.
pub fn decode_remote(expected: &DiskId, envelope: &RemoteEnvelope) -> Result<DiskEvent, RemoteError> {
    if &envelope.disk_id != expected {
        return Err(RemoteError::WrongChannel {
            expected: expected.clone(),
            got: envelope.disk_id.clone(),
        });
    }
    Ok(serde_json::from_str(&envelope.json)?)
}

/// Registry of named channels, shared by every disk instance that should
/// see the others' changes.
#[derive(Debug)]
pub struct RemoteHub {
    channels: DashMap<String, broadcast::Sender<RemoteEnvelope>>,
    capacity: usize,
}

impl Default for RemoteHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl RemoteHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, disk_id: &DiskId) -> broadcast::Sender<RemoteEnvelope> {
        self.channels
            .entry(disk_id.as_str().to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Send on the envelope's channel. Returns the number of listeners.
    pub fn publish(&self, envelope: RemoteEnvelope) -> usize {
        let tx = self.sender(&envelope.disk_id);
        tx.send(envelope).unwrap_or(0)
    }

    /// Listen on one disk's channel.
    pub fn subscribe(&self, disk_id: &DiskId) -> RemoteSubscription {
        RemoteSubscription {
            disk_id: disk_id.clone(),
            rx: self.sender(disk_id).subscribe(),
        }
    }

    pub fn listener_count(&self, disk_id: &DiskId) -> usize {
        self.channels
            .get(disk_id.as_str())
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Forget channels nobody listens on.
    pub fn prune(&self) {
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
    }
}

/// Receiving end of one disk's remote channel.
#[derive(Debug)]
pub struct RemoteSubscription {
    disk_id: DiskId,
    rx: broadcast::Receiver<RemoteEnvelope>,
}

impl RemoteSubscription {
    pub fn disk_id(&self) -> &DiskId {
        &self.disk_id
    }

    /// Next envelope; `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<RemoteEnvelope> {
        loop {
            match self.rx.recv().await {
                Ok(env) => return Some(env),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(disk_id = %self.disk_id, lagged = n, "remote channel lagged behind");
                }
            }
        }
    }
}
