//! Following other instances of the same disk.

use std::sync::Arc;

use scriptorium_types::EventOrigin;

use super::Disk;
use crate::events::{decode_remote, RemoteEnvelope};
use crate::index_cache::IndexOptions;

impl Disk {
    /// Listen on the hub channel for this disk id until teardown.
    ///
    /// The task only holds a weak reference, so dropping every `Disk`
    /// handle ends it too.
    pub(super) fn spawn_remote_listener(&self) {
        let mut sub = self.inner.remote.subscribe(&self.inner.id);
        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        let instance = self.inner.instance.clone();

        let handle = tokio::spawn(async move {
            loop {
                let envelope = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    envelope = sub.recv() => match envelope {
                        Some(envelope) => envelope,
                        None => break,
                    },
                };
                if envelope.sender == instance {
                    continue;
                }
                let Some(inner) = weak.upgrade() else { break };
                Disk { inner }.apply_remote(envelope).await;
            }
            tracing::trace!("remote listener stopped");
        });
        *self.inner.listener.lock() = Some(handle);
    }

    /// Reindex from storage, then tell local listeners. Never republished.
    async fn apply_remote(&self, envelope: RemoteEnvelope) {
        let event = match decode_remote(&self.inner.id, &envelope) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(disk_id = %self.inner.id, sender = %envelope.sender, error = %e, "dropping remote event");
                return;
            }
        };
        tracing::trace!(
            disk_id = %self.inner.id,
            sender = %envelope.sender,
            subject = event.subject(),
            "remote event"
        );

        {
            let _op = self.inner.queue.lock().await;
            if let Err(e) = self.reindex(IndexOptions::default()).await {
                tracing::warn!(disk_id = %self.inner.id, error = %e, "reindex after remote event failed");
                return;
            }
        }
        self.emit_local(&event, EventOrigin::Remote);
    }
}
