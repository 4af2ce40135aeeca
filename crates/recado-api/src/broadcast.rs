use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use recado_types::events::NoteCreatedPayload;

/// Process-wide registry of open note streams. Created once at startup and
/// injected into handlers; cleared at shutdown.
///
/// Fan-out is best-effort and at-most-once: the payload is serialized once
/// and written to every registered stream. A slow client never blocks the
/// broadcast (channels are unbounded); a dead client is detected when the
/// write to its channel fails, which silently deregisters it.
#[derive(Clone)]
pub struct NoteBroadcaster {
    clients: Arc<Mutex<Vec<mpsc::UnboundedSender<String>>>>,
}

impl NoteBroadcaster {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a new stream. The caller owns the receiving end; dropping it
    /// is how a client leaves.
    pub fn register(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients
            .lock()
            .expect("note registry lock poisoned")
            .push(tx);
        rx
    }

    /// Write the payload to every registered stream, pruning the ones whose
    /// client is gone. Returns how many streams received it.
    pub fn broadcast(&self, payload: &NoteCreatedPayload) -> usize {
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize note payload: {}", e);
                return 0;
            }
        };

        let mut clients = self.clients.lock().expect("note registry lock poisoned");
        let before = clients.len();
        clients.retain(|tx| tx.send(json.clone()).is_ok());
        if clients.len() < before {
            debug!("Pruned {} dead note stream(s)", before - clients.len());
        }
        clients.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients
            .lock()
            .expect("note registry lock poisoned")
            .len()
    }

    /// Drop every registered stream. Called at shutdown so open SSE
    /// responses terminate instead of idling on heartbeats.
    pub fn clear(&self) {
        self.clients
            .lock()
            .expect("note registry lock poisoned")
            .clear();
    }
}

impl Default for NoteBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
