use std::sync::{Arc, Mutex};

use gw_core::UserStateUpdate;
use tokio::sync::mpsc;

/// Stands in for the downstream user-service RPC that consumes batched
/// presence updates from `gw_core::OnlineStatusBatcher`. Records every
/// batch it receives so tests can assert on what was about to be shipped
/// across the real (out-of-scope) backend boundary.
pub struct FakeUserService {
    received: Arc<Mutex<Vec<Vec<UserStateUpdate>>>>,
    _drain: tokio::task::JoinHandle<()>,
}

impl FakeUserService {
    /// Spawn a task draining `rx` into an in-memory log.
    pub fn spawn(mut rx: mpsc::Receiver<Vec<UserStateUpdate>>) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let recorder = received.clone();
        let drain = tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                recorder.lock().expect("fake user service log poisoned").push(batch);
            }
        });
        Self {
            received,
            _drain: drain,
        }
    }

    pub fn batches(&self) -> Vec<Vec<UserStateUpdate>> {
        self.received.lock().expect("fake user service log poisoned").clone()
    }

    pub fn total_updates(&self) -> usize {
        self.batches().iter().map(Vec::len).sum()
    }
}
