use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use tokio::sync::Mutex;

/// A FastAGI connection currently running the call flow.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveCall {
    pub connection: u64,
    pub peer: String,
    /// RFC 3339, local time.
    pub started: String,
}

/// Snapshot served on `/status`.
#[derive(Debug, Serialize)]
pub struct RegistryStatus {
    pub active_calls: usize,
    pub calls_handled: u64,
    pub calls: Vec<ActiveCall>,
}

/// Registry of in-flight calls, keyed by connection number.
///
/// Shared between the listener, every per-call thread, and the status
/// endpoint. The lock is runtime-agnostic, so threads with their own
/// runtime can use it.
#[derive(Clone, Default)]
pub struct CallRegistry {
    inner: Arc<Mutex<HashMap<u64, ActiveCall>>>,
    handled: Arc<AtomicU64>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, connection: u64, peer: SocketAddr) {
        tracing::info!(connection, %peer, "Call registered");
        self.inner.lock().await.insert(
            connection,
            ActiveCall {
                connection,
                peer: peer.to_string(),
                started: Local::now().to_rfc3339(),
            },
        );
    }

    /// Deregister a call when it ends.
    pub async fn deregister(&self, connection: u64) {
        if self.inner.lock().await.remove(&connection).is_some() {
            self.handled.fetch_add(1, Ordering::Relaxed);
            tracing::info!(connection, "Call deregistered");
        }
    }

    pub async fn active(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn status(&self) -> RegistryStatus {
        let mut calls: Vec<ActiveCall> = self.inner.lock().await.values().cloned().collect();
        calls.sort_by_key(|c| c.connection);
        RegistryStatus {
            active_calls: calls.len(),
            calls_handled: self.handled.load(Ordering::Relaxed),
            calls,
        }
    }
}
