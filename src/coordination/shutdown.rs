//! Shutdown coordination
//!
//! A `ShutdownHandle` owns the trigger; any number of `ShutdownToken`s observe
//! it. Long waits (fill polling, the tick loop) select on
//! `ShutdownToken::cancelled()` so a signal interrupts them promptly.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Owner side of the shutdown signal
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
            _keepalive: None,
        }
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        if !*self.tx.borrow() {
            info!("shutdown requested");
        }
        self.tx.send_replace(true);
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of the shutdown signal
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl ShutdownToken {
    /// A token that is never cancelled
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is triggered, or when the handle is dropped
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
