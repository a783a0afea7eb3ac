// Startup gate
//
// Background services (publisher, janitor, consumer) hold off until the
// process finished wiring itself up and the HTTP listener is bound.

use tokio::sync::watch;

/// One-shot readiness flag shared between the binary and its background loops
#[derive(Clone, Debug)]
pub struct Warmup {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl Default for Warmup {
    fn default() -> Self {
        Self::new()
    }
}

impl Warmup {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// A gate that is already open
    pub fn ready() -> Self {
        let gate = Self::new();
        gate.mark_ready();
        gate
    }

    /// Open the gate; later calls are no-ops
    pub fn mark_ready(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the gate is open
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in self, so the channel can't close while we wait
        let _ = rx.wait_for(|ready| *ready).await;
    }
}
