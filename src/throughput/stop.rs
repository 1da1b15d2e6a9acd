//! Cooperative per-session stop signal.

use tokio_util::sync::CancellationToken;

/// Monotonic stop flag shared by every worker of one session.
///
/// Raising it more than once has the same effect as raising it once. Workers
/// poll it at their checkpoints and race it against blocking I/O.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request every worker holding this signal to stop.
    pub fn raise(&self) {
        self.token.cancel();
    }

    pub fn is_raised(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal has been raised.
    pub async fn raised(&self) {
        self.token.cancelled().await
    }
}
