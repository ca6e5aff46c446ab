use tokio::sync::oneshot;

/// Control-plane requests into the engine loop. The loop owns all account
/// state, so anything that mutates it arrives here rather than being touched
/// from another task.
#[derive(Debug)]
pub enum EngineCommand {
    /// Delete a strategy's persisted rows and reset its in-memory account.
    ResetStrategy {
        strategy: String,
        reply: oneshot::Sender<Result<(), String>>,
    },
    /// Apply a funding payment to every strategy holding a position.
    ApplyFunding { rate: f64, funding_time_ms: i64 },
}
