use anyhow::Result;
use serde_json::Value;

use super::{RawOutcome, StructuredOutcome};

/// Trait for different sandbox execution implementations
///
/// Both methods block the calling thread for at most about `timeout_ms`, so
/// callers inside the async runtime run them through `spawn_blocking`. An
/// `Err` means the sandbox itself failed (no work directory, interpreter
/// could not be spawned); everything the submitted program does, including
/// crashing or hanging, is reported through the returned outcome.
pub trait SandboxRunner: Send + Sync {
    /// Runs `source_code` as a standalone program fed with `stdin_text`
    fn run_raw(&self, source_code: &str, stdin_text: &str, timeout_ms: u64) -> Result<RawOutcome>;

    /// Calls the `answer` function of `source_code` with `input` through the harness
    fn run_structured(
        &self,
        source_code: &str,
        input: &Value,
        timeout_ms: u64,
    ) -> Result<StructuredOutcome>;
}
