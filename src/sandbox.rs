mod harness;
mod runner;
mod simple_runner;

pub use harness::{HARNESS_FILE_NAME, HARNESS_SOURCE, decode_harness_output};
pub use runner::SandboxRunner;
pub use simple_runner::SimpleRunner;

use std::sync::Arc;

use anyhow::{Result, bail};
use serde_json::Value;

use crate::config::{DispatcherConfig, LanguageConfig};

/// Exit code reported when a program is killed for exceeding its time budget
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Stderr reported alongside [`TIMEOUT_EXIT_CODE`]
pub const TIMEOUT_MESSAGE: &str = "TIMEOUT";

/// Most bytes kept from each of a program's output streams; the rest is discarded
pub const OUTPUT_LIMIT_BYTES: u64 = 4 << 20;

/// What a single sandboxed run produced
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: i64,
}

impl RawOutcome {
    /// The outcome of a run killed at `elapsed_ms`
    pub fn timed_out(elapsed_ms: i64) -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout: String::new(),
            stderr: TIMEOUT_MESSAGE.to_string(),
            elapsed_ms,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }
}

/// What a harness run produced
///
/// `result` is `None` whenever the harness output could not be decoded,
/// whatever the exit code was.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredOutcome {
    pub exit_code: i32,
    pub result: Option<Value>,
    /// JSON pointers into `result` of sequences that were sets
    pub set_paths: Vec<String>,
    /// What the submitted code printed while running
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: i64,
}

impl StructuredOutcome {
    pub fn is_timeout(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }
}

/// Creates the sandbox runner for the configured interpreter
///
/// Fails early if the interpreter cannot be found, rather than on the first
/// submission.
pub fn create_sandbox_runner(
    language: &LanguageConfig,
    dispatcher: &DispatcherConfig,
) -> Result<Arc<dyn SandboxRunner>> {
    let Some(interpreter) = language.command.first() else {
        bail!("Empty interpreter command for language {}", language.name);
    };

    let found = std::process::Command::new("which")
        .arg(interpreter)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false);
    if !found {
        bail!("Interpreter {interpreter} for language {} not found", language.name);
    }

    log::info!("Creating SimpleRunner for {} ({interpreter})", language.name);
    let runner = SimpleRunner::new(language.clone(), dispatcher.work_dir.clone())?;
    Ok(Arc::new(runner))
}
