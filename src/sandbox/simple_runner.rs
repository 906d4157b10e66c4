use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::config::LanguageConfig;

use super::harness::{HARNESS_FILE_NAME, HARNESS_SOURCE, decode_harness_output};
use super::{OUTPUT_LIMIT_BYTES, RawOutcome, SandboxRunner, StructuredOutcome};

/// A simple runner that executes code without sandboxing
///
/// Every run gets a fresh temporary directory holding only the files of that
/// run, which is removed when the run ends however it ends. The only limit
/// enforced on the program is wall-clock time; there are no memory, file
/// system, or permission controls.
pub struct SimpleRunner {
    language: LanguageConfig,
    /// Parent of the per-run directories, the system temp dir if `None`
    work_root: Option<PathBuf>,
}

impl SandboxRunner for SimpleRunner {
    fn run_raw(&self, source_code: &str, stdin_text: &str, timeout_ms: u64) -> Result<RawOutcome> {
        let file_name = self.language.file_name.as_str();
        self.execute(
            &[(file_name, source_code)],
            &[file_name],
            stdin_text,
            timeout_ms,
        )
    }

    fn run_structured(
        &self,
        source_code: &str,
        input: &Value,
        timeout_ms: u64,
    ) -> Result<StructuredOutcome> {
        let file_name = self.language.file_name.as_str();
        let request = serde_json::to_string(input)?;

        let raw = self.execute(
            &[(file_name, source_code), (HARNESS_FILE_NAME, HARNESS_SOURCE)],
            &[HARNESS_FILE_NAME, file_name],
            &request,
            timeout_ms,
        )?;

        Ok(decode_harness_output(raw))
    }
}

impl SimpleRunner {
    pub fn new(language: LanguageConfig, work_root: Option<PathBuf>) -> Result<Self> {
        if let Some(root) = &work_root {
            fs::create_dir_all(root)
                .with_context(|| format!("Failed to create work root {}", root.display()))?;
        }

        log::warn!(
            "SimpleRunner provides NO security isolation - use only in trusted environments"
        );

        Ok(Self {
            language,
            work_root,
        })
    }

    /// Creates an exclusive directory for a single run
    fn create_work_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("grader-run-");
        let dir = match &self.work_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        dir.context("Failed to create work directory")
    }

    /// Writes `files` into a fresh work directory and runs the interpreter with `args`
    fn execute(
        &self,
        files: &[(&str, &str)],
        args: &[&str],
        stdin_text: &str,
        timeout_ms: u64,
    ) -> Result<RawOutcome> {
        let work_dir = self.create_work_dir()?;

        let outcome = files
            .iter()
            .try_for_each(|(name, contents)| {
                fs::write(work_dir.path().join(name), contents)
                    .with_context(|| format!("Failed to write {name}"))
            })
            .and_then(|()| {
                tokio::runtime::Handle::current().block_on(self.execute_program_async(
                    work_dir.path(),
                    args,
                    stdin_text,
                    Duration::from_millis(timeout_ms),
                ))
            });

        let dir_path = work_dir.path().to_path_buf();
        if let Err(e) = work_dir.close() {
            log::warn!("Failed to remove work directory {}: {e}", dir_path.display());
        }

        outcome
    }

    /// Runs the interpreter, feeding stdin and collecting both output streams
    /// until the process exits or the time limit passes
    async fn execute_program_async(
        &self,
        work_dir: &Path,
        args: &[&str],
        stdin_text: &str,
        time_limit: Duration,
    ) -> Result<RawOutcome> {
        let (program, interpreter_args) = self
            .language
            .command
            .split_first()
            .context("Empty interpreter command")?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(interpreter_args)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(work_dir)
            .kill_on_drop(true);

        let start_time = Instant::now();
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn interpreter {program}"))?;

        let mut stdin = child.stdin.take().context("Child stdin not captured")?;
        let mut stdout = child.stdout.take().context("Child stdout not captured")?;
        let mut stderr = child.stderr.take().context("Child stderr not captured")?;

        let execution_result = timeout(time_limit, async {
            let feed_input = async move {
                // A program that exits without reading its input closes the pipe early
                if let Err(e) = stdin.write_all(stdin_text.as_bytes()).await {
                    log::debug!("Stopped writing stdin: {e}");
                }
            };

            let (status, (), stdout_buf, stderr_buf) = tokio::join!(
                child.wait(),
                feed_input,
                read_capped(&mut stdout, OUTPUT_LIMIT_BYTES),
                read_capped(&mut stderr, OUTPUT_LIMIT_BYTES),
            );
            let status = status?;
            let stdout_buf = stdout_buf?;
            let stderr_buf = stderr_buf?;

            anyhow::Ok((status, stdout_buf, stderr_buf))
        })
        .await;

        let elapsed_ms = start_time.elapsed().as_millis() as i64;

        match execution_result {
            Ok(result) => {
                let (status, stdout_buf, stderr_buf) = result?;
                Ok(RawOutcome {
                    exit_code: exit_code_of(status),
                    stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
                    elapsed_ms,
                })
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    log::warn!("Failed to kill timed out program: {e}");
                }
                Ok(RawOutcome::timed_out(elapsed_ms))
            }
        }
    }
}

/// Keeps the first `limit` bytes of a stream and drains the rest
async fn read_capped<R: AsyncRead + Unpin>(reader: &mut R, limit: u64) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    (&mut *reader).take(limit).read_to_end(&mut buf).await?;
    tokio::io::copy(reader, &mut tokio::io::sink()).await?;
    Ok(buf)
}

/// Exit code of a finished process; death by signal maps to `128 + signal`
fn exit_code_of(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}
