use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::database as db;
use crate::models::{SubmissionId, TestCase, Verdict};
use crate::sandbox::SandboxRunner;
use crate::verdict::{JudgeMode, Rollup, raw_verdict, select_mode, structured_verdict};

/// Outcome of one test case, as it is stored
#[derive(Debug)]
pub struct CaseReport {
    pub verdict: Verdict,
    pub time_ms: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Polls the store for queued submissions and grades them one at a time.
///
/// Returns `Ok` once `token` is cancelled; shutdown is only observed between
/// submissions, so a claimed submission is always finished. Any store or
/// sandbox failure ends the loop with that error and leaves the submission
/// being graded in `running`.
pub async fn dispatcher(
    id: u8,
    runner: Arc<dyn SandboxRunner>,
    db_pool: SqlitePool,
    poll_interval: Duration,
    token: CancellationToken,
) -> anyhow::Result<()> {
    log::info!("Dispatcher {id} started");

    loop {
        if token.is_cancelled() {
            log::info!("Dispatcher {id} received shutdown signal, stopping");
            break;
        }

        match dispatch_once(&runner, &db_pool).await? {
            Some((submission_id, rollup)) => {
                log::info!(
                    "Dispatcher {id} finished submission {submission_id}: {} ({} passed, {} ms)",
                    rollup.status,
                    rollup.score,
                    rollup.time_ms
                );
            }
            None => {
                tokio::select! {
                    _ = token.cancelled() => {
                        log::info!("Dispatcher {id} received shutdown signal, stopping");
                        break;
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }

    log::info!("Dispatcher {id} has shut down gracefully");
    Ok(())
}

/// Claims and grades at most one submission; `None` if nothing was queued
pub async fn dispatch_once(
    runner: &Arc<dyn SandboxRunner>,
    db_pool: &SqlitePool,
) -> anyhow::Result<Option<(SubmissionId, Rollup)>> {
    let Some(submission_id) = db::claim_next_queued(db_pool)
        .await
        .context("Failed to claim a queued submission")?
    else {
        return Ok(None);
    };
    log::debug!("Claimed submission {submission_id}");

    let rollup = grade_submission(submission_id, runner, db_pool)
        .await
        .with_context(|| format!("Grading submission {submission_id} failed"))?;

    Ok(Some((submission_id, rollup)))
}

/// Runs every test case of a claimed submission in `idx` order, storing each
/// result as soon as it is known, then finalizes the submission
pub async fn grade_submission(
    submission_id: SubmissionId,
    runner: &Arc<dyn SandboxRunner>,
    db_pool: &SqlitePool,
) -> anyhow::Result<Rollup> {
    let (problem_id, source_code) = db::load_submission(submission_id, db_pool).await?;
    let testcases = db::load_testcases(problem_id, db_pool).await?;
    if testcases.is_empty() {
        log::warn!("Problem {problem_id} of submission {submission_id} has no test cases");
    }

    let source_code: Arc<str> = source_code.into();
    let mut rollup = Rollup::new();

    for testcase in &testcases {
        let report = judge_testcase(runner, &source_code, testcase).await?;
        log::debug!(
            "Submission {submission_id} case {}: {} in {} ms",
            testcase.idx,
            report.verdict,
            report.time_ms
        );

        db::append_result(
            submission_id,
            testcase.id,
            report.verdict,
            report.time_ms,
            &report.stdout,
            &report.stderr,
            db_pool,
        )
        .await?;
        rollup.record(report.verdict, report.time_ms);
    }

    db::finalize(
        submission_id,
        rollup.status,
        rollup.score,
        rollup.time_ms,
        db_pool,
    )
    .await?;

    Ok(rollup)
}

/// Runs one test case in the sandbox, in the mode its data calls for
pub async fn judge_testcase(
    runner: &Arc<dyn SandboxRunner>,
    source_code: &Arc<str>,
    testcase: &TestCase,
) -> anyhow::Result<CaseReport> {
    let timeout_ms = u64::try_from(testcase.timeout_ms).unwrap_or(0);
    let runner = Arc::clone(runner);
    let source_code = Arc::clone(source_code);

    let report = match select_mode(testcase) {
        JudgeMode::Raw => {
            let stdin_text = testcase.input_text.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                runner.run_raw(&source_code, &stdin_text, timeout_ms)
            })
            .await
            .context("Sandbox task failed")??;

            CaseReport {
                verdict: raw_verdict(&outcome, &testcase.expected_text),
                time_ms: outcome.elapsed_ms,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
            }
        }
        JudgeMode::Structured { input, expected } => {
            let outcome = tokio::task::spawn_blocking(move || {
                runner.run_structured(&source_code, &input, timeout_ms)
            })
            .await
            .context("Sandbox task failed")??;

            CaseReport {
                verdict: structured_verdict(&outcome, &expected),
                time_ms: outcome.elapsed_ms,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
            }
        }
    };

    Ok(report)
}
