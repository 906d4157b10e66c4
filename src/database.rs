use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::anyhow;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::create_timestamp;
use crate::models::{
    NewSubmission, NewTestCase, Submission, SubmissionId, SubmissionResult, SubmissionStatus,
    TestCase, TestCaseId, Verdict,
};

const DATABASE_NAME: &str = "grader.sqlite3";

pub fn get_db_path() -> anyhow::Result<PathBuf> {
    use directories::ProjectDirs;

    let proj_dirs = ProjectDirs::from("", "", "grader")
        .ok_or_else(|| anyhow!("Unable to find user directory"))?;
    let data_dir = proj_dirs.data_local_dir();

    fs::create_dir_all(data_dir)?;

    Ok(data_dir.join(DATABASE_NAME))
}

pub async fn init_db(db_path: impl AsRef<Path>) -> sqlx::Result<SqlitePool> {
    // Pragmas go on the connect options so every pooled connection gets them
    let options = SqliteConnectOptions::new()
        .filename(db_path.as_ref())
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5)) // several dispatchers contend on claims
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

    let db_pool = SqlitePoolOptions::new()
        .max_connections(4)
        .min_connections(0)
        .connect_with(options)
        .await?;

    let mut tx = db_pool.begin().await?;

    for sql in &[
        r"
        CREATE TABLE IF NOT EXISTS submissions (
            id            INTEGER  PRIMARY KEY AUTOINCREMENT,
            user_id       INTEGER  NOT NULL,
            problem_id    INTEGER  NOT NULL,
            language      TEXT     NOT NULL DEFAULT 'python',
            source_code   TEXT     NOT NULL,
            status        TEXT     NOT NULL DEFAULT 'queued',
            score         INTEGER  NOT NULL DEFAULT 0,
            time_ms       INTEGER  NOT NULL DEFAULT 0,
            created_at    TEXT     NOT NULL,
            finished_at   TEXT
        );",
        "CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions(status, id);",
        r"
        CREATE TABLE IF NOT EXISTS testcases (
            id             INTEGER  PRIMARY KEY AUTOINCREMENT,
            problem_id     INTEGER  NOT NULL,
            idx            INTEGER  NOT NULL,
            input_text     TEXT     NOT NULL,
            expected_text  TEXT     NOT NULL,
            timeout_ms     INTEGER  NOT NULL DEFAULT 2000,
            points         INTEGER  NOT NULL DEFAULT 1,
            is_public      INTEGER  NOT NULL DEFAULT 0,
            UNIQUE (problem_id, idx)
        );",
        r"
        CREATE TABLE IF NOT EXISTS submission_results (
            id             INTEGER  PRIMARY KEY AUTOINCREMENT,
            submission_id  INTEGER  NOT NULL,
            testcase_id    INTEGER  NOT NULL,
            verdict        TEXT     NOT NULL,
            time_ms        INTEGER  NOT NULL,
            stdout         TEXT     NOT NULL DEFAULT '',
            stderr         TEXT     NOT NULL DEFAULT '',
            FOREIGN KEY (submission_id)  REFERENCES submissions (id),
            FOREIGN KEY (testcase_id)    REFERENCES testcases (id)
        );",
        "CREATE INDEX IF NOT EXISTS idx_results_submission ON submission_results(submission_id);",
    ] {
        sqlx::query(sql).execute(tx.as_mut()).await?;
    }

    tx.commit().await?;

    log::info!("Initialized database at {}", db_path.as_ref().display());

    Ok(db_pool)
}

pub fn remove_db(db_path: impl AsRef<Path>) {
    // Remove WAL and SHM files (ignore errors as they might not exist)
    let wal_path = format!("{}-wal", db_path.as_ref().display());
    let shm_path = format!("{}-shm", db_path.as_ref().display());
    let _ = fs::remove_file(wal_path);
    let _ = fs::remove_file(shm_path);

    if let Err(e) = fs::remove_file(&db_path) {
        log::warn!(
            "Unable to remove database at {}: {e}",
            db_path.as_ref().display()
        );
    } else {
        log::info!("Removed database at {}", db_path.as_ref().display());
    }
}

#[derive(sqlx::FromRow)]
struct SubmissionRow {
    id: i64,
    user_id: i64,
    problem_id: i64,
    language: String,
    source_code: String,
    status: String,
    score: i64,
    time_ms: i64,
    created_at: String,
    finished_at: Option<String>,
}

impl TryFrom<SubmissionRow> for Submission {
    type Error = sqlx::Error;

    fn try_from(row: SubmissionRow) -> sqlx::Result<Self> {
        Ok(Submission {
            id: row.id,
            user_id: row.user_id,
            problem_id: row.problem_id,
            language: row.language,
            source_code: row.source_code,
            status: row.status.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            score: row.score,
            time_ms: row.time_ms,
            created_at: row.created_at,
            finished_at: row.finished_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    submission_id: i64,
    testcase_id: i64,
    idx: i64,
    verdict: String,
    time_ms: i64,
    stdout: String,
    stderr: String,
}

impl TryFrom<ResultRow> for SubmissionResult {
    type Error = sqlx::Error;

    fn try_from(row: ResultRow) -> sqlx::Result<Self> {
        Ok(SubmissionResult {
            submission_id: row.submission_id,
            testcase_id: row.testcase_id,
            idx: row.idx,
            verdict: row.verdict.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            time_ms: row.time_ms,
            stdout: row.stdout,
            stderr: row.stderr,
        })
    }
}

/// Inserts a submission with status `queued` and returns its id
pub async fn create_submission(body: &NewSubmission, pool: &SqlitePool) -> sqlx::Result<SubmissionId> {
    let now = create_timestamp();

    let result = sqlx::query(
        r#"
        INSERT INTO submissions (user_id, problem_id, language, source_code, status, created_at)
        VALUES (?, ?, ?, ?, 'queued', ?)
        "#,
    )
    .bind(body.user_id)
    .bind(body.problem_id)
    .bind(&body.language)
    .bind(&body.source_code)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Atomically moves the oldest queued submission to `running` and returns its id.
///
/// Selection and transition happen in one statement, so two dispatchers can
/// never claim the same row; a caller finding nothing queued gets `None`
/// without side effects.
pub async fn claim_next_queued(pool: &SqlitePool) -> sqlx::Result<Option<SubmissionId>> {
    sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE submissions
        SET status = 'running'
        WHERE id = (
            SELECT id FROM submissions
            WHERE status = 'queued'
            ORDER BY id
            LIMIT 1
        )
        AND status = 'queued'
        RETURNING id
        "#,
    )
    .fetch_optional(pool)
    .await
}

/// Returns `(problem_id, source_code)` of a submission
pub async fn load_submission(id: SubmissionId, pool: &SqlitePool) -> sqlx::Result<(i64, String)> {
    sqlx::query_as::<_, (i64, String)>(
        "SELECT problem_id, source_code FROM submissions WHERE id = ?",
    )
    .bind(id)
    .fetch_one(pool)
    .await
}

pub async fn fetch_submission(id: SubmissionId, pool: &SqlitePool) -> sqlx::Result<Submission> {
    log::debug!("Trying to fetch submission {id} from database");

    let row = sqlx::query_as::<_, SubmissionRow>(
        r#"
        SELECT id, user_id, problem_id, language, source_code, status, score, time_ms,
               created_at, finished_at
        FROM submissions
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_one(pool)
    .await?;

    row.try_into()
}

/// Test cases of a problem in `idx` order
pub async fn load_testcases(problem_id: i64, pool: &SqlitePool) -> sqlx::Result<Vec<TestCase>> {
    sqlx::query_as::<_, TestCase>(
        r#"
        SELECT id, problem_id, idx, input_text, expected_text, timeout_ms, points, is_public
        FROM testcases
        WHERE problem_id = ?
        ORDER BY idx
        "#,
    )
    .bind(problem_id)
    .fetch_all(pool)
    .await
}

/// Records the outcome of one test case; committed on its own
pub async fn append_result(
    submission_id: SubmissionId,
    testcase_id: TestCaseId,
    verdict: Verdict,
    time_ms: i64,
    stdout: &str,
    stderr: &str,
    pool: &SqlitePool,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO submission_results (submission_id, testcase_id, verdict, time_ms, stdout, stderr)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(submission_id)
    .bind(testcase_id)
    .bind(verdict.as_str())
    .bind(time_ms)
    .bind(stdout)
    .bind(stderr)
    .execute(pool)
    .await?;

    Ok(())
}

/// Moves a running submission to its terminal status.
///
/// Fails with `RowNotFound` if the submission is not `running`, which keeps a
/// terminal submission from being rewritten.
pub async fn finalize(
    id: SubmissionId,
    status: SubmissionStatus,
    score: i64,
    time_ms: i64,
    pool: &SqlitePool,
) -> sqlx::Result<()> {
    debug_assert!(status.is_terminal());
    let now = create_timestamp();

    let updated = sqlx::query(
        r#"
        UPDATE submissions
        SET status = ?, score = ?, time_ms = ?, finished_at = ?
        WHERE id = ? AND status = 'running'
        "#,
    )
    .bind(status.as_str())
    .bind(score)
    .bind(time_ms)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(sqlx::Error::RowNotFound);
    }
    Ok(())
}

/// Results of a submission in test case order
pub async fn fetch_results(
    submission_id: SubmissionId,
    pool: &SqlitePool,
) -> sqlx::Result<Vec<SubmissionResult>> {
    let rows = sqlx::query_as::<_, ResultRow>(
        r#"
        SELECT r.submission_id, r.testcase_id, t.idx, r.verdict, r.time_ms, r.stdout, r.stderr
        FROM submission_results r
        JOIN testcases t ON t.id = r.testcase_id
        WHERE r.submission_id = ?
        ORDER BY t.idx, r.id
        "#,
    )
    .bind(submission_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(SubmissionResult::try_from).collect()
}

/// Puts every `running` submission back into the queue and drops its partial results.
///
/// Meant for recovery after a dispatcher crash, while no dispatcher is running.
/// Returns the number of submissions requeued.
pub async fn requeue_running(pool: &SqlitePool) -> sqlx::Result<u64> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        DELETE FROM submission_results
        WHERE submission_id IN (SELECT id FROM submissions WHERE status = 'running')
        "#,
    )
    .execute(tx.as_mut())
    .await?;

    let requeued = sqlx::query("UPDATE submissions SET status = 'queued' WHERE status = 'running'")
        .execute(tx.as_mut())
        .await?
        .rows_affected();

    tx.commit().await?;
    Ok(requeued)
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The upload clashes with stored data; nothing was written
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for UploadError {
    fn from(e: sqlx::Error) -> Self {
        match e.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => {
                Self::Conflict("test case index already exists for this problem".to_string())
            }
            _ => Self::Database(e),
        }
    }
}

/// Stores a batch of test cases for a problem in one transaction.
///
/// With `replace_existing`, the problem's previous cases are removed first;
/// this is refused while any stored result still points at them.
pub async fn upload_testcases(
    problem_id: i64,
    cases: &[NewTestCase],
    replace_existing: bool,
    pool: &SqlitePool,
) -> Result<Vec<TestCase>, UploadError> {
    let mut tx = pool.begin().await?;

    if replace_existing {
        // First statement is a write, so the transaction holds the write lock
        // before it reads anything
        let removed = match sqlx::query("DELETE FROM testcases WHERE problem_id = ?")
            .bind(problem_id)
            .execute(tx.as_mut())
            .await
        {
            Ok(done) => done.rows_affected(),
            Err(e)
                if e
                    .as_database_error()
                    .is_some_and(|db_err| db_err.is_foreign_key_violation()) =>
            {
                return Err(UploadError::Conflict(format!(
                    "stored results reference the test cases of problem {problem_id}"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        log::debug!("Removed {removed} old test cases of problem {problem_id}");
    }

    for case in cases {
        sqlx::query(
            r#"
            INSERT INTO testcases (problem_id, idx, input_text, expected_text, timeout_ms, points, is_public)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(problem_id)
        .bind(case.idx)
        .bind(&case.input_text)
        .bind(&case.expected_text)
        .bind(case.timeout_ms)
        .bind(case.points)
        .bind(case.is_public)
        .execute(tx.as_mut())
        .await?;
    }

    tx.commit().await?;

    Ok(load_testcases(problem_id, pool).await?)
}
