use pretty_assertions::assert_eq;
use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use grader::database::{self as db, UploadError};
use grader::models::{NewSubmission, NewTestCase, SubmissionStatus, Verdict};

// Helper function to create an isolated test database; dropping the dir removes it
async fn create_test_db() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_pool = db::init_db(dir.path().join("test_grader.db"))
        .await
        .expect("Failed to initialize test database");
    (db_pool, dir)
}

fn new_submission(problem_id: i64, source_code: &str) -> NewSubmission {
    NewSubmission {
        user_id: 1,
        problem_id,
        language: "python".to_string(),
        source_code: source_code.to_string(),
    }
}

fn new_case(idx: i64, input_text: &str, expected_text: &str) -> NewTestCase {
    NewTestCase {
        idx,
        input_text: input_text.to_string(),
        expected_text: expected_text.to_string(),
        timeout_ms: 1000,
        points: 1,
        is_public: false,
    }
}

#[tokio::test]
async fn test_claim_on_empty_queue_returns_none() {
    let (pool, _dir) = create_test_db().await;
    assert_eq!(db::claim_next_queued(&pool).await.unwrap(), None);
}

#[tokio::test]
async fn test_claim_takes_oldest_and_marks_running() {
    let (pool, _dir) = create_test_db().await;
    let first = db::create_submission(&new_submission(1, "a"), &pool).await.unwrap();
    let second = db::create_submission(&new_submission(1, "b"), &pool).await.unwrap();

    assert_eq!(db::claim_next_queued(&pool).await.unwrap(), Some(first));
    assert_eq!(
        db::fetch_submission(first, &pool).await.unwrap().status,
        SubmissionStatus::Running
    );
    assert_eq!(
        db::fetch_submission(second, &pool).await.unwrap().status,
        SubmissionStatus::Queued
    );

    assert_eq!(db::claim_next_queued(&pool).await.unwrap(), Some(second));
    assert_eq!(db::claim_next_queued(&pool).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_are_exclusive() {
    let (pool, _dir) = create_test_db().await;
    let total = 40;
    for i in 0..total {
        db::create_submission(&new_submission(1, &format!("src {i}")), &pool)
            .await
            .unwrap();
    }

    let mut claimers = JoinSet::new();
    for _ in 0..8 {
        let pool = pool.clone();
        claimers.spawn(async move {
            let mut claimed = Vec::new();
            while let Some(id) = db::claim_next_queued(&pool).await.unwrap() {
                claimed.push(id);
            }
            claimed
        });
    }

    let mut all = Vec::new();
    while let Some(res) = claimers.join_next().await {
        all.extend(res.unwrap());
    }
    all.sort();
    let before = all.len();
    all.dedup();

    assert_eq!(before, total);
    assert_eq!(all.len(), total);
}

#[tokio::test]
async fn test_finalize_only_applies_to_running() {
    let (pool, _dir) = create_test_db().await;
    let id = db::create_submission(&new_submission(1, "a"), &pool).await.unwrap();

    // still queued
    let err = db::finalize(id, SubmissionStatus::Accepted, 0, 0, &pool).await;
    assert!(matches!(err, Err(sqlx::Error::RowNotFound)));

    db::claim_next_queued(&pool).await.unwrap();
    db::finalize(id, SubmissionStatus::WrongAnswer, 2, 120, &pool)
        .await
        .unwrap();

    let submission = db::fetch_submission(id, &pool).await.unwrap();
    assert_eq!(submission.status, SubmissionStatus::WrongAnswer);
    assert_eq!(submission.score, 2);
    assert_eq!(submission.time_ms, 120);
    assert!(submission.finished_at.is_some());

    // terminal submissions are never rewritten
    let err = db::finalize(id, SubmissionStatus::Accepted, 3, 1, &pool).await;
    assert!(matches!(err, Err(sqlx::Error::RowNotFound)));
}

#[tokio::test]
async fn test_testcases_and_results_come_back_in_idx_order() {
    let (pool, _dir) = create_test_db().await;
    let stored = db::upload_testcases(
        7,
        &[new_case(2, "c", "C"), new_case(0, "a", "A"), new_case(1, "b", "B")],
        false,
        &pool,
    )
    .await
    .unwrap();
    let idxs: Vec<i64> = stored.iter().map(|t| t.idx).collect();
    assert_eq!(idxs, vec![0, 1, 2]);

    let id = db::create_submission(&new_submission(7, "a"), &pool).await.unwrap();
    db::claim_next_queued(&pool).await.unwrap();
    let (problem_id, source_code) = db::load_submission(id, &pool).await.unwrap();
    assert_eq!((problem_id, source_code.as_str()), (7, "a"));

    // insert out of order on purpose
    for (tc, verdict) in stored.iter().rev().zip([Verdict::Wa, Verdict::Ok, Verdict::Tle]) {
        db::append_result(id, tc.id, verdict, tc.idx * 10, "out", "err", &pool)
            .await
            .unwrap();
    }

    let results = db::fetch_results(id, &pool).await.unwrap();
    let summary: Vec<(i64, Verdict)> = results.iter().map(|r| (r.idx, r.verdict)).collect();
    assert_eq!(
        summary,
        vec![(0, Verdict::Tle), (1, Verdict::Ok), (2, Verdict::Wa)]
    );
}

#[tokio::test]
async fn test_upload_index_collision_is_rejected_atomically() {
    let (pool, _dir) = create_test_db().await;
    db::upload_testcases(1, &[new_case(0, "1", "1")], false, &pool)
        .await
        .unwrap();

    let err = db::upload_testcases(1, &[new_case(1, "2", "2"), new_case(0, "3", "3")], false, &pool)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Conflict(_)));

    // the non-colliding case of the failed batch was rolled back
    let cases = db::load_testcases(1, &pool).await.unwrap();
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].input_text, "1");
}

#[tokio::test]
async fn test_upload_replace_existing() {
    let (pool, _dir) = create_test_db().await;
    db::upload_testcases(1, &[new_case(0, "1", "1"), new_case(1, "2", "2")], false, &pool)
        .await
        .unwrap();

    let cases = db::upload_testcases(1, &[new_case(0, "9", "9")], true, &pool)
        .await
        .unwrap();
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].expected_text, "9");

    // once results reference the cases, replacing them is refused
    let id = db::create_submission(&new_submission(1, "a"), &pool).await.unwrap();
    db::claim_next_queued(&pool).await.unwrap();
    db::append_result(id, cases[0].id, Verdict::Ok, 1, "9", "", &pool)
        .await
        .unwrap();

    let err = db::upload_testcases(1, &[new_case(0, "5", "5")], true, &pool)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Conflict(_)));
    assert_eq!(db::load_testcases(1, &pool).await.unwrap(), cases);
}

#[tokio::test]
async fn test_requeue_running_drops_partial_results() {
    let (pool, _dir) = create_test_db().await;
    let cases = db::upload_testcases(1, &[new_case(0, "1", "1"), new_case(1, "2", "2")], false, &pool)
        .await
        .unwrap();
    let crashed = db::create_submission(&new_submission(1, "a"), &pool).await.unwrap();
    let waiting = db::create_submission(&new_submission(1, "b"), &pool).await.unwrap();

    db::claim_next_queued(&pool).await.unwrap();
    db::append_result(crashed, cases[0].id, Verdict::Ok, 3, "1", "", &pool)
        .await
        .unwrap();

    assert_eq!(db::requeue_running(&pool).await.unwrap(), 1);

    let submission = db::fetch_submission(crashed, &pool).await.unwrap();
    assert_eq!(submission.status, SubmissionStatus::Queued);
    assert!(db::fetch_results(crashed, &pool).await.unwrap().is_empty());
    assert_eq!(
        db::fetch_submission(waiting, &pool).await.unwrap().status,
        SubmissionStatus::Queued
    );
    assert_eq!(db::claim_next_queued(&pool).await.unwrap(), Some(crashed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replace_upload_alongside_other_writers() {
    let (pool, _dir) = create_test_db().await;
    let stop = CancellationToken::new();

    let mut writers = JoinSet::new();
    for w in 0..3 {
        let pool = pool.clone();
        let stop = stop.clone();
        writers.spawn(async move {
            let mut written = 0;
            while !stop.is_cancelled() {
                db::create_submission(&new_submission(100 + w, "x"), &pool)
                    .await
                    .unwrap();
                written += 1;
            }
            written
        });
    }

    for round in 0..100 {
        let input = format!("{round}");
        let res = db::upload_testcases(2, &[new_case(0, &input, &input)], true, &pool).await;
        assert!(res.is_ok(), "upload {round} failed: {:?}", res.err());
    }

    stop.cancel();
    let mut written = 0;
    while let Some(res) = writers.join_next().await {
        written += res.unwrap();
    }
    assert!(written > 0);

    let cases = db::load_testcases(2, &pool).await.unwrap();
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].input_text, "99");
}
