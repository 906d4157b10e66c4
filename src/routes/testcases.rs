use actix_web::{HttpResponse, Responder, post, web};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use super::{external_error, invalid_argument};
use crate::database::{self as db, UploadError};
use crate::models::NewTestCase;

#[derive(Serialize, Deserialize, Debug)]
pub struct UploadTestCasesRequest {
    /// Drop the problem's current test cases before storing these
    #[serde(default)]
    pub replace_existing: bool,
    pub cases: Vec<NewTestCase>,
}

#[post("/problems/{id}/testcases")]
pub async fn post_testcases_handler(
    pool: web::Data<SqlitePool>,
    path: web::Path<(i64,)>,
    body: web::Json<UploadTestCasesRequest>,
) -> impl Responder {
    let problem_id = path.into_inner().0;

    if let Some(case) = body.cases.iter().find(|c| c.timeout_ms <= 0) {
        return invalid_argument(format!(
            "Test case {} has a non-positive timeout of {} ms",
            case.idx, case.timeout_ms
        ));
    }

    match db::upload_testcases(problem_id, &body.cases, body.replace_existing, &pool).await {
        Ok(stored) => {
            log::info!(
                "Stored {} test cases for problem {problem_id} (replace_existing: {})",
                body.cases.len(),
                body.replace_existing
            );
            HttpResponse::Ok().json(stored)
        }
        Err(UploadError::Conflict(message)) => {
            log::info!("Rejected test case upload for problem {problem_id}: {message}");
            invalid_argument(message)
        }
        Err(UploadError::Database(e)) => {
            log::error!("Failed to store test cases for problem {problem_id}: {e}");
            external_error()
        }
    }
}
