use actix_web::{HttpResponse, Responder, get, post, web};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use super::{ErrorResponseWithMessage, external_error, invalid_argument};
use crate::config::LanguageConfig;
use crate::database as db;
use crate::models::{NewSubmission, Submission, SubmissionResult};

/// A submission together with its per-test results, in test case order
#[derive(Serialize, Deserialize, Debug)]
pub struct SubmissionView {
    #[serde(flatten)]
    pub submission: Submission,
    pub results: Vec<SubmissionResult>,
}

/// Enqueues a submission; the dispatcher picks it up from the store
#[post("/submissions")]
pub async fn post_submission_handler(
    pool: web::Data<SqlitePool>,
    language: web::Data<LanguageConfig>,
    body: web::Json<NewSubmission>,
) -> impl Responder {
    if !body.language.eq_ignore_ascii_case(&language.name) {
        return invalid_argument(format!(
            "Language {} is not supported, submissions are graded as {}",
            body.language, language.name
        ));
    }

    let mut submission = body.into_inner();
    submission.language = language.name.clone();

    let id = match db::create_submission(&submission, &pool).await {
        Ok(id) => {
            log::info!("Inserted submission {id} into database");
            id
        }
        Err(e) => {
            log::error!("Failed to insert submission into database: {e}");
            return external_error();
        }
    };

    match db::fetch_submission(id, &pool).await {
        Ok(record) => HttpResponse::Ok().json(record),
        Err(e) => {
            log::error!("Failed to read back submission {id}: {e}");
            external_error()
        }
    }
}

#[get("/submissions/{id}")]
pub async fn get_submission_handler(
    pool: web::Data<SqlitePool>,
    path: web::Path<(i64,)>,
) -> impl Responder {
    let submission_id = path.into_inner().0;

    let submission = match db::fetch_submission(submission_id, &pool).await {
        Ok(submission) => submission,
        Err(sqlx::Error::RowNotFound) => {
            log::info!("Got nothing with submission id {submission_id} from database");
            return HttpResponse::NotFound().json(ErrorResponseWithMessage {
                reason: "ERR_NOT_FOUND",
                code: 3,
                message: format!("Submission {submission_id} not found."),
            });
        }
        Err(e) => {
            log::error!("Failed to retrieve submission {submission_id}: {e}");
            return external_error();
        }
    };

    match db::fetch_results(submission_id, &pool).await {
        Ok(results) => HttpResponse::Ok().json(SubmissionView {
            submission,
            results,
        }),
        Err(e) => {
            log::error!("Failed to retrieve results of submission {submission_id}: {e}");
            external_error()
        }
    }
}
