use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub type SubmissionId = i64;
pub type TestCaseId = i64;

/// Outcome of a single test case
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Ok,
    Wa,
    Re,
    Tle,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Wa => "wa",
            Self::Re => "re",
            Self::Tle => "tle",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Self::Ok),
            "wa" => Ok(Self::Wa),
            "re" => Ok(Self::Re),
            "tle" => Ok(Self::Tle),
            other => Err(format!("unknown verdict: {other}")),
        }
    }
}

/// Lifecycle status of a submission.
///
/// `Queued -> Running -> {Accepted, WrongAnswer, RuntimeError, Tle}`, and
/// nothing else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Queued,
    Running,
    Accepted,
    WrongAnswer,
    RuntimeError,
    Tle,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Accepted => "accepted",
            Self::WrongAnswer => "wrong_answer",
            Self::RuntimeError => "runtime_error",
            Self::Tle => "tle",
        }
    }

    /// Returns true once grading has finished
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "accepted" => Ok(Self::Accepted),
            "wrong_answer" => Ok(Self::WrongAnswer),
            "runtime_error" => Ok(Self::RuntimeError),
            "tle" => Ok(Self::Tle),
            other => Err(format!("unknown submission status: {other}")),
        }
    }
}

impl From<Verdict> for SubmissionStatus {
    /// The submission status a failing verdict settles on
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Ok => Self::Accepted,
            Verdict::Wa => Self::WrongAnswer,
            Verdict::Re => Self::RuntimeError,
            Verdict::Tle => Self::Tle,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Submission {
    pub id: SubmissionId,
    pub user_id: i64,
    pub problem_id: i64,
    pub language: String,
    pub source_code: String,
    pub status: SubmissionStatus,
    pub score: i64,
    pub time_ms: i64,
    pub created_at: String,
    pub finished_at: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewSubmission {
    pub user_id: i64,
    pub problem_id: i64,
    #[serde(default = "default_language")]
    pub language: String,
    pub source_code: String,
}

fn default_language() -> String {
    "python".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TestCase {
    pub id: TestCaseId,
    pub problem_id: i64,
    pub idx: i64,
    pub input_text: String,
    pub expected_text: String,
    pub timeout_ms: i64,
    pub points: i64,
    pub is_public: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewTestCase {
    pub idx: i64,
    pub input_text: String,
    pub expected_text: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i64,
    #[serde(default = "default_points")]
    pub points: i64,
    #[serde(default)]
    pub is_public: bool,
}

fn default_timeout_ms() -> i64 {
    2000
}

fn default_points() -> i64 {
    1
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SubmissionResult {
    pub submission_id: SubmissionId,
    pub testcase_id: TestCaseId,
    pub idx: i64,
    pub verdict: Verdict,
    pub time_ms: i64,
    pub stdout: String,
    pub stderr: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_storage_strings() {
        for status in [
            SubmissionStatus::Queued,
            SubmissionStatus::Running,
            SubmissionStatus::Accepted,
            SubmissionStatus::WrongAnswer,
            SubmissionStatus::RuntimeError,
            SubmissionStatus::Tle,
        ] {
            assert_eq!(status.as_str().parse::<SubmissionStatus>(), Ok(status));
        }
        assert!("finished".parse::<SubmissionStatus>().is_err());
    }

    #[test]
    fn test_serde_names_match_storage_strings() {
        let json = serde_json::to_string(&SubmissionStatus::WrongAnswer).unwrap();
        assert_eq!(json, "\"wrong_answer\"");
        let json = serde_json::to_string(&Verdict::Tle).unwrap();
        assert_eq!(json, "\"tle\"");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SubmissionStatus::Queued.is_terminal());
        assert!(!SubmissionStatus::Running.is_terminal());
        assert!(SubmissionStatus::Tle.is_terminal());
        assert_eq!(SubmissionStatus::from(Verdict::Re), SubmissionStatus::RuntimeError);
    }

    #[test]
    fn test_new_test_case_defaults() {
        let case: NewTestCase =
            serde_json::from_str(r#"{"idx": 0, "input_text": "1", "expected_text": "2"}"#)
                .unwrap();
        assert_eq!(case.timeout_ms, 2000);
        assert_eq!(case.points, 1);
        assert!(!case.is_public);
    }
}
