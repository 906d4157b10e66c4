pub mod canonical;

use serde_json::Value;

use crate::models::{SubmissionStatus, TestCase, Verdict};
use crate::sandbox::{RawOutcome, StructuredOutcome};

pub use canonical::{CanonicalValue, canonicalize, structurally_equal};

/// How a test case is checked
#[derive(Debug, Clone, PartialEq)]
pub enum JudgeMode {
    /// Program reads stdin and its trimmed stdout is compared as text
    Raw,
    /// The `answer` function is called with `input` and its return value is
    /// compared with `expected` as a value
    Structured { input: Value, expected: Value },
}

/// Picks the judge mode of a test case.
///
/// Structured mode is used when both texts parse as JSON and the expected
/// value is a scalar, mapping, or sequence; a bare `null` expected value
/// stays in raw mode.
pub fn select_mode(testcase: &TestCase) -> JudgeMode {
    let input = serde_json::from_str::<Value>(&testcase.input_text);
    let expected = serde_json::from_str::<Value>(&testcase.expected_text);

    match (input, expected) {
        (Ok(_), Ok(Value::Null)) | (Err(_), _) | (_, Err(_)) => JudgeMode::Raw,
        (Ok(input), Ok(expected)) => JudgeMode::Structured { input, expected },
    }
}

/// Raw comparison: equal after trimming surrounding whitespace
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    actual.trim() == expected.trim()
}

pub fn raw_verdict(outcome: &RawOutcome, expected_text: &str) -> Verdict {
    if outcome.is_timeout() {
        Verdict::Tle
    } else if outcome.exit_code != 0 {
        Verdict::Re
    } else if outputs_match(&outcome.stdout, expected_text) {
        Verdict::Ok
    } else {
        Verdict::Wa
    }
}

pub fn structured_verdict(outcome: &StructuredOutcome, expected: &Value) -> Verdict {
    if outcome.is_timeout() {
        return Verdict::Tle;
    }
    match &outcome.result {
        None => Verdict::Re,
        Some(actual) if structurally_equal(actual, expected, &outcome.set_paths) => Verdict::Ok,
        Some(_) => Verdict::Wa,
    }
}

/// Running summary of a submission, folded over its test cases in `idx` order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rollup {
    pub status: SubmissionStatus,
    pub score: i64,
    pub time_ms: i64,
}

impl Default for Rollup {
    fn default() -> Self {
        Self {
            status: SubmissionStatus::Accepted,
            score: 0,
            time_ms: 0,
        }
    }
}

impl Rollup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one test case. The first failing verdict fixes the status; later
    /// failures of any kind leave it alone.
    pub fn record(&mut self, verdict: Verdict, time_ms: i64) {
        self.time_ms = self.time_ms.max(time_ms);
        match verdict {
            Verdict::Ok => self.score += 1,
            failure if self.status == SubmissionStatus::Accepted => {
                self.status = failure.into();
            }
            _ => {}
        }
    }

    pub fn fold(cases: impl IntoIterator<Item = (Verdict, i64)>) -> Self {
        cases
            .into_iter()
            .fold(Self::new(), |mut rollup, (verdict, time_ms)| {
                rollup.record(verdict, time_ms);
                rollup
            })
    }
}
