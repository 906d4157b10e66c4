use serde::Deserialize;
use serde_json::Value;

use super::{RawOutcome, StructuredOutcome};

/// File name the bootstrap program is written under, next to the submission
pub const HARNESS_FILE_NAME: &str = "invoke_answer.py";

/// Bootstrap program that turns a JSON request on stdin into a call of the
/// submission's `answer` function, and its return value into a JSON reply.
///
/// Invoked as `<interpreter> invoke_answer.py <submission file>`. The reply is
/// `{"result": ..., "stdout": ..., "set_paths": [...]}`; anything the
/// submission prints, at import time included, goes into `stdout`.
pub const HARNESS_SOURCE: &str = r#"import contextlib
import importlib.util
import io
import json
import sys


def pointer_token(key):
    return key.replace("~", "~0").replace("/", "~1")


def wire_key(key):
    return key if isinstance(key, str) else json.dumps(key)


def to_wire(value, path, set_paths):
    if isinstance(value, (set, frozenset)):
        set_paths.append(path)
        try:
            items = sorted(value)
        except TypeError:
            items = list(value)
        return [to_wire(item, "%s/%d" % (path, i), set_paths) for i, item in enumerate(items)]
    if isinstance(value, (list, tuple)):
        return [to_wire(item, "%s/%d" % (path, i), set_paths) for i, item in enumerate(value)]
    if isinstance(value, dict):
        converted = {}
        for key, item in value.items():
            key = wire_key(key)
            converted[key] = to_wire(item, "%s/%s" % (path, pointer_token(key)), set_paths)
        return converted
    return value


def split_arguments(request):
    if isinstance(request, dict) and ("args" in request or "kwargs" in request):
        return request.get("args", []), request.get("kwargs", {})
    if isinstance(request, list):
        return request, {}
    return [request], {}


def main():
    target = sys.argv[1]
    request = json.loads(sys.stdin.read())
    args, kwargs = split_arguments(request)

    captured = io.StringIO()
    with contextlib.redirect_stdout(captured):
        spec = importlib.util.spec_from_file_location("submission", target)
        module = importlib.util.module_from_spec(spec)
        spec.loader.exec_module(module)
        entry = getattr(module, "answer", None)
        if not callable(entry):
            raise AttributeError("submission does not define answer()")
        result = entry(*args, **kwargs)

    set_paths = []
    reply = {
        "result": to_wire(result, "", set_paths),
        "stdout": captured.getvalue(),
        "set_paths": set_paths,
    }
    sys.stdout.write(json.dumps(reply, ensure_ascii=False, allow_nan=False))


if __name__ == "__main__":
    main()
"#;

#[derive(Deserialize)]
struct HarnessReply {
    result: Value,
    stdout: String,
    #[serde(default)]
    set_paths: Vec<String>,
}

/// Recovers the return value and captured output from a harness run
pub fn decode_harness_output(raw: RawOutcome) -> StructuredOutcome {
    let RawOutcome {
        exit_code,
        stdout,
        stderr,
        elapsed_ms,
    } = raw;

    match serde_json::from_str::<HarnessReply>(&stdout) {
        Ok(reply) => StructuredOutcome {
            exit_code,
            result: Some(reply.result),
            set_paths: reply.set_paths,
            stdout: reply.stdout,
            stderr,
            elapsed_ms,
        },
        Err(e) => {
            log::debug!("Undecodable harness output (exit code {exit_code}): {e}");
            StructuredOutcome {
                exit_code,
                result: None,
                set_paths: Vec::new(),
                stdout,
                stderr,
                elapsed_ms,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::TIMEOUT_EXIT_CODE;
    use serde_json::json;

    fn raw(exit_code: i32, stdout: &str) -> RawOutcome {
        RawOutcome {
            exit_code,
            stdout: stdout.to_string(),
            stderr: String::new(),
            elapsed_ms: 12,
        }
    }

    #[test]
    fn test_decodes_reply() {
        let outcome = decode_harness_output(raw(
            0,
            r#"{"result": [1, 2, 3], "stdout": "debug\n", "set_paths": [""]}"#,
        ));
        assert_eq!(outcome.result, Some(json!([1, 2, 3])));
        assert_eq!(outcome.stdout, "debug\n");
        assert_eq!(outcome.set_paths, vec![String::new()]);
        assert_eq!(outcome.elapsed_ms, 12);
    }

    #[test]
    fn test_set_paths_are_optional() {
        let outcome = decode_harness_output(raw(0, r#"{"result": null, "stdout": ""}"#));
        assert_eq!(outcome.result, Some(Value::Null));
        assert!(outcome.set_paths.is_empty());
    }

    #[test]
    fn test_garbage_output_has_no_result() {
        let outcome = decode_harness_output(raw(0, "Traceback (most recent call last):"));
        assert_eq!(outcome.result, None);
        assert_eq!(outcome.stdout, "Traceback (most recent call last):");
    }

    #[test]
    fn test_missing_result_key_has_no_result() {
        let outcome = decode_harness_output(raw(0, r#"{"stdout": ""}"#));
        assert_eq!(outcome.result, None);
    }

    #[test]
    fn test_timeout_passes_through() {
        let outcome = decode_harness_output(RawOutcome::timed_out(1003));
        assert_eq!(outcome.exit_code, TIMEOUT_EXIT_CODE);
        assert!(outcome.is_timeout());
        assert_eq!(outcome.result, None);
        assert_eq!(outcome.stdout, "");
        assert_eq!(outcome.elapsed_ms, 1003);
    }
}
