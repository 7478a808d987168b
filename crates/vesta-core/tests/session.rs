//! Integration tests driving `Kernel::serve` over in-memory streams.

use std::io::Cursor;

use serde_json::{Value, json};
use vesta_core::{Kernel, KernelConfig};

// =============================================================================
// Test Helpers
// =============================================================================

/// Serve `lines` through a fresh kernel and parse the responses.
///
/// Runs on the test thread's default stack, as the binary does.
fn serve(lines: Vec<String>) -> Vec<Value> {
    let mut input = lines.join("\n");
    input.push('\n');
    let mut output = Vec::new();
    Kernel::new(KernelConfig::default())
        .serve(Cursor::new(input.into_bytes()), &mut output)
        .unwrap();

    String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn execute(code: &str) -> String {
    json!({"id": "x", "method": "execute", "params": {"code": code}}).to_string()
}

/// Run each snippet in one session and return its `text/plain` or error message.
fn outputs(snippets: &[&str]) -> Vec<String> {
    serve(snippets.iter().map(|code| execute(code)).collect())
        .into_iter()
        .map(|response| match response["result"]["text/plain"].as_str() {
            Some(text) => text.to_string(),
            None => response["error"]["message"].as_str().unwrap().to_string(),
        })
        .collect()
}

// =============================================================================
// Protocol properties
// =============================================================================

#[test]
fn test_print_output_is_exact() {
    assert_eq!(
        outputs(&["print('a')\nprint('b', end='')", "pass", "print()"]),
        vec!["a\nb", "ok", "\n"]
    );
}

#[test]
fn test_numeric_id_is_echoed() {
    let responses = serve(vec![r#"{"id": 3, "method": "ping"}"#.to_string()]);
    assert_eq!(responses, vec![json!({"id": 3, "result": {"ok": true}})]);
}

#[test]
fn test_many_pings_change_nothing() {
    let mut lines = vec![execute("n = 1")];
    lines.extend((0..50).map(|i| json!({"id": i.to_string(), "method": "ping"}).to_string()));
    lines.push(execute("n += 1\nprint(n)"));
    let responses = serve(lines);
    assert_eq!(responses.len(), 52);
    assert_eq!(responses[51]["result"]["text/plain"], "2\n");
}

#[test]
fn test_non_object_json_is_parse_error() {
    let responses = serve(vec!["[1, 2, 3]".to_string(), "\"execute\"".to_string()]);
    for response in responses {
        assert_eq!(response["error"]["code"], "parse_error");
        assert!(response.get("id").is_none());
    }
}

#[test]
fn test_non_string_code_is_coerced() {
    let line = json!({"id": "c", "method": "execute", "params": {"code": 42}}).to_string();
    let responses = serve(vec![line]);
    assert_eq!(responses[0]["result"]["text/plain"], "ok");
}

// =============================================================================
// Script behaviour across requests
// =============================================================================

#[test]
fn test_functions_survive_between_requests() {
    let results = outputs(&[
        "def fib(n):\n    a, b = 0, 1\n    for _ in range(n):\n        a, b = b, a + b\n    return a",
        "print([fib(i) for i in range(10)])",
        "memo = {}\ndef slow(n):\n    if n in memo:\n        return memo[n]\n    memo[n] = n * n\n    return memo[n]",
        "slow(4)\nslow(5)\nprint(sorted(memo.items()))",
    ]);
    assert_eq!(
        results,
        vec![
            "ok",
            "[0, 1, 1, 2, 3, 5, 8, 13, 21, 34]\n",
            "ok",
            "[(4, 16), (5, 25)]\n",
        ]
    );
}

#[test]
fn test_failure_keeps_partial_progress() {
    let results = outputs(&[
        "items = []\nitems.append(1)\nitems.append(1 / 0)\nitems.append(3)",
        "print(items)",
    ]);
    assert_eq!(results[0], "ZeroDivisionError: division by zero");
    assert_eq!(results[1], "[1]\n");
}

#[test]
fn test_output_of_failed_request_is_discarded() {
    let results = outputs(&["print('before')\nraise ValueError('nope')", "print('after')"]);
    assert_eq!(results, vec!["ValueError: nope", "after\n"]);
}

#[test]
fn test_string_processing() {
    let results = outputs(&[
        "words = 'the quick brown fox'.split()",
        "print(', '.join(w.title() for w in words))",
        "print(f'{len(words)} words, longest {max(words, key=len)!r}')",
        "print('{:>8.3f}|{:<5}|{:^7}'.format(3.14159, 'ab', 'mid'))",
    ]);
    assert_eq!(results[0], "ok");
    assert_eq!(results[1], "The, Quick, Brown, Fox\n");
    assert_eq!(results[2], "4 words, longest 'quick'\n");
    assert_eq!(results[3], "   3.142|ab   |  mid  \n");
}

#[test]
fn test_json_module() {
    let results = outputs(&[
        "import json\ndata = json.loads('{\"b\": [1, 2.5, true, null], \"a\": \"x\"}')",
        "print(data)",
        "print(json.dumps(data, sort_keys=True))",
    ]);
    assert_eq!(results[1], "{'b': [1, 2.5, True, None], 'a': 'x'}\n");
    assert_eq!(results[2], "{\"a\": \"x\", \"b\": [1, 2.5, true, null]}\n");
}

#[test]
fn test_exception_handling_in_session() {
    let results = outputs(&[
        "def parse(text):\n    try:\n        return int(text)\n    except ValueError:\n        return None",
        "print([parse(t) for t in ['1', 'x', '30']])",
        "try:\n    [][0]\nexcept LookupError as e:\n    print('caught:', e)",
    ]);
    assert_eq!(results[1], "[1, None, 30]\n");
    assert_eq!(results[2], "caught: list index out of range\n");
}

#[test]
fn test_deep_but_bounded_recursion() {
    let results = outputs(&[
        "def depth(n):\n    return 0 if n == 0 else 1 + depth(n - 1)",
        "print(depth(150))",
        "print(depth(500))",
        "print('still alive')",
    ]);
    assert_eq!(results[1], "150\n");
    assert_eq!(results[2], "RecursionError: maximum recursion depth exceeded");
    assert_eq!(results[3], "still alive\n");
}

#[test]
fn test_local_shadowing_a_global() {
    let results = outputs(&[
        "count = 10\ndef bump():\n    count = count + 1\n    return count",
        "bump()",
        "def bump():\n    global count\n    count = count + 1\n    return count",
        "print(bump(), count)",
    ]);
    assert_eq!(
        results[1],
        "UnboundLocalError: cannot access local variable 'count' where it is not associated with a value"
    );
    assert_eq!(results[3], "11 11\n");
}

#[test]
fn test_float_formatting_edges() {
    let results = outputs(&[
        "print(round(2.675, 2), round(0.5), round(1.5))",
        "import json\nprint(json.dumps([float('nan'), float('inf'), 1.0]))",
    ]);
    assert_eq!(results[0], "2.67 0 2\n");
    assert_eq!(results[1], "[NaN, Infinity, 1.0]\n");
}
