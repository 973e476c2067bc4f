use super::*;
use std::cell::Cell;

fn quick_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(1))
}

#[test]
fn succeeds_on_first_attempt() {
    let calls = Cell::new(0);
    let result: Result<u32, Exhausted<String>> = quick_policy(3).run(
        |_| {
            calls.set(calls.get() + 1);
            Ok(7)
        },
        |_| true,
    );

    assert_eq!(result.expect("should succeed"), 7);
    assert_eq!(calls.get(), 1);
}

#[test]
fn retries_until_success() {
    let result: Result<u32, Exhausted<String>> = quick_policy(3).run(
        |attempt| {
            if attempt < 3 {
                Err(format!("transient failure {attempt}"))
            } else {
                Ok(attempt)
            }
        },
        |_| true,
    );

    assert_eq!(result.expect("third attempt should succeed"), 3);
}

#[test]
fn exhausts_after_max_attempts() {
    let calls = Cell::new(0);
    let result: Result<(), Exhausted<String>> = quick_policy(3).run(
        |attempt| {
            calls.set(calls.get() + 1);
            Err(format!("failure {attempt}"))
        },
        |_| true,
    );

    let exhausted = result.expect_err("should exhaust");
    assert_eq!(exhausted.attempts, 3);
    assert_eq!(exhausted.last_error, "failure 3");
    assert_eq!(calls.get(), 3);
}

#[test]
fn stops_on_non_retryable_error() {
    let calls = Cell::new(0);
    let result: Result<(), Exhausted<String>> = quick_policy(5).run(
        |_| {
            calls.set(calls.get() + 1);
            Err("bad request".to_string())
        },
        |err| !err.contains("bad request"),
    );

    let exhausted = result.expect_err("should stop immediately");
    assert_eq!(exhausted.attempts, 1);
    assert_eq!(calls.get(), 1);
}

#[test]
fn zero_attempts_is_clamped_to_one() {
    let policy = RetryPolicy::new(0, Duration::ZERO);
    assert_eq!(policy.max_attempts, 1);

    let calls = Cell::new(0);
    let _: Result<(), Exhausted<String>> = policy.run(
        |_| {
            calls.set(calls.get() + 1);
            Err("nope".to_string())
        },
        |_| true,
    );
    assert_eq!(calls.get(), 1);
}

#[test]
fn exhausted_display_mentions_attempts() {
    let exhausted = Exhausted {
        attempts: 2,
        last_error: "connection refused".to_string(),
    };
    assert_eq!(
        exhausted.to_string(),
        "gave up after 2 attempt(s): connection refused"
    );
}
