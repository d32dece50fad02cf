use std::{future::Future, time::Duration};

use log::*;
use serde_json::Value;

/// True if every key in `part` is present in `complete` with a matching value. Objects are compared recursively,
/// arrays element by element, and a `null` in `part` matches anything.
pub fn value_is_subset_of(part: &Value, complete: &Value) -> bool {
    match (part, complete) {
        (Value::Null, _) => true,
        (Value::Object(expected), _) => expected.iter().all(|(key, value)| match complete.get(key) {
            Some(actual) => {
                let ok = value_is_subset_of(value, actual);
                if !ok {
                    debug!("Mismatch at {key}: expected {value}, got {actual}");
                }
                ok
            },
            None => {
                debug!("Key not found: {key}");
                false
            },
        }),
        (Value::Array(expected), Value::Array(actual)) => {
            expected.len() == actual.len() && expected.iter().zip(actual).all(|(p, c)| value_is_subset_of(p, c))
        },
        (Value::Array(_), _) => false,
        _ => part == complete,
    }
}

pub fn json_is_subset_of(part: &str, complete: &Value) -> bool {
    match serde_json::from_str::<Value>(part) {
        Ok(part) => value_is_subset_of(&part, complete),
        Err(e) => {
            error!("Expected value is not valid JSON. {e}");
            false
        },
    }
}

/// Poll `check` every 10ms until it returns true or `timeout` expires.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
