//! Deterministic in-process adapter for tests and demos.

use super::{AdapterError, ServiceAdapter};
use crate::models::credential::SecretHandle;
use crate::models::provider::Capability;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;

/// Scripted adapter: plays back a queue of canned results, then falls back
/// to a default response (or a permanent error). Counts calls so tests can
/// assert on retry and failover behavior.
pub struct FakeAdapter {
    script: Mutex<VecDeque<Result<Value, AdapterError>>>,
    default_response: Value,
    permanent_error: Option<AdapterError>,
    delay: Option<Duration>,
    calls: Mutex<u32>,
}

impl FakeAdapter {
    /// Adapter that always succeeds with `response`.
    pub fn succeeding(response: Value) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_response: response,
            permanent_error: None,
            delay: None,
            calls: Mutex::new(0),
        }
    }

    /// Adapter that plays back `results` in order, then succeeds with a
    /// canned default.
    pub fn scripted(results: impl IntoIterator<Item = Result<Value, AdapterError>>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            default_response: json!({"ok": true}),
            permanent_error: None,
            delay: None,
            calls: Mutex::new(0),
        }
    }

    /// Adapter that fails `failures` times with `error`, then succeeds.
    pub fn flaky(failures: usize, error: AdapterError) -> Self {
        Self::scripted((0..failures).map(|_| Err(error.clone())))
    }

    /// Adapter that always fails with `error`.
    pub fn failing(error: AdapterError) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_response: Value::Null,
            permanent_error: Some(error),
            delay: None,
            calls: Mutex::new(0),
        }
    }

    /// Artificial latency before every answer, for timeout tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock()
    }
}

#[async_trait]
impl ServiceAdapter for FakeAdapter {
    async fn call(
        &self,
        _capability: Capability,
        _payload: &Value,
        _secret: &SecretHandle,
    ) -> Result<Value, AdapterError> {
        *self.calls.lock() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(result) = self.script.lock().pop_front() {
            return result;
        }
        match &self.permanent_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.default_response.clone()),
        }
    }
}
