#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keymint_core::CredentialIssuer;
use keymint_pki::{IssuedCredential, PkiError};

/// Deterministic issuer for engine tests: no cryptography, a configurable
/// per-call delay (blocking, like the real generation), per-subject call
/// counts, and injectable failures. Clone the handle to keep inspecting it
/// after the service takes ownership.
#[derive(Clone)]
pub struct StubIssuer {
    inner: Arc<StubState>,
}

struct StubState {
    delay: Duration,
    calls: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, usize>>,
}

impl StubIssuer {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: Arc::new(StubState {
                delay,
                calls: Mutex::new(HashMap::new()),
                failures: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Make the next `times` issuances for `subject` fail.
    pub fn fail_next(&self, subject: &str, times: usize) {
        self.inner
            .failures
            .lock()
            .expect("failures lock")
            .insert(subject.to_string(), times);
    }

    pub fn calls_for(&self, subject: &str) -> usize {
        self.inner
            .calls
            .lock()
            .expect("calls lock")
            .get(subject)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.inner.calls.lock().expect("calls lock").values().sum()
    }
}

impl CredentialIssuer for StubIssuer {
    fn issue(&self, subject: &str) -> Result<IssuedCredential, PkiError> {
        let call_index = {
            let mut calls = self.inner.calls.lock().expect("calls lock");
            let count = calls.entry(subject.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if !self.inner.delay.is_zero() {
            std::thread::sleep(self.inner.delay);
        }

        {
            let mut failures = self.inner.failures.lock().expect("failures lock");
            if let Some(remaining) = failures.get_mut(subject) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(PkiError::Signing(format!(
                        "injected failure for {subject}"
                    )));
                }
            }
        }

        Ok(IssuedCredential::new(
            format!("{subject}-priv-{call_index}").into_bytes(),
            format!("{subject}-pub-{call_index}").into_bytes(),
            format!("{subject}-cert-{call_index}").into_bytes(),
        ))
    }
}
