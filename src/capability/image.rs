use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors an `ImageGeneration` provider can return. All three are
/// retryable up to Stage F's per-image budget (SPEC_FULL.md §4.2 F, §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("image provider request timed out")]
    Timeout,
    #[error("image provider is rate-limiting requests")]
    RateLimit,
    #[error("image provider error: {0}")]
    Other(String),
}

#[async_trait]
pub trait ImageGeneration: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        negative_prompt: &str,
        style_token: &str,
        deadline: Duration,
    ) -> Result<Vec<u8>, ImageError>;
}

pub mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Per-prompt scripted results, consumed in order; tracks the high-water
    /// mark of concurrently in-flight calls so tests can assert the
    /// semaphore actually bounds concurrency (SPEC_FULL.md §8 boundary
    /// behaviors).
    pub struct ScriptedImageGenerator {
        scripts: Mutex<HashMap<String, Vec<Result<Vec<u8>, ImageError>>>>,
        in_flight: std::sync::atomic::AtomicUsize,
        pub max_observed_in_flight: std::sync::atomic::AtomicUsize,
        pub call_delay: Duration,
    }

    impl ScriptedImageGenerator {
        pub fn new() -> Self {
            Self {
                scripts: Mutex::new(HashMap::new()),
                in_flight: std::sync::atomic::AtomicUsize::new(0),
                max_observed_in_flight: std::sync::atomic::AtomicUsize::new(0),
                call_delay: Duration::from_millis(0),
            }
        }

        pub fn script(&self, prompt: impl Into<String>, results: Vec<Result<Vec<u8>, ImageError>>) {
            self.scripts.lock().insert(prompt.into(), results);
        }
    }

    impl Default for ScriptedImageGenerator {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ImageGeneration for ScriptedImageGenerator {
        async fn generate(
            &self,
            prompt: &str,
            _negative_prompt: &str,
            _style_token: &str,
            _deadline: Duration,
        ) -> Result<Vec<u8>, ImageError> {
            use std::sync::atomic::Ordering;

            let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

            if !self.call_delay.is_zero() {
                tokio::time::sleep(self.call_delay).await;
            }

            let result = {
                let mut scripts = self.scripts.lock();
                match scripts.get_mut(prompt) {
                    Some(results) if !results.is_empty() => {
                        if results.len() > 1 {
                            results.remove(0)
                        } else {
                            results[0].clone()
                        }
                    }
                    _ => Ok(format!("fake-bytes-for-{prompt}").into_bytes()),
                }
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }
}
