use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors an `LlmCompletion` provider can return. The Stage Runner's
/// classifier maps these onto `JobErrorCode::LlmTimeout` /
/// `JobErrorCode::LlmJsonInvalid`; `Other` is folded into whichever of the
/// two the calling stage is already retrying under (§6, §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("llm request timed out")]
    Timeout,
    #[error("llm response was not valid structured output: {0}")]
    InvalidJson(String),
    #[error("llm provider error: {0}")]
    Other(String),
}

/// A structured-completion provider. The prompt and schema are opaque to
/// the Orchestrator; only the classifier above interprets provider errors.
#[async_trait]
pub trait LlmCompletion: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        deadline: Duration,
    ) -> Result<serde_json::Value, LlmError>;
}

pub mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Scripted responses, one `pop_front` per call; after the queue is
    /// drained every further call returns the last scripted error (or an
    /// `Other` error if the queue was never seeded).
    pub struct ScriptedLlm {
        responses: Mutex<VecDeque<Result<serde_json::Value, LlmError>>>,
        pub call_count: Mutex<u32>,
    }

    impl ScriptedLlm {
        pub fn new(responses: Vec<Result<serde_json::Value, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                call_count: Mutex::new(0),
            }
        }

        pub fn succeeding_with(value: serde_json::Value) -> Self {
            Self::new(vec![Ok(value)])
        }
    }

    #[async_trait]
    impl LlmCompletion for ScriptedLlm {
        async fn complete(
            &self,
            _prompt: &str,
            _schema: &serde_json::Value,
            _deadline: Duration,
        ) -> Result<serde_json::Value, LlmError> {
            *self.call_count.lock() += 1;
            let mut responses = self.responses.lock();
            if responses.len() > 1 {
                responses.pop_front().unwrap()
            } else {
                responses
                    .front()
                    .cloned()
                    .unwrap_or_else(|| Err(LlmError::Other("no scripted response".into())))
            }
        }
    }
}
