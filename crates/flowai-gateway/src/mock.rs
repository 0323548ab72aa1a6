use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use flowai_core::{GenerateOptions, Generation, ProviderError, ProviderKind, TextProvider, TokenUsage};

/// Pre-programmed responses for deterministic testing without vendor calls.
pub enum ScriptedResponse {
    Text(Generation),
    Error(ProviderError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<ScriptedResponse>),
}

impl ScriptedResponse {
    pub fn text(text: &str, prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self::Text(Generation {
            text: text.to_string(),
            usage: TokenUsage::new(prompt_tokens, completion_tokens),
        })
    }

    pub fn delayed(delay: Duration, inner: ScriptedResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Provider that answers with queued responses in order and records the
/// prompts it was given.
pub struct ScriptedProvider {
    kind: ProviderKind,
    responses: Mutex<VecDeque<ScriptedResponse>>,
    prompts: Mutex<Vec<String>>,
    call_count: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderKind, responses: Vec<ScriptedResponse>) -> Self {
        Self {
            kind,
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl TextProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<Generation, ProviderError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.prompts.lock().push(prompt.to_string());

        let next = self.responses.lock().pop_front();
        let Some(mut current) = next else {
            return Err(ProviderError::InvalidRequest(format!(
                "scripted provider: no response configured for call {idx}"
            )));
        };

        // Unrolled iteratively to avoid recursive async.
        loop {
            match current {
                ScriptedResponse::Text(generation) => return Ok(generation),
                ScriptedResponse::Error(e) => return Err(e),
                ScriptedResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn responses_come_in_order() {
        let provider = ScriptedProvider::new(
            ProviderKind::Grok,
            vec![
                ScriptedResponse::text("first", 3, 1),
                ScriptedResponse::text("second", 4, 2),
            ],
        );
        let options = GenerateOptions::default();

        let one = provider.generate("a", &options).await.unwrap();
        let two = provider.generate("b", &options).await.unwrap();
        assert_eq!(one.text, "first");
        assert_eq!(two.usage.total_tokens, 6);
        assert_eq!(provider.call_count(), 2);
        assert_eq!(provider.prompts(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn error_response() {
        let provider = ScriptedProvider::new(
            ProviderKind::Claude,
            vec![ScriptedResponse::Error(ProviderError::RateLimited { retry_after: None })],
        );
        let err = provider.generate("x", &GenerateOptions::default()).await.unwrap_err();
        assert_eq!(err.error_kind(), "rate_limited");
    }

    #[tokio::test]
    async fn exhausted_script_is_an_error() {
        let provider = ScriptedProvider::new(ProviderKind::Grok, vec![]);
        let err = provider.generate("x", &GenerateOptions::default()).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn delayed_response_waits() {
        let provider = ScriptedProvider::new(
            ProviderKind::Grok,
            vec![ScriptedResponse::delayed(
                Duration::from_millis(20),
                ScriptedResponse::text("late", 1, 1),
            )],
        );
        let started = std::time::Instant::now();
        let generation = provider.generate("x", &GenerateOptions::default()).await.unwrap();
        assert_eq!(generation.text, "late");
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
