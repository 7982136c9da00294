pub mod ollama;
pub mod openai;

use crate::config::{Config, ProviderKind};
use crate::parser::Chunk;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are a SAS clinical programming expert. \
Explain what the given SAS code does so that it can be found by someone describing the task in plain language. \
Mention datasets read and written, key derivations and macro parameters. Answer in one or two short paragraphs.";

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// What the explainer sees for one chunk
#[derive(Debug, Clone)]
pub struct ExplainRequest<'a> {
    pub chunk: &'a Chunk,
    /// Leading part of the file the chunk came from
    pub file_context: &'a str,
}

impl ExplainRequest<'_> {
    pub fn prompt(&self) -> String {
        let chunk = self.chunk;
        let mut prompt = format!(
            "File: {} (lines {}-{})\nBlock: {} {}\n",
            chunk.filename,
            chunk.line_start,
            chunk.line_end,
            chunk.kind,
            chunk.name.as_deref().unwrap_or("(anonymous)")
        );
        if chunk.incomplete {
            prompt.push_str("Note: this block is not closed before the end of the file.\n");
        }
        if !chunk.comments.is_empty() {
            prompt.push_str("\nAuthor comments:\n");
            for comment in &chunk.comments {
                prompt.push_str("- ");
                prompt.push_str(comment);
                prompt.push('\n');
            }
        }
        if !self.file_context.is_empty() {
            prompt.push_str("\nFile context:\n```sas\n");
            prompt.push_str(self.file_context);
            prompt.push_str("\n```\n");
        }
        prompt.push_str("\nCode to explain:\n```sas\n");
        prompt.push_str(&chunk.code);
        prompt.push_str("\n```\n");
        prompt
    }
}

/// Produces a natural-language explanation for a chunk
#[async_trait::async_trait]
pub trait ExplanationProvider: Send + Sync {
    async fn explain(&self, request: &ExplainRequest<'_>) -> Result<String>;
}

/// Retry `provider` with exponential backoff; returns the last error if every attempt fails.
pub async fn explain_with_retry(
    provider: &dyn ExplanationProvider,
    request: &ExplainRequest<'_>,
    max_attempts: u32,
) -> Result<String> {
    let mut delay = RETRY_BASE_DELAY;
    let mut attempt = 1;
    loop {
        match provider.explain(request).await {
            Ok(text) if !text.trim().is_empty() => return Ok(text.trim().to_string()),
            Ok(_) if attempt >= max_attempts => anyhow::bail!("Explanation was empty"),
            Err(e) if attempt >= max_attempts => {
                return Err(e.context(format!("Explanation failed after {} attempts", attempt)))
            }
            Ok(_) => tracing::debug!("Empty explanation, retrying (attempt {})", attempt),
            Err(e) => tracing::debug!("Explanation attempt {} failed: {}", attempt, e),
        }
        tokio::time::sleep(delay).await;
        delay *= 2;
        attempt += 1;
    }
}

/// Build the explanation provider selected by configuration
pub fn from_config(config: &Config) -> Result<Arc<dyn ExplanationProvider>> {
    Ok(match config.explain_provider {
        ProviderKind::Ollama => Arc::new(ollama::OllamaExplainer::new(
            &config.ollama_host,
            &config.explain_model,
        )),
        provider => {
            let endpoint = config
                .endpoint_for(provider)
                .context("Explanation provider has no endpoint configured")?
                .clone();
            Arc::new(openai::OpenAIExplainer::new(endpoint, &config.explain_model))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ChunkKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ExplanationProvider for Flaky {
        async fn explain(&self, _request: &ExplainRequest<'_>) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                anyhow::bail!("timeout on call {}", call);
            }
            Ok("  Derives study day.  ".to_string())
        }
    }

    fn chunk() -> Chunk {
        Chunk {
            kind: ChunkKind::DataStep,
            name: Some("dm".to_string()),
            code: "data dm;\n  set raw.dm;\nrun;".to_string(),
            comments: vec!["builds DM domain".to_string()],
            filename: "dm.sas".to_string(),
            filepath: "/study/dm.sas".to_string(),
            line_start: 2,
            line_end: 4,
            incomplete: false,
        }
    }

    #[test]
    fn test_prompt_contains_chunk_details() {
        let chunk = chunk();
        let prompt = ExplainRequest {
            chunk: &chunk,
            file_context: "libname raw 'x';",
        }
        .prompt();
        assert!(prompt.contains("dm.sas (lines 2-4)"));
        assert!(prompt.contains("data_step dm"));
        assert!(prompt.contains("- builds DM domain"));
        assert!(prompt.contains("libname raw 'x';"));
        assert!(prompt.ends_with("run;\n```\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers() {
        let provider = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let chunk = chunk();
        let request = ExplainRequest {
            chunk: &chunk,
            file_context: "",
        };
        let text = explain_with_retry(&provider, &request, 3).await.unwrap();
        assert_eq!(text, "Derives study day.");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up() {
        let provider = Flaky {
            failures: 5,
            calls: AtomicU32::new(0),
        };
        let chunk = chunk();
        let request = ExplainRequest {
            chunk: &chunk,
            file_context: "",
        };
        let err = explain_with_retry(&provider, &request, 2).await.unwrap_err();
        assert!(err.to_string().contains("after 2 attempts"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
