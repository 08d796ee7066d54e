use crate::error::GenerationError;
use crate::models::{ChatRole, ChatTurn, RetrievedChunk};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

#[async_trait]
pub trait TextGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Completion client for an Ollama server's `/api/generate` endpoint.
/// Every call carries the configured timeout so a hung model cannot stall
/// a request forever.
pub struct OllamaGenerator {
    endpoint: Url,
    model: String,
    client: Client,
    timeout_secs: u64,
}

impl OllamaGenerator {
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, GenerationError> {
        let endpoint = Url::parse(endpoint)
            .and_then(|base| base.join("api/generate"))
            .map_err(|error| GenerationError::BackendResponse {
                backend: "ollama".to_string(),
                details: format!("invalid endpoint: {error}"),
            })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(GenerationError::Http)?;

        Ok(Self {
            endpoint,
            model: model.into(),
            client,
            timeout_secs,
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    GenerationError::Timeout(self.timeout_secs)
                } else {
                    GenerationError::Http(error)
                }
            })?;

        if !response.status().is_success() {
            return Err(GenerationError::BackendResponse {
                backend: "ollama".to_string(),
                details: response.status().to_string(),
            });
        }

        let payload: GenerateResponse = response.json().await.map_err(GenerationError::Http)?;
        let answer = payload.response.trim().to_string();
        if answer.is_empty() {
            return Err(GenerationError::EmptyAnswer);
        }

        Ok(answer)
    }
}

/// How many prior turns the prompt carries. Older turns fall off so the
/// prompt stays inside the model context window.
pub const HISTORY_WINDOW_TURNS: usize = 12;

pub fn render_history(turns: &[ChatTurn]) -> String {
    let start = turns.len().saturating_sub(HISTORY_WINDOW_TURNS);
    turns[start..]
        .iter()
        .map(|turn| match turn.role {
            ChatRole::User => format!("User: {}", turn.text),
            ChatRole::Assistant => format!("Assistant: {}", turn.text),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_direct_prompt(history: &[ChatTurn], question: &str) -> String {
    let rendered = render_history(history);
    if rendered.is_empty() {
        format!("User: {question}\nAssistant:")
    } else {
        format!("{rendered}\nUser: {question}\nAssistant:")
    }
}

pub fn build_grounded_prompt(
    history: &[ChatTurn],
    context: &[RetrievedChunk],
    question: &str,
) -> String {
    let mut sections = Vec::new();
    sections.push(
        "Answer the question using the context extracted from the uploaded documents. \
         If the context does not contain the answer, say so."
            .to_string(),
    );

    for (index, chunk) in context.iter().enumerate() {
        sections.push(format!(
            "[Context {} | {} p.{}]\n{}",
            index + 1,
            chunk.source,
            chunk.page,
            chunk.text
        ));
    }

    let rendered = render_history(history);
    if !rendered.is_empty() {
        sections.push(rendered);
    }

    sections.push(format!("User: {question}\nAssistant:"));
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source: &str, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: "id".to_string(),
            source: source.to_string(),
            page: 2,
            text: text.to_string(),
            score: 0.9,
        }
    }

    #[test]
    fn direct_prompt_without_history_is_a_bare_turn() {
        let prompt = build_direct_prompt(&[], "hello");
        assert_eq!(prompt, "User: hello\nAssistant:");
    }

    #[test]
    fn direct_prompt_carries_prior_turns_in_order() {
        let history = vec![ChatTurn::user("hi"), ChatTurn::assistant("hello")];
        let prompt = build_direct_prompt(&history, "how are you?");
        assert!(prompt.starts_with("User: hi\nAssistant: hello\n"));
        assert!(prompt.ends_with("User: how are you?\nAssistant:"));
    }

    #[test]
    fn history_window_drops_oldest_turns() {
        let turns: Vec<_> = (0..HISTORY_WINDOW_TURNS + 4)
            .map(|index| ChatTurn::user(format!("turn {index}")))
            .collect();
        let rendered = render_history(&turns);
        assert!(!rendered.contains("turn 0"));
        assert!(rendered.contains(&format!("turn {}", HISTORY_WINDOW_TURNS + 3)));
    }

    #[test]
    fn grounded_prompt_cites_source_and_page() {
        let prompt = build_grounded_prompt(
            &[],
            &[chunk("manual.pdf", "torque spec is 12 Nm")],
            "what is the torque spec?",
        );
        assert!(prompt.contains("[Context 1 | manual.pdf p.2]"));
        assert!(prompt.contains("torque spec is 12 Nm"));
        assert!(prompt.ends_with("User: what is the torque spec?\nAssistant:"));
    }
}
