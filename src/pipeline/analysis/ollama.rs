use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::types::{AnalyzerResponse, GenerativeAnalyzer};
use super::AnalyzerError;
use crate::config::AnalyzerConfig;

/// Generative Analyzer backed by an Ollama instance.
///
/// Text prompts go to `model`, page images to `vision_model`. Whole-document
/// attachments are not supported; callers fall back to the text layer.
pub struct OllamaAnalyzer {
    base_url: String,
    model: String,
    vision_model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Result<Self, AnalyzerError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AnalyzerError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            vision_model: config.vision_model().to_string(),
            client,
            timeout_secs: config.timeout_secs,
        })
    }

    fn generate(
        &self,
        model: &str,
        prompt: &str,
        images: Vec<String>,
    ) -> Result<AnalyzerResponse, AnalyzerError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model,
            prompt,
            images,
            stream: false,
            options: GenerateOptions { temperature: 0.1 },
        };

        tracing::debug!(model, prompt_chars = prompt.len(), "Ollama generate");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    AnalyzerError::Connection(self.base_url.clone())
                } else if e.is_timeout() {
                    AnalyzerError::HttpClient(format!(
                        "Request timed out after {}s",
                        self.timeout_secs
                    ))
                } else {
                    AnalyzerError::HttpClient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AnalyzerError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| AnalyzerError::ResponseParsing(e.to_string()))?;

        if parsed.response.trim().is_empty() {
            return Err(AnalyzerError::EmptyResponse);
        }

        Ok(AnalyzerResponse {
            text: parsed.response,
            input_tokens: parsed.prompt_eval_count.unwrap_or(0),
            output_tokens: parsed.eval_count.unwrap_or(0),
        })
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

impl GenerativeAnalyzer for OllamaAnalyzer {
    fn analyze_document(
        &self,
        _document: &[u8],
        mime_type: &str,
        _prompt: &str,
    ) -> Result<AnalyzerResponse, AnalyzerError> {
        Err(AnalyzerError::Unsupported(format!(
            "document attachment ({mime_type})"
        )))
    }

    fn analyze_text(&self, prompt: &str) -> Result<AnalyzerResponse, AnalyzerError> {
        self.generate(&self.model, prompt, Vec::new())
    }

    fn analyze_image(
        &self,
        image: &[u8],
        _mime_type: &str,
        prompt: &str,
    ) -> Result<AnalyzerResponse, AnalyzerError> {
        self.generate(&self.vision_model, prompt, vec![BASE64.encode(image)])
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

// ──────────────────────────────────────────────
// Mock
// ──────────────────────────────────────────────

/// Scripted analyzer for tests and dry runs.
///
/// Image replies are taken from a queue first, then the fixed image reply.
/// Every call shape counts its invocations.
pub struct MockAnalyzer {
    document_reply: Result<String, String>,
    text_reply: Result<String, String>,
    image_reply: Result<String, String>,
    image_queue: Mutex<VecDeque<Result<String, String>>>,
    delay: Option<Duration>,
    document_calls: AtomicUsize,
    text_calls: AtomicUsize,
    image_calls: AtomicUsize,
}

impl MockAnalyzer {
    /// Every call shape answers with `reply`.
    pub fn new(reply: &str) -> Self {
        Self {
            document_reply: Ok(reply.to_string()),
            text_reply: Ok(reply.to_string()),
            image_reply: Ok(reply.to_string()),
            image_queue: Mutex::new(VecDeque::new()),
            delay: None,
            document_calls: AtomicUsize::new(0),
            text_calls: AtomicUsize::new(0),
            image_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self::new("")
            .with_document_error(reason)
            .with_text_error(reason)
            .with_image_error(reason)
    }

    pub fn with_document_reply(mut self, reply: &str) -> Self {
        self.document_reply = Ok(reply.to_string());
        self
    }

    pub fn with_document_error(mut self, reason: &str) -> Self {
        self.document_reply = Err(reason.to_string());
        self
    }

    pub fn with_text_reply(mut self, reply: &str) -> Self {
        self.text_reply = Ok(reply.to_string());
        self
    }

    pub fn with_text_error(mut self, reason: &str) -> Self {
        self.text_reply = Err(reason.to_string());
        self
    }

    pub fn with_image_reply(mut self, reply: &str) -> Self {
        self.image_reply = Ok(reply.to_string());
        self
    }

    pub fn with_image_error(mut self, reason: &str) -> Self {
        self.image_reply = Err(reason.to_string());
        self
    }

    /// Queue per-call image replies; `Err` entries fail that call.
    pub fn with_image_sequence(self, replies: Vec<Result<&str, &str>>) -> Self {
        if let Ok(mut queue) = self.image_queue.lock() {
            queue.extend(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string)),
            );
        }
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn document_calls(&self) -> usize {
        self.document_calls.load(Ordering::SeqCst)
    }

    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }

    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }

    fn respond(&self, reply: Result<String, String>) -> Result<AnalyzerResponse, AnalyzerError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        reply
            .map(AnalyzerResponse::text)
            .map_err(AnalyzerError::Other)
    }
}

impl GenerativeAnalyzer for MockAnalyzer {
    fn analyze_document(
        &self,
        _document: &[u8],
        _mime_type: &str,
        _prompt: &str,
    ) -> Result<AnalyzerResponse, AnalyzerError> {
        self.document_calls.fetch_add(1, Ordering::SeqCst);
        self.respond(self.document_reply.clone())
    }

    fn analyze_text(&self, _prompt: &str) -> Result<AnalyzerResponse, AnalyzerError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        self.respond(self.text_reply.clone())
    }

    fn analyze_image(
        &self,
        _image: &[u8],
        _mime_type: &str,
        _prompt: &str,
    ) -> Result<AnalyzerResponse, AnalyzerError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        let queued = self
            .image_queue
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front());
        self.respond(queued.unwrap_or_else(|| self.image_reply.clone()))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
