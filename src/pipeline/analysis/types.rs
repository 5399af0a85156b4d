use serde::Serialize;

use super::AnalyzerError;

/// Free-text reply of one Generative Analyzer call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalyzerResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl AnalyzerResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Generative Analyzer abstraction with its three call shapes.
///
/// Implementations must be shareable across threads: calls run on worker
/// threads under a deadline.
pub trait GenerativeAnalyzer: Send + Sync {
    /// Whole document sent as an attachment.
    fn analyze_document(
        &self,
        document: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<AnalyzerResponse, AnalyzerError>;

    /// Prompt-only call.
    fn analyze_text(&self, prompt: &str) -> Result<AnalyzerResponse, AnalyzerError>;

    /// Single image plus prompt.
    fn analyze_image(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<AnalyzerResponse, AnalyzerError>;

    /// Identifier used in logs and call counters.
    fn name(&self) -> &str;
}
