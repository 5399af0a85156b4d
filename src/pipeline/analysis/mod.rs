pub mod types;
pub mod structured;
pub mod prompt;
pub mod parser;
pub mod ollama;

pub use types::*;
pub use structured::*;
pub use prompt::*;
pub use parser::*;
pub use ollama::*;

use thiserror::Error;

use crate::pipeline::cancel::Interrupted;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Analyzer is not reachable at {0}")]
    Connection(String),

    #[error("Analyzer returned error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Call shape not supported by this analyzer: {0}")]
    Unsupported(String),

    #[error("Analyzer returned an empty response")]
    EmptyResponse,

    #[error("Call interrupted: {0}")]
    Interrupted(#[from] Interrupted),

    #[error("Analyzer failure: {0}")]
    Other(String),
}
