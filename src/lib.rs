//! Tender document analysis: format detection, ordered extraction
//! strategies, dual-source merge with conflict preservation, completeness
//! scoring and invariant checks.

pub mod config;
pub mod pipeline;

pub use pipeline::cancel::CancelToken;
pub use pipeline::output::FinalOutput;
pub use pipeline::processor::{build_processor, DocumentProcessor, ProcessingError};

use tracing_subscriber::EnvFilter;

/// Install the global subscriber on stderr. `RUST_LOG` wins over the
/// built-in filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
