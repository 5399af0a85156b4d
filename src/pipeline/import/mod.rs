pub mod format;
pub mod archive;

pub use format::*;
pub use archive::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported document kind: {0}")]
    UnsupportedFormat(String),

    #[error("Archive could not be read: {0}")]
    Archive(String),

    #[error("Archive entry {name} exceeds {max_mb}MB limit")]
    EntryTooLarge { name: String, max_mb: u64 },

    #[error("Archive contains no supported documents")]
    EmptyArchive,
}
