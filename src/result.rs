//! Error types and the related `Result<T>`

use thiserror::Error;

pub type BundleResult<T> = Result<T, BundleError>;

/// Everything that can go wrong while reading, writing, or importing a bundle.
///
/// Every variant is terminal: nothing in this crate retries.
#[derive(Debug, Error)]
pub enum BundleError {
    /// The bytes aren't a ZIP archive we can make sense of
    /// (no End of central directory record, etc.)
    #[error("Invalid archive: {0}")]
    InvalidFormat(&'static str),

    /// Neither `SKILL.md` nor `<folder>/SKILL.md` was found in the archive.
    #[error("Archive has no SKILL.md")]
    MissingManifest,

    /// The input (or something inside it) was over the configured limit.
    /// Carries the offending size in bytes.
    #[error("Too large: {0} bytes")]
    TooLarge(u64),

    /// An entry matched the forbidden-path policy or tried to escape the bundle.
    #[error("Forbidden file in archive: {0}")]
    ForbiddenFile(String),

    /// The archive's directory looked fine, but its contents couldn't be pulled out.
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// The manifest was found but couldn't be decoded into text.
    #[error("Couldn't read SKILL.md frontmatter")]
    FrontmatterParseError,

    /// An error from underlying I/O (only when packaging a folder)
    #[error("I/O Error")]
    Io(#[from] std::io::Error),
}
