use thiserror::Error;

/// Error kinds produced anywhere in the fingerprinting pipeline.
///
/// Soft failures (a single matcher's regex, a single technology's pattern)
/// are never represented as `FingerprintError` — they collapse to `Ok(false)`
/// or `None` at the call site so one bad pattern can't abort a whole scan.
/// This enum exists for failures that abort at least one whole URL.
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("network failure fetching {url}: {source}")]
    NetworkFailure {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("scrape failure for {url}: {reason}")]
    ScrapeFailure { url: String, reason: String },

    #[error("compilation failure in {context}: {reason}")]
    CompilationFailure { context: String, reason: String },

    #[error("match failure: {0}")]
    MatchFailure(String),

    #[error("work cancelled")]
    Cancelled,
}

impl FingerprintError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        FingerprintError::InvalidInput(msg.into())
    }

    pub fn scrape_failure(url: impl Into<String>, reason: impl Into<String>) -> Self {
        FingerprintError::ScrapeFailure {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn compilation_failure(context: impl Into<String>, reason: impl Into<String>) -> Self {
        FingerprintError::CompilationFailure {
            context: context.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FingerprintError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_carry_context() {
        let e = FingerprintError::scrape_failure("https://example.com", "navigation timeout");
        assert!(e.to_string().contains("https://example.com"));
        assert!(e.to_string().contains("navigation timeout"));
    }
}
