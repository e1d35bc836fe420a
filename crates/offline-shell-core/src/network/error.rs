use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Maximum length for error details carried in a `FetchError`
const MAX_ERROR_DETAIL_LENGTH: usize = 500;

impl FetchError {
    /// Truncate error detail to avoid logging excessive data
    fn truncate_detail(detail: &str) -> String {
        if detail.len() <= MAX_ERROR_DETAIL_LENGTH {
            detail.to_string()
        } else {
            let mut end = MAX_ERROR_DETAIL_LENGTH;
            while !detail.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &detail[..end], detail.len())
        }
    }

    pub fn network(detail: impl AsRef<str>) -> Self {
        FetchError::Network(Self::truncate_detail(detail.as_ref()))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            FetchError::InvalidRequest(Self::truncate_detail(&e.to_string()))
        } else {
            FetchError::network(e.to_string())
        }
    }
}
