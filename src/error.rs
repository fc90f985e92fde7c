use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Network or HTTP failure while fetching a feed page, manifest or image
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Response body could not be parsed
    #[error("failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        Error::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(url: impl Into<String>, reason: impl ToString) -> Self {
        Error::Decode {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}
