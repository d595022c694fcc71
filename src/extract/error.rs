use thiserror::Error;

/// Faults raised inside a single extractor. They never leave the extractor:
/// each one is rendered as `"<Format> extraction failed: <message>"`.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("{0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Xml(#[from] quick_xml::Error),

    #[cfg(feature = "pdf")]
    #[error("{0}")]
    Pdf(#[from] lopdf::Error),

    #[cfg(feature = "xlsx")]
    #[error("{0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("{0}")]
    Malformed(String),

    #[error("decoder panicked: {0}")]
    Panicked(String),
}

impl ExtractError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Converts the payload of a caught panic into an error.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self::Panicked(message)
    }
}

pub type ExtractResult<T> = Result<T, ExtractError>;
