use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure the loading core can report. All of them are terminal for
/// the request in progress and are surfaced to the caller unchanged.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("class not found: {0}")]
    ClassNotFound(String),
    #[error("no class definition found for {0}")]
    NoClassDefFound(String),
    #[error("class format error in {class}: {message}")]
    ClassFormat { class: String, message: String },
    #[error("illegal class name: {0}")]
    IllegalName(String),
    #[error("no such method {class}.{name}{signature}")]
    NoSuchMethod {
        class: String,
        name: String,
        signature: String,
    },
    #[error("no such field {class}.{name} ({descriptor})")]
    NoSuchField {
        class: String,
        name: String,
        descriptor: String,
    },
    #[error("incompatible use: {0}")]
    IncompatibleUse(String),
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("class circularity: {0}")]
    ClassCircularity(String),
    #[error("unsatisfied link: {0}")]
    UnsatisfiedLink(String),
    #[error("initialization of {0} failed previously")]
    InitializationFailed(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn class_format(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ClassFormat {
            class: class.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this is one of the two "could not find bytes for a name" kinds.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ClassNotFound(_) | Self::NoClassDefFound(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Io(e.to_string())
    }
}
