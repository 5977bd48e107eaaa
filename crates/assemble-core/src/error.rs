use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssembleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(String),

    /// The book is finalized, or a prerequisite step has not happened.
    #[error("invalid state: {0}")]
    State(String),

    /// Id, href or file name already in use.
    #[error("duplicate entry: {0}")]
    Duplicate(String),

    #[error("resource not found: {locator}")]
    ResourceNotFound { locator: String, external: bool },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("image processing error: {0}")]
    Image(String),
}

/// Coarse classification callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    State,
    Uniqueness,
    ResourceNotFound,
    Validation,
    /// Failures of collaborators (I/O, parsing, image codecs).
    Collaborator,
}

impl AssembleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AssembleError::State(_) => ErrorKind::State,
            AssembleError::Duplicate(_) => ErrorKind::Uniqueness,
            AssembleError::ResourceNotFound { .. } => ErrorKind::ResourceNotFound,
            AssembleError::Validation(_) => ErrorKind::Validation,
            _ => ErrorKind::Collaborator,
        }
    }

    pub fn finalized() -> Self {
        AssembleError::State("book is already finalized".to_string())
    }
}

pub type Result<T> = std::result::Result<T, AssembleError>;
