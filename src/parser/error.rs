use thiserror::Error;

pub type Result<T> = std::result::Result<T, ParseError>;

#[derive(Error, Debug)]
pub enum ParseError {
    /// The file could not be read or decoded as text. Fatal for that file only.
    #[error("Unreadable source {path}: {reason}")]
    UnreadableSource { path: String, reason: String },
}

impl ParseError {
    pub fn unreadable(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        ParseError::UnreadableSource {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
