use std::path::PathBuf;

use thiserror::Error;

/// Why a rule file failed to load. One file failing never prevents other
/// files from loading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The file or directory could not be read.
    #[error("io error: {0}")]
    Io(String),

    /// The file is not a valid JSON rule object.
    #[error("parse error: {0}")]
    Parse(String),

    /// A `${NAME}` placeholder referenced an unset environment variable.
    #[error("environment variable '{0}' is not set")]
    MissingEnv(String),

    /// The rule violates the schema.
    #[error("validation error: {0}")]
    Validation(String),

    /// Another file in the same load already claimed this rule name.
    #[error("duplicate rule name '{0}'")]
    DuplicateName(String),
}

/// A per-file load failure, attributed to its source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileError {
    pub file: PathBuf,
    pub error: LoadError,
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.file.display(), self.error)
    }
}
