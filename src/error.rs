use thiserror::Error;

/// The builder's error taxonomy (§7). Display text is part of the observable
/// contract: callers and tests match on substrings, so wording changes here
/// are breaking changes.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    StripPrefix(#[from] std::path::StripPrefixError),

    #[error("{0}")]
    InputError(String),

    #[error("Forbidden path outside the build context: {0}")]
    ForbiddenPath(String),

    #[error("stat {0}: no such file or directory")]
    NotFound(String),

    #[error("invalid shell substitution: {0}")]
    BadShellSubstitution(String),

    #[error("One or more build-args were not consumed: {0}")]
    UnconsumedBuildArg(String),

    #[error("The command '{cmd}' returned a non-zero code: {code}")]
    ExecFailure { cmd: String, code: i64 },

    #[error("task failed: {0}")]
    TaskFailure(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

pub type Result<T> = std::result::Result<T, Error>;
