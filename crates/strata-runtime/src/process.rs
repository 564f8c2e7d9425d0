#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{program} not found — is it installed and on PATH?")]
    NotFound {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} {args:?} failed ({status})\n{stderr}")]
    CommandFailed {
        program: String,
        args: Vec<String>,
        status: String,
        stderr: String,
    },

    #[error("{program} output was not valid UTF-8")]
    InvalidUtf8 {
        program: String,
        source: std::string::FromUtf8Error,
    },
}

impl ProcessError {
    /// Captured stderr of a failed command, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            ProcessError::CommandFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}
