//! Error types shared by every stage of a variant calling run.

use thiserror::Error;

/// Main error type for varcall operations.
#[derive(Error, Debug)]
pub enum VarcallError {
    /// I/O errors (missing files, permission problems, failed writes)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration or input metadata is inconsistent.
    /// Always raised before any calling pipeline is launched.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Malformed header or reference content
    #[error("Format error in {origin}: {message}")]
    FormatParse { origin: String, message: String },

    /// An external program exited unsuccessfully or could not be started
    #[error("{message} [command: {command}]{}", stderr_suffix(.stderr))]
    ExternalTool {
        message: String,
        command: String,
        contig: Option<String>,
        stderr: String,
    },
}

/// Type alias for Results using VarcallError
pub type Result<T> = std::result::Result<T, VarcallError>;

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n{}", trimmed)
    }
}

impl VarcallError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a format error for the named file or stream
    pub fn format(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FormatParse {
            origin: origin.into(),
            message: message.into(),
        }
    }

    /// Create an external tool error not tied to a contig
    pub fn tool(
        message: impl Into<String>,
        command: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::ExternalTool {
            message: message.into(),
            command: command.into(),
            contig: None,
            stderr: stderr.into(),
        }
    }

    /// The contig whose pipeline failed, if this error came from the scheduler.
    pub fn failed_contig(&self) -> Option<&str> {
        match self {
            Self::ExternalTool { contig, .. } => contig.as_deref(),
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}
