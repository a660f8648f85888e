//! Error mapping guide:
//! - Map io::ErrorKind::NotFound to exit code 127; invalid input to 2; all others to 1.
//! - Library code returns anyhow::Result; ProvisionError marks failures whose exit code matters.
use std::fmt;
use std::io;

/// Map an io::Error to a process exit code:
/// - 127 for NotFound (command not found)
/// - 2 for InvalidInput
/// - 1 for all other errors
pub fn exit_code_for_io_error(e: &io::Error) -> u8 {
    match e.kind() {
        io::ErrorKind::NotFound => 127,
        io::ErrorKind::InvalidInput => 2,
        _ => 1,
    }
}

/// Errors with a defined exit code. Everything else surfaces as a plain anyhow error (exit 1).
#[derive(Debug)]
pub enum ProvisionError {
    Io(io::Error),
    /// Bad user input (domain name, CLI argument, config value).
    Invalid(String),
    /// The playbook stopped at a step whose failure policy is abort.
    Aborted { step: String, message: String },
    Message(String),
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionError::Io(e) => write!(f, "{e}"),
            ProvisionError::Invalid(s) => write!(f, "{s}"),
            ProvisionError::Aborted { step, message } => {
                write!(f, "step '{step}' failed: {message}")
            }
            ProvisionError::Message(s) => write!(f, "{s}"),
        }
    }
}

impl std::error::Error for ProvisionError {}

impl From<io::Error> for ProvisionError {
    fn from(e: io::Error) -> Self {
        ProvisionError::Io(e)
    }
}

pub fn exit_code_for_provision_error(e: &ProvisionError) -> u8 {
    match e {
        ProvisionError::Io(ioe) => exit_code_for_io_error(ioe),
        ProvisionError::Invalid(_) => 2,
        ProvisionError::Aborted { .. } | ProvisionError::Message(_) => 1,
    }
}

/// Walk an anyhow chain and pick the most specific exit code.
pub fn exit_code_for_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(pe) = cause.downcast_ref::<ProvisionError>() {
            return exit_code_for_provision_error(pe);
        }
        if let Some(ioe) = cause.downcast_ref::<io::Error>() {
            return exit_code_for_io_error(ioe);
        }
    }
    1
}

/// Render an error with its context chain on one line (`outer: inner: root`).
pub fn display_error_chain(e: &anyhow::Error) -> String {
    e.chain()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}
