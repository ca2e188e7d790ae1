//! Error kinds surfaced by the provisioning pipeline.

use thiserror::Error;

/// Result alias used throughout localsite.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure a provisioning or removal run can end in.
///
/// Stage errors carry the description of the step that failed together with
/// the underlying message, so the operator can tell what was already applied.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad input, detected before anything on the host was touched.
    #[error("validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),

    /// The caller lacks the rights needed to mutate the host.
    #[error("this command requires elevated privileges. Re-run with: {command}")]
    Privilege { command: String },

    #[error("failed to {step}: {message}")]
    Permission { step: String, message: String },

    #[error("failed to {step}: {message}")]
    Certificate { step: String, message: String },

    #[error("failed to {step}: {message}")]
    Config { step: String, message: String },

    #[error("failed to {step}: {message}")]
    Hosts { step: String, message: String },

    #[error("failed to {step}: {message}")]
    Service { step: String, message: String },

    /// No registry record exists for the requested domain.
    #[error("no site registered for domain '{0}'")]
    NotFound(String),

    #[error("failed to {step}: {message}")]
    Registry { step: String, message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }

    pub fn permission(step: impl Into<String>, message: impl ToString) -> Self {
        Self::Permission {
            step: step.into(),
            message: message.to_string(),
        }
    }

    pub fn certificate(step: impl Into<String>, message: impl ToString) -> Self {
        Self::Certificate {
            step: step.into(),
            message: message.to_string(),
        }
    }

    pub fn config(step: impl Into<String>, message: impl ToString) -> Self {
        Self::Config {
            step: step.into(),
            message: message.to_string(),
        }
    }

    pub fn hosts(step: impl Into<String>, message: impl ToString) -> Self {
        Self::Hosts {
            step: step.into(),
            message: message.to_string(),
        }
    }

    pub fn service(step: impl Into<String>, message: impl ToString) -> Self {
        Self::Service {
            step: step.into(),
            message: message.to_string(),
        }
    }

    pub fn registry(step: impl Into<String>, message: impl ToString) -> Self {
        Self::Registry {
            step: step.into(),
            message: message.to_string(),
        }
    }

    /// Short machine-friendly name of the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Privilege { .. } => "privilege",
            Self::Permission { .. } => "permission",
            Self::Certificate { .. } => "certificate",
            Self::Config { .. } => "config",
            Self::Hosts { .. } => "hosts",
            Self::Service { .. } => "service",
            Self::NotFound(_) => "not_found",
            Self::Registry { .. } => "registry",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_lists_every_problem() {
        let err = Error::Validation(vec!["bad domain".into(), "bad path".into()]);
        assert_eq!(
            err.to_string(),
            "validation failed:\n  - bad domain\n  - bad path"
        );
    }

    #[test]
    fn stage_errors_name_the_step() {
        let err = Error::service("reload nginx", "exit status 1");
        assert_eq!(err.to_string(), "failed to reload nginx: exit status 1");
        assert_eq!(err.kind(), "service");
    }
}
