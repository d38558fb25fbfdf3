use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Category of a failed execution, reported to callers as `kind`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    DependencyError,
    UnsupportedHeader,
    CompileError,
    RuntimeError,
    InternalError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::DependencyError => "dependency_error",
            ErrorKind::UnsupportedHeader => "unsupported_header",
            ErrorKind::CompileError => "compile_error",
            ErrorKind::RuntimeError => "runtime_error",
            ErrorKind::InternalError => "internal_error",
        };
        write!(f, "{}", s)
    }
}

/// A single package that could not be installed
#[derive(Debug, Clone, PartialEq)]
pub struct InstallFailure {
    pub package: String,
    pub message: String,
}

impl fmt::Display for InstallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.package, self.message)
    }
}

/// Every way an execution request can fail
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{0}")]
    Validation(String),

    #[error("Dependency Error: failed to install {}", format_failures(.0))]
    Dependency(Vec<InstallFailure>),

    #[error("Unsupported header: {}", .0.join(", "))]
    UnsupportedHeader(Vec<String>),

    #[error("{0}")]
    Compile(String),

    #[error("{0}")]
    Runtime(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::Validation(_) => ErrorKind::ValidationError,
            ExecError::Dependency(_) => ErrorKind::DependencyError,
            ExecError::UnsupportedHeader(_) => ErrorKind::UnsupportedHeader,
            ExecError::Compile(_) => ErrorKind::CompileError,
            ExecError::Runtime(_) => ErrorKind::RuntimeError,
            ExecError::Internal(_) => ErrorKind::InternalError,
        }
    }
}

fn format_failures(failures: &[InstallFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<anyhow::Error> for ExecError {
    fn from(err: anyhow::Error) -> Self {
        ExecError::Internal(format!("{:#}", err))
    }
}

impl From<std::io::Error> for ExecError {
    fn from(err: std::io::Error) -> Self {
        ExecError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::UnsupportedHeader).unwrap();
        assert_eq!(json, "\"unsupported_header\"");
        assert_eq!(ErrorKind::CompileError.to_string(), "compile_error");
    }

    #[test]
    fn test_dependency_error_lists_every_package() {
        let err = ExecError::Dependency(vec![
            InstallFailure {
                package: "requests".into(),
                message: "exit code 1".into(),
            },
            InstallFailure {
                package: "numpy".into(),
                message: "timed out after 30s".into(),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("Dependency Error"));
        assert!(msg.contains("requests: exit code 1"));
        assert!(msg.contains("numpy: timed out after 30s"));
        assert_eq!(err.kind(), ErrorKind::DependencyError);
    }

    #[test]
    fn test_unsupported_header_names_roots() {
        let err = ExecError::UnsupportedHeader(vec!["curl".into()]);
        assert_eq!(err.to_string(), "Unsupported header: curl");
    }
}
