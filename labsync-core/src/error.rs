//! Error taxonomy shared by the adapters and the backend.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::form::ValidationError;

/// Machine-readable failure code reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    PermissionDenied,
    Unauthenticated,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    NetworkRequestFailed,
    /// Any code without a fixed translation.
    Other(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::PermissionDenied => "permission-denied",
            ErrorCode::Unauthenticated => "unauthenticated",
            ErrorCode::NotFound => "not-found",
            ErrorCode::AlreadyExists => "already-exists",
            ErrorCode::FailedPrecondition => "failed-precondition",
            ErrorCode::NetworkRequestFailed => "network-request-failed",
            ErrorCode::Other(code) => code,
        }
    }

    pub fn parse(code: &str) -> Self {
        match code {
            "permission-denied" => ErrorCode::PermissionDenied,
            "unauthenticated" => ErrorCode::Unauthenticated,
            "not-found" => ErrorCode::NotFound,
            "already-exists" => ErrorCode::AlreadyExists,
            "failed-precondition" => ErrorCode::FailedPrecondition,
            "network-request-failed" => ErrorCode::NetworkRequestFailed,
            other => ErrorCode::Other(other.to_string()),
        }
    }

    /// Fixed user-facing text for well-known codes.
    pub fn description(&self) -> Option<&'static str> {
        match self {
            ErrorCode::PermissionDenied => {
                Some("Permissão negada. Verifique as regras de acesso do banco de dados.")
            }
            ErrorCode::Unauthenticated => Some("Usuário não autenticado. Faça login novamente."),
            ErrorCode::NotFound => Some("Documento não encontrado."),
            ErrorCode::AlreadyExists => Some("Este documento já existe."),
            ErrorCode::FailedPrecondition => Some("Operação não permitida no estado atual."),
            ErrorCode::NetworkRequestFailed => Some("Erro de rede. Verifique sua conexão."),
            ErrorCode::Other(_) => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw failure reported by a document store or identity service.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message} ({code})")]
pub struct BackendError {
    pub code: ErrorCode,
    pub message: String,
}

impl BackendError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthenticated, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlreadyExists, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkRequestFailed, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Other("internal".into()), message)
    }
}

/// Errors surfaced by the record and identity adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabError {
    /// A mutating operation ran without a ready identity. Nothing was written.
    #[error("Usuário não autenticado")]
    Auth,

    /// The store rejected an operation; `reason` is the translated message.
    #[error("Store: {reason} ({code})")]
    Store { code: ErrorCode, reason: String },

    /// The identity provider could not produce an identity.
    #[error("Falha no provedor de identidade: {0}")]
    Identity(BackendError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl LabError {
    /// Translate a store failure through the fixed code table.
    /// Unknown codes keep the store's own message.
    pub fn from_store(err: BackendError) -> Self {
        let reason = match err.code.description() {
            Some(text) => text.to_string(),
            None => err.message,
        };
        LabError::Store {
            code: err.code,
            reason,
        }
    }

    pub fn code(&self) -> Option<&ErrorCode> {
        match self {
            LabError::Store { code, .. } => Some(code),
            LabError::Identity(err) => Some(&err.code),
            _ => None,
        }
    }
}
