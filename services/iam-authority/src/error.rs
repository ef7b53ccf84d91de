use cuba_common::OperationId;
use cuba_errors::AppError;
use thiserror::Error;

use crate::domain::authority::{AuthType, Principal};
use crate::domain::policy::PolicySubject;

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("Grant not found: {principal} {auth_type}:{auth_id}")]
    GrantNotFound {
        principal: Principal,
        auth_type: AuthType,
        auth_id: OperationId,
    },
    #[error("Operation not found: {kind}:{id}")]
    OperationNotFound { kind: &'static str, id: OperationId },
    #[error("Route binding not found for {subject} menu {menu_id} button {button_id}")]
    RouteBindingNotFound {
        subject: PolicySubject,
        menu_id: OperationId,
        button_id: OperationId,
    },
    #[error("Policy rule upsert failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: AppError,
    },
    #[error("{stored}; policy synthesis failed for {}", render_failures(.failures))]
    PartialFailure {
        stored: String,
        failures: Vec<ButtonFailure>,
    },
}

/// 单个按钮的执行规则同步失败
#[derive(Debug)]
pub struct ButtonFailure {
    pub button_id: OperationId,
    pub error: AppError,
}

fn render_failures(failures: &[ButtonFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("button {}: {}", f.button_id, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<AuthorityError> for AppError {
    fn from(error: AuthorityError) -> Self {
        match error {
            AuthorityError::GrantNotFound { .. }
            | AuthorityError::OperationNotFound { .. }
            | AuthorityError::RouteBindingNotFound { .. } => AppError::NotFound(error.to_string()),
            AuthorityError::RetriesExhausted { .. } => AppError::Transient(error.to_string()),
            AuthorityError::PartialFailure { .. } => AppError::PartialFailure(error.to_string()),
        }
    }
}
