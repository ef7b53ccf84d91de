//! cuba-errors - 统一错误处理

use thiserror::Error;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(String),

    /// 存储层暂时性故障 (锁竞争、序列化冲突、连接池超时)，可重试
    #[error("Transient store failure: {0}")]
    Transient(String),

    /// 批处理部分完成，已提交部分不回滚；调用方需整体重放
    #[error("Partial failure: {0}")]
    PartialFailure(String),
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn partial_failure(msg: impl Into<String>) -> Self {
        Self::PartialFailure(msg.into())
    }

    /// 是否为可重试的暂时性故障
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// 转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::Conflict(_) => 409,
            Self::Internal(_) => 500,
            Self::Database(_) => 500,
            Self::Transient(_) => 503,
            Self::PartialFailure(_) => 500,
        }
    }
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::not_found("grant").status_code(), 404);
        assert_eq!(AppError::validation("bad id").status_code(), 400);
        assert_eq!(AppError::conflict("duplicate").status_code(), 409);
        assert_eq!(AppError::partial_failure("batch").status_code(), 500);
        assert_eq!(AppError::transient("lock timeout").status_code(), 503);
    }

    #[test]
    fn test_transient_classification() {
        assert!(AppError::transient("deadlock detected").is_transient());
        assert!(!AppError::database("syntax error").is_transient());
        assert!(AppError::not_found("x").is_not_found());
    }
}
