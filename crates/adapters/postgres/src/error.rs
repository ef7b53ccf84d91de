//! 数据库错误映射工具
//!
//! 统一的 SQLx 错误到 AppError 的转换；锁竞争、序列化冲突与连接故障
//! 映射为 `AppError::Transient`，供上层有界重试

use cuba_common::is_retryable_error;
use cuba_errors::AppError;

/// PostgreSQL 暂时性错误码
///
/// 40001 serialization_failure, 40P01 deadlock_detected, 55P03 lock_not_available,
/// 57014 query_canceled (statement timeout), 57P01-57P03 shutdown/cannot_connect_now,
/// 08000/08003/08006 connection exceptions
const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", "40P01", "55P03", "57014", "57P01", "57P02", "57P03", "08000", "08003", "08006",
];

/// 判断 SQLSTATE 是否为暂时性错误
pub fn is_transient_sqlstate(code: &str) -> bool {
    TRANSIENT_SQLSTATES.contains(&code)
}

/// 将 SQLx 错误转换为 AppError，区分不同错误类型
pub fn map_sqlx_error(e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::RowNotFound => AppError::not_found("Record not found"),
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                match code.as_ref() {
                    "23505" => AppError::conflict("Duplicate entry violates unique constraint"),
                    "23503" => AppError::validation("Foreign key constraint violation"),
                    "23514" => AppError::validation("Check constraint violation"),
                    "23502" => AppError::validation("Not null constraint violation"),
                    "22001" => AppError::validation("String data too long"),
                    "22P02" => AppError::validation("Invalid input syntax"),
                    c if is_transient_sqlstate(c) => {
                        AppError::transient(format!("Database error ({}): {}", c, db_err))
                    }
                    c => AppError::database(format!("Database error ({}): {}", c, db_err)),
                }
            } else {
                AppError::database(db_err.to_string())
            }
        }
        sqlx::Error::PoolTimedOut => AppError::transient("Database connection pool timeout"),
        sqlx::Error::PoolClosed => AppError::internal("Database connection pool is closed"),
        sqlx::Error::Io(io) => AppError::transient(format!("Database I/O error: {}", io)),
        sqlx::Error::WorkerCrashed => AppError::transient("Database worker crashed"),
        sqlx::Error::Protocol(msg) => {
            AppError::internal(format!("Database protocol error: {}", msg))
        }
        other => {
            let msg = other.to_string();
            if is_retryable_error(&msg) {
                AppError::transient(msg)
            } else {
                AppError::database(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found() {
        let err = map_sqlx_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        let err = map_sqlx_error(sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());
    }

    #[test]
    fn test_pool_closed_is_not_transient() {
        let err = map_sqlx_error(sqlx::Error::PoolClosed);
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[test]
    fn test_transient_sqlstates() {
        assert!(is_transient_sqlstate("40P01"));
        assert!(is_transient_sqlstate("55P03"));
        assert!(!is_transient_sqlstate("23505"));
    }
}
