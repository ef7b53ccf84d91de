//! PostgreSQL 授权仓储实现

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cuba_adapter_postgres::map_sqlx_error;
use cuba_common::OperationId;
use cuba_errors::{AppError, AppResult};
use sqlx::PgPool;

use crate::domain::authority::{AuthType, AuthorityGrant, AuthorityRepository, Principal, PrincipalKind};

/// 授权表中的主体列
pub(crate) fn principal_column(kind: PrincipalKind) -> &'static str {
    match kind {
        PrincipalKind::Organization => "organization_id",
        PrincipalKind::Role => "role_id",
        PrincipalKind::User => "user_id",
    }
}

pub struct PostgresAuthorityRepository {
    pool: PgPool,
}

impl PostgresAuthorityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthorityRepository for PostgresAuthorityRepository {
    async fn grants_for(
        &self,
        kind: PrincipalKind,
        principal_ids: &[i64],
        auth_type: &AuthType,
    ) -> AppResult<Vec<AuthorityGrant>> {
        if principal_ids.is_empty() {
            return Ok(Vec::new());
        }

        let column = principal_column(kind);
        let sql = format!(
            r#"
            SELECT {column} AS principal_id, auth_type, auth_id, status, created_at
            FROM {table}
            WHERE {column} = ANY($1) AND auth_type = $2 AND status = 1
            ORDER BY {column}, auth_id
            "#,
            table = kind.authority_table(),
        );

        let rows = sqlx::query_as::<_, GrantRow>(&sql)
            .bind(principal_ids)
            .bind(auth_type.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(|r| r.into_grant(kind)).collect()
    }

    async fn replace_grants(
        &self,
        principal: Principal,
        auth_type: &AuthType,
        auth_ids: &[OperationId],
    ) -> AppResult<()> {
        let kind = principal.kind();
        let table = kind.authority_table();
        let column = principal_column(kind);
        let ids: Vec<i64> = auth_ids.iter().map(|id| id.0).collect();

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // 同一 (principal, auth_type) 的替换串行执行，锁随事务释放
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("{}:{}:{}", table, principal.raw_id(), auth_type))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        sqlx::query(&format!(
            "DELETE FROM {table} WHERE {column} = $1 AND auth_type = $2 AND status = 1"
        ))
        .bind(principal.raw_id())
        .bind(auth_type.as_str())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if !ids.is_empty() {
            sqlx::query(&format!(
                r#"
                INSERT INTO {table} ({column}, auth_type, auth_id, status, created_at)
                SELECT $1, $2, ids.auth_id, 1, NOW()
                FROM (SELECT DISTINCT UNNEST($3::BIGINT[]) AS auth_id) ids
                ON CONFLICT ({column}, auth_type, auth_id) DO UPDATE SET status = 1
                "#
            ))
            .bind(principal.raw_id())
            .bind(auth_type.as_str())
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn add_grant(
        &self,
        principal: Principal,
        auth_type: &AuthType,
        auth_id: OperationId,
    ) -> AppResult<()> {
        let kind = principal.kind();
        let column = principal_column(kind);
        sqlx::query(&format!(
            r#"
            INSERT INTO {table} ({column}, auth_type, auth_id, status, created_at)
            VALUES ($1, $2, $3, 1, NOW())
            ON CONFLICT ({column}, auth_type, auth_id) DO UPDATE SET status = 1
            "#,
            table = kind.authority_table(),
        ))
        .bind(principal.raw_id())
        .bind(auth_type.as_str())
        .bind(auth_id.0)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn remove_grant(
        &self,
        principal: Principal,
        auth_type: &AuthType,
        auth_id: OperationId,
    ) -> AppResult<()> {
        let kind = principal.kind();
        let column = principal_column(kind);
        let result = sqlx::query(&format!(
            "DELETE FROM {table} WHERE {column} = $1 AND auth_type = $2 AND auth_id = $3",
            table = kind.authority_table(),
        ))
        .bind(principal.raw_id())
        .bind(auth_type.as_str())
        .bind(auth_id.0)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!(
                "Grant {} {}:{}",
                principal, auth_type, auth_id
            )));
        }
        Ok(())
    }

    async fn find_grant(
        &self,
        principal: Principal,
        auth_type: &AuthType,
        auth_id: OperationId,
    ) -> AppResult<AuthorityGrant> {
        let kind = principal.kind();
        let column = principal_column(kind);
        let row = sqlx::query_as::<_, GrantRow>(&format!(
            r#"
            SELECT {column} AS principal_id, auth_type, auth_id, status, created_at
            FROM {table}
            WHERE {column} = $1 AND auth_type = $2 AND auth_id = $3
            "#,
            table = kind.authority_table(),
        ))
        .bind(principal.raw_id())
        .bind(auth_type.as_str())
        .bind(auth_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| AppError::not_found(format!("Grant {} {}:{}", principal, auth_type, auth_id)))?;

        row.into_grant(kind)
    }
}

// ============ 数据行映射 ============

#[derive(sqlx::FromRow)]
struct GrantRow {
    principal_id: i64,
    auth_type: String,
    auth_id: i64,
    status: i16,
    created_at: DateTime<Utc>,
}

impl GrantRow {
    fn into_grant(self, kind: PrincipalKind) -> AppResult<AuthorityGrant> {
        let auth_type: AuthType = self
            .auth_type
            .parse()
            .map_err(|e: String| AppError::internal(format!("Corrupt grant row: {}", e)))?;

        Ok(AuthorityGrant {
            principal: Principal::from_parts(kind, self.principal_id),
            auth_type,
            auth_id: OperationId(self.auth_id),
            status: self.status,
            created_at: self.created_at,
        })
    }
}
