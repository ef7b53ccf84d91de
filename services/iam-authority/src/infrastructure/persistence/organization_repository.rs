//! PostgreSQL 组织层级与成员关系查询

use async_trait::async_trait;
use cuba_adapter_postgres::map_sqlx_error;
use cuba_common::{OrganizationId, RoleId, UserId};
use cuba_errors::{AppError, AppResult};
use sqlx::PgPool;

use crate::domain::policy::{parse_materialized_path, OrganizationHierarchy};
use crate::domain::MembershipDirectory;

pub struct PostgresOrganizationRepository {
    pool: PgPool,
}

impl PostgresOrganizationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrganizationHierarchy for PostgresOrganizationRepository {
    async fn ancestor_path_of(
        &self,
        organization_id: OrganizationId,
    ) -> AppResult<Vec<OrganizationId>> {
        let path: String = sqlx::query_scalar("SELECT path FROM organizations WHERE id = $1")
            .bind(organization_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| AppError::not_found(format!("Organization {}", organization_id)))?;

        parse_materialized_path(&path, organization_id).map_err(AppError::internal)
    }
}

#[async_trait]
impl MembershipDirectory for PostgresOrganizationRepository {
    async fn organizations_of_user(&self, user_id: UserId) -> AppResult<Vec<OrganizationId>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT organization_id FROM user_organizations WHERE user_id = $1 ORDER BY organization_id",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(ids.into_iter().map(OrganizationId).collect())
    }

    async fn roles_of_user(&self, user_id: UserId) -> AppResult<Vec<RoleId>> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT role_id FROM user_roles WHERE user_id = $1 ORDER BY role_id")
                .bind(user_id.0)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(ids.into_iter().map(RoleId).collect())
    }
}
