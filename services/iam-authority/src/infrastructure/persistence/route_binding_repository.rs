//! PostgreSQL 按钮路由绑定查询

use async_trait::async_trait;
use cuba_adapter_postgres::map_sqlx_error;
use cuba_common::OperationId;
use cuba_errors::AppResult;
use sqlx::PgPool;

use super::authority_repository::principal_column;
use crate::domain::authority::Principal;
use crate::domain::policy::{RouteBinding, RouteBindingRepository};

pub struct PostgresRouteBindingRepository {
    pool: PgPool,
}

impl PostgresRouteBindingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RouteBindingRepository for PostgresRouteBindingRepository {
    async fn binding_for_grant(
        &self,
        principal: Principal,
        menu_id: OperationId,
        button_id: OperationId,
    ) -> AppResult<Option<RouteBinding>> {
        let kind = principal.kind();
        let row = sqlx::query_as::<_, RouteRow>(&format!(
            r#"
            SELECT r.button_id, r.path, r.method
            FROM {table} a
            INNER JOIN buttons b ON b.id = a.auth_id
            INNER JOIN button_routes r ON r.button_id = b.id
            WHERE a.{column} = $1
              AND a.auth_type = 'button'
              AND a.status = 1
              AND a.auth_id = $2
              AND b.parent_id = $3
            "#,
            table = kind.authority_table(),
            column = principal_column(kind),
        ))
        .bind(principal.raw_id())
        .bind(button_id.0)
        .bind(menu_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Into::into))
    }

    async fn route_of_button(&self, button_id: OperationId) -> AppResult<Option<RouteBinding>> {
        let row = sqlx::query_as::<_, RouteRow>(
            "SELECT button_id, path, method FROM button_routes WHERE button_id = $1",
        )
        .bind(button_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Into::into))
    }

    async fn routes_of_buttons(&self, button_ids: &[OperationId]) -> AppResult<Vec<RouteBinding>> {
        if button_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = button_ids.iter().map(|id| id.0).collect();

        let rows = sqlx::query_as::<_, RouteRow>(
            "SELECT button_id, path, method FROM button_routes WHERE button_id = ANY($1) ORDER BY button_id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// ============ 数据行映射 ============

#[derive(sqlx::FromRow)]
struct RouteRow {
    button_id: i64,
    path: String,
    method: String,
}

impl From<RouteRow> for RouteBinding {
    fn from(row: RouteRow) -> Self {
        RouteBinding::new(OperationId(row.button_id), row.path, row.method)
    }
}
