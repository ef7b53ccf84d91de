//! PostgreSQL 操作目录仓储实现

use async_trait::async_trait;
use cuba_adapter_postgres::map_sqlx_error;
use cuba_common::OperationId;
use cuba_errors::AppResult;
use sqlx::PgPool;

use crate::domain::operation::{Operation, OperationRepository, OperationType};

fn operation_table(kind: OperationType) -> &'static str {
    match kind {
        OperationType::Menu => "menus",
        OperationType::Button => "buttons",
    }
}

pub struct PostgresOperationRepository {
    pool: PgPool,
}

impl PostgresOperationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn list(&self, kind: OperationType) -> AppResult<Vec<Operation>> {
        let rows = sqlx::query_as::<_, OperationRow>(&format!(
            "SELECT id, parent_id, title, name, tags, sort FROM {} ORDER BY sort, id",
            operation_table(kind)
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(|r| r.into_operation(kind)).collect())
    }
}

#[async_trait]
impl OperationRepository for PostgresOperationRepository {
    async fn list_menus(&self) -> AppResult<Vec<Operation>> {
        self.list(OperationType::Menu).await
    }

    async fn list_buttons(&self) -> AppResult<Vec<Operation>> {
        self.list(OperationType::Button).await
    }

    async fn find(&self, kind: OperationType, id: OperationId) -> AppResult<Option<Operation>> {
        let row = sqlx::query_as::<_, OperationRow>(&format!(
            "SELECT id, parent_id, title, name, tags, sort FROM {} WHERE id = $1",
            operation_table(kind)
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|r| r.into_operation(kind)))
    }
}

// ============ 数据行映射 ============

#[derive(sqlx::FromRow)]
struct OperationRow {
    id: i64,
    parent_id: i64,
    title: String,
    name: String,
    tags: String,
    sort: i32,
}

impl OperationRow {
    fn into_operation(self, kind: OperationType) -> Operation {
        Operation {
            id: OperationId(self.id),
            parent_id: OperationId(self.parent_id),
            title: self.title,
            name: self.name,
            tags: self.tags,
            sort: self.sort,
            kind,
        }
    }
}
