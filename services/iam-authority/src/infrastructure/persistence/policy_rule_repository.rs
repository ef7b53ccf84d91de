//! PostgreSQL 执行规则仓储实现 (casbin_rule 表)
//!
//! 写入为存在性保护的插入，唯一索引兜底并发下的重复写入

use async_trait::async_trait;
use cuba_adapter_postgres::map_sqlx_error;
use cuba_common::OrganizationId;
use cuba_errors::AppResult;
use sqlx::PgPool;

use crate::domain::policy::{GroupRule, PolicyRule, PolicyRuleRepository, PolicySubject};

pub struct PostgresPolicyRuleRepository {
    pool: PgPool,
}

impl PostgresPolicyRuleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_if_absent(&self, ptype: &str, v0: &str, v1: &str, v2: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO casbin_rule (ptype, v0, v1, v2)
            SELECT $1::VARCHAR, $2::VARCHAR, $3::VARCHAR, $4::VARCHAR
            WHERE NOT EXISTS (
                SELECT 1 FROM casbin_rule
                WHERE ptype = $1 AND v0 = $2 AND v1 = $3 AND v2 = $4
                  AND v3 = '' AND v4 = '' AND v5 = ''
            )
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(ptype)
        .bind(v0)
        .bind(v1)
        .bind(v2)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl PolicyRuleRepository for PostgresPolicyRuleRepository {
    async fn upsert_policy_rule(&self, rule: &PolicyRule) -> AppResult<bool> {
        self.insert_if_absent(
            PolicyRule::PTYPE,
            &rule.subject.to_string(),
            &rule.object,
            &rule.action,
        )
        .await
    }

    async fn delete_policy_rule(&self, rule: &PolicyRule) -> AppResult<bool> {
        let result = sqlx::query(
            "DELETE FROM casbin_rule WHERE ptype = $1 AND v0 = $2 AND v1 = $3 AND v2 = $4",
        )
        .bind(PolicyRule::PTYPE)
        .bind(rule.subject.to_string())
        .bind(&rule.object)
        .bind(&rule.action)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_group_rule(&self, rule: &GroupRule) -> AppResult<bool> {
        self.insert_if_absent(
            GroupRule::PTYPE,
            &rule.child_subject().to_string(),
            &rule.parent_subject().to_string(),
            "",
        )
        .await
    }

    async fn delete_group_rules_of_child(&self, child: OrganizationId) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM casbin_rule WHERE ptype = $1 AND v0 = $2")
            .bind(GroupRule::PTYPE)
            .bind(PolicySubject::Organization(child).to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}
