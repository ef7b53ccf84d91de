//! 持久化层模块

pub mod authority_repository;
pub mod operation_repository;
pub mod organization_repository;
pub mod policy_rule_repository;
pub mod route_binding_repository;

use std::sync::Arc;

use cuba_adapter_postgres::{check_connection, create_pool, map_sqlx_error, PostgresConfig};
use cuba_config::{AppConfig, DatabaseConfig};
use cuba_errors::AppResult;
use sqlx::PgPool;
use tracing::info;

pub use authority_repository::PostgresAuthorityRepository;
pub use operation_repository::PostgresOperationRepository;
pub use organization_repository::PostgresOrganizationRepository;
pub use policy_rule_repository::PostgresPolicyRuleRepository;
pub use route_binding_repository::PostgresRouteBindingRepository;

use crate::application::{AuthorityService, AuthorityStores};
use crate::MIGRATOR;

/// 基于同一连接池装配全部存储
pub fn postgres_stores(pool: PgPool) -> AuthorityStores {
    let organizations = Arc::new(PostgresOrganizationRepository::new(pool.clone()));
    AuthorityStores {
        authorities: Arc::new(PostgresAuthorityRepository::new(pool.clone())),
        operations: Arc::new(PostgresOperationRepository::new(pool.clone())),
        memberships: organizations.clone(),
        policy_rules: Arc::new(PostgresPolicyRuleRepository::new(pool.clone())),
        route_bindings: Arc::new(PostgresRouteBindingRepository::new(pool)),
        hierarchy: organizations,
    }
}

/// 按数据库配置建立连接池、执行迁移并装配存储
pub async fn connect_postgres_stores(config: &DatabaseConfig) -> AppResult<AuthorityStores> {
    let pool = create_pool(&PostgresConfig::from(config)).await?;
    check_connection(&pool).await?;
    MIGRATOR
        .run(&pool)
        .await
        .map_err(|e| map_sqlx_error(sqlx::Error::from(e)))?;
    info!("Authority schema migrated");
    Ok(postgres_stores(pool))
}

/// 按应用配置连接数据库并构造授权服务
pub async fn connect_authority_service(config: &AppConfig) -> AppResult<AuthorityService> {
    let stores = connect_postgres_stores(&config.database).await?;
    info!(app = %config.app_name, env = %config.app_env, "Authority service connected");
    Ok(AuthorityService::with_policy_sync(stores, &config.policy_sync))
}
