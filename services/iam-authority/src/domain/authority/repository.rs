//! 授权仓储接口

use async_trait::async_trait;
use cuba_common::OperationId;
use cuba_errors::AppResult;

use super::grant::{AuthType, AuthorityGrant, Principal, PrincipalKind};

/// 授权仓储接口
///
/// 三类授权 (角色/用户/组织) 共用同一形状，以 [`PrincipalKind`] 区分
#[async_trait]
pub trait AuthorityRepository: Send + Sync {
    /// 批量查询多个主体的有效授权；无匹配时返回空列表
    async fn grants_for(
        &self,
        kind: PrincipalKind,
        principal_ids: &[i64],
        auth_type: &AuthType,
    ) -> AppResult<Vec<AuthorityGrant>>;

    /// 整体替换: 清空 (principal, auth_type) 的有效授权后逐条写入
    ///
    /// 原子执行，同一 (principal, auth_type) 上的并发替换被串行化
    async fn replace_grants(
        &self,
        principal: Principal,
        auth_type: &AuthType,
        auth_ids: &[OperationId],
    ) -> AppResult<()>;

    /// 增量授权 (已存在则重新激活，不产生重复行)
    async fn add_grant(
        &self,
        principal: Principal,
        auth_type: &AuthType,
        auth_id: OperationId,
    ) -> AppResult<()>;

    /// 撤销授权 (物理删除)；记录不存在时返回 NotFound
    async fn remove_grant(
        &self,
        principal: Principal,
        auth_type: &AuthType,
        auth_id: OperationId,
    ) -> AppResult<()>;

    /// 查找单条授权；不存在时返回 NotFound
    async fn find_grant(
        &self,
        principal: Principal,
        auth_type: &AuthType,
        auth_id: OperationId,
    ) -> AppResult<AuthorityGrant>;
}
