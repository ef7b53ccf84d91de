//! 用户成员关系 (外部协作方)

use async_trait::async_trait;
use cuba_common::{OrganizationId, RoleId, UserId};
use cuba_errors::AppResult;

/// 用户所属组织与角色的查询接口
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    async fn organizations_of_user(&self, user_id: UserId) -> AppResult<Vec<OrganizationId>>;

    async fn roles_of_user(&self, user_id: UserId) -> AppResult<Vec<RoleId>>;
}
