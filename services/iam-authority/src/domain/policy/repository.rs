//! 规则与路由绑定仓储接口

use async_trait::async_trait;
use cuba_common::{OperationId, OrganizationId};
use cuba_errors::AppResult;

use super::rule::{GroupRule, PolicyRule, RouteBinding};
use crate::domain::authority::Principal;

/// 执行引擎规则表
///
/// 写入均为存在性保护的插入: 规则已存在时为空操作
#[async_trait]
pub trait PolicyRuleRepository: Send + Sync {
    /// 写入 p 规则，返回是否新插入
    async fn upsert_policy_rule(&self, rule: &PolicyRule) -> AppResult<bool>;

    /// 删除 p 规则，返回是否删除了记录
    async fn delete_policy_rule(&self, rule: &PolicyRule) -> AppResult<bool>;

    /// 写入 g 规则，返回是否新插入
    async fn upsert_group_rule(&self, rule: &GroupRule) -> AppResult<bool>;

    /// 删除以该组织为 child 的全部 g 规则，返回删除条数
    async fn delete_group_rules_of_child(&self, child: OrganizationId) -> AppResult<u64>;
}

/// 按钮路由绑定查询
#[async_trait]
pub trait RouteBindingRepository: Send + Sync {
    /// 主体 -> 菜单 -> 按钮 -> 路由 的联查
    ///
    /// 仅当主体持有该按钮的有效授权、按钮位于该菜单下且绑定了路由时返回
    async fn binding_for_grant(
        &self,
        principal: Principal,
        menu_id: OperationId,
        button_id: OperationId,
    ) -> AppResult<Option<RouteBinding>>;

    /// 按钮绑定的路由 (不校验授权)
    async fn route_of_button(&self, button_id: OperationId) -> AppResult<Option<RouteBinding>>;

    /// 批量查询按钮路由
    async fn routes_of_buttons(&self, button_ids: &[OperationId]) -> AppResult<Vec<RouteBinding>>;
}
