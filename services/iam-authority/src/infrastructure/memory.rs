//! 内存存储
//!
//! 单一状态实现全部存储接口，用于嵌入式场景与测试。
//! 所有写入在同一把写锁内完成，替换授权天然原子。
//! 支持注入暂时性故障: 规则写入失败 N 次、某一来源的授权查询失败。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cuba_common::{OperationId, OrganizationId, RoleId, UserId};
use cuba_errors::{AppError, AppResult};
use tokio::sync::RwLock;

use crate::application::AuthorityStores;
use crate::domain::authority::{AuthType, AuthorityGrant, AuthorityRepository, Principal, PrincipalKind};
use crate::domain::operation::{display_order, Operation, OperationRepository, OperationType};
use crate::domain::policy::{
    parse_materialized_path, GroupRule, OrganizationHierarchy, PolicyRule, PolicyRuleRepository,
    PolicySubject, RouteBinding, RouteBindingRepository,
};
use crate::domain::MembershipDirectory;

#[derive(Debug, Default)]
struct MemoryState {
    grants: Vec<AuthorityGrant>,
    menus: Vec<Operation>,
    buttons: Vec<Operation>,
    routes: HashMap<OperationId, RouteBinding>,
    policy_rules: Vec<PolicyRule>,
    group_rules: Vec<GroupRule>,
    organization_paths: HashMap<OrganizationId, String>,
    user_organizations: HashMap<UserId, Vec<OrganizationId>>,
    user_roles: HashMap<UserId, Vec<RoleId>>,
    failing_sources: HashSet<PrincipalKind>,
}

impl MemoryState {
    fn grant_position(&self, principal: Principal, auth_type: &AuthType, auth_id: OperationId) -> Option<usize> {
        self.grants.iter().position(|g| {
            g.principal == principal && &g.auth_type == auth_type && g.auth_id == auth_id
        })
    }

    fn activate(&mut self, principal: Principal, auth_type: &AuthType, auth_id: OperationId) {
        match self.grant_position(principal, auth_type, auth_id) {
            Some(pos) => self.grants[pos].status = AuthorityGrant::STATUS_ACTIVE,
            None => self
                .grants
                .push(AuthorityGrant::active(principal, auth_type.clone(), auth_id)),
        }
    }
}

/// 内存授权存储
#[derive(Debug, Default)]
pub struct InMemoryAuthorityStore {
    state: RwLock<MemoryState>,
    upsert_failures: AtomicU32,
}

impl InMemoryAuthorityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以同一份状态装配服务所需的全部存储
    pub fn stores(self: &Arc<Self>) -> AuthorityStores {
        AuthorityStores {
            authorities: self.clone(),
            operations: self.clone(),
            memberships: self.clone(),
            policy_rules: self.clone(),
            route_bindings: self.clone(),
            hierarchy: self.clone(),
        }
    }

    // ---- 数据准备 ----

    /// 追加菜单与按钮，目录保持 (sort, id) 有序
    pub async fn seed_operations(&self, menus: Vec<Operation>, buttons: Vec<Operation>) {
        let mut state = self.state.write().await;
        state.menus.extend(menus);
        state.buttons.extend(buttons);
        state.menus.sort_by(display_order);
        state.buttons.sort_by(display_order);
    }

    pub async fn bind_route(&self, binding: RouteBinding) {
        self.state
            .write()
            .await
            .routes
            .insert(binding.button_id, binding);
    }

    pub async fn set_organization_path(&self, organization_id: OrganizationId, path: impl Into<String>) {
        self.state
            .write()
            .await
            .organization_paths
            .insert(organization_id, path.into());
    }

    pub async fn add_user_to_organization(&self, user_id: UserId, organization_id: OrganizationId) {
        let mut state = self.state.write().await;
        let organizations = state.user_organizations.entry(user_id).or_default();
        if !organizations.contains(&organization_id) {
            organizations.push(organization_id);
        }
    }

    pub async fn assign_role(&self, user_id: UserId, role_id: RoleId) {
        let mut state = self.state.write().await;
        let roles = state.user_roles.entry(user_id).or_default();
        if !roles.contains(&role_id) {
            roles.push(role_id);
        }
    }

    /// 将授权置为失效 (不删除)
    pub async fn deactivate_grant(&self, principal: Principal, auth_type: &AuthType, auth_id: OperationId) {
        let mut state = self.state.write().await;
        if let Some(pos) = state.grant_position(principal, auth_type, auth_id) {
            state.grants[pos].status = AuthorityGrant::STATUS_INACTIVE;
        }
    }

    // ---- 故障注入 ----

    /// 接下来的 n 次规则写入返回暂时性故障
    pub fn fail_next_upserts(&self, n: u32) {
        self.upsert_failures.store(n, Ordering::SeqCst);
    }

    /// 尚未消耗的注入故障数
    pub fn pending_upsert_failures(&self) -> u32 {
        self.upsert_failures.load(Ordering::SeqCst)
    }

    /// 该来源的授权查询一直失败，直到 [`Self::restore_source`]
    pub async fn fail_source(&self, kind: PrincipalKind) {
        self.state.write().await.failing_sources.insert(kind);
    }

    pub async fn restore_source(&self, kind: PrincipalKind) {
        self.state.write().await.failing_sources.remove(&kind);
    }

    // ---- 观测 ----

    pub async fn policy_rules_of(&self, subject: &PolicySubject) -> Vec<PolicyRule> {
        self.state
            .read()
            .await
            .policy_rules
            .iter()
            .filter(|r| &r.subject == subject)
            .cloned()
            .collect()
    }

    pub async fn all_policy_rules(&self) -> Vec<PolicyRule> {
        self.state.read().await.policy_rules.clone()
    }

    pub async fn group_rules(&self) -> Vec<GroupRule> {
        self.state.read().await.group_rules.clone()
    }

    /// 某主体某类型的全部授权行 (含失效)
    pub async fn grant_rows(&self, principal: Principal, auth_type: &AuthType) -> Vec<AuthorityGrant> {
        self.state
            .read()
            .await
            .grants
            .iter()
            .filter(|g| g.principal == principal && &g.auth_type == auth_type)
            .cloned()
            .collect()
    }

    fn take_upsert_failure(&self) -> AppResult<()> {
        let injected = self
            .upsert_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        match injected {
            Ok(_) => Err(AppError::transient("could not serialize access due to concurrent update")),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl AuthorityRepository for InMemoryAuthorityStore {
    async fn grants_for(
        &self,
        kind: PrincipalKind,
        principal_ids: &[i64],
        auth_type: &AuthType,
    ) -> AppResult<Vec<AuthorityGrant>> {
        let state = self.state.read().await;
        if state.failing_sources.contains(&kind) {
            return Err(AppError::transient(format!("{} source unavailable", kind)));
        }
        if principal_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut grants: Vec<AuthorityGrant> = state
            .grants
            .iter()
            .filter(|g| {
                g.principal.kind() == kind
                    && principal_ids.contains(&g.principal.raw_id())
                    && &g.auth_type == auth_type
                    && g.is_active()
            })
            .cloned()
            .collect();
        grants.sort_by_key(|g| (g.principal.raw_id(), g.auth_id));
        Ok(grants)
    }

    async fn replace_grants(
        &self,
        principal: Principal,
        auth_type: &AuthType,
        auth_ids: &[OperationId],
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        state
            .grants
            .retain(|g| !(g.principal == principal && &g.auth_type == auth_type && g.is_active()));
        for &auth_id in auth_ids {
            state.activate(principal, auth_type, auth_id);
        }
        Ok(())
    }

    async fn add_grant(
        &self,
        principal: Principal,
        auth_type: &AuthType,
        auth_id: OperationId,
    ) -> AppResult<()> {
        self.state.write().await.activate(principal, auth_type, auth_id);
        Ok(())
    }

    async fn remove_grant(
        &self,
        principal: Principal,
        auth_type: &AuthType,
        auth_id: OperationId,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        match state.grant_position(principal, auth_type, auth_id) {
            Some(pos) => {
                state.grants.remove(pos);
                Ok(())
            }
            None => Err(AppError::not_found(format!(
                "Grant {} {}:{}",
                principal, auth_type, auth_id
            ))),
        }
    }

    async fn find_grant(
        &self,
        principal: Principal,
        auth_type: &AuthType,
        auth_id: OperationId,
    ) -> AppResult<AuthorityGrant> {
        let state = self.state.read().await;
        state
            .grant_position(principal, auth_type, auth_id)
            .map(|pos| state.grants[pos].clone())
            .ok_or_else(|| AppError::not_found(format!("Grant {} {}:{}", principal, auth_type, auth_id)))
    }
}

#[async_trait]
impl OperationRepository for InMemoryAuthorityStore {
    async fn list_menus(&self) -> AppResult<Vec<Operation>> {
        Ok(self.state.read().await.menus.clone())
    }

    async fn list_buttons(&self) -> AppResult<Vec<Operation>> {
        Ok(self.state.read().await.buttons.clone())
    }

    async fn find(&self, kind: OperationType, id: OperationId) -> AppResult<Option<Operation>> {
        let state = self.state.read().await;
        let operations = match kind {
            OperationType::Menu => &state.menus,
            OperationType::Button => &state.buttons,
        };
        Ok(operations.iter().find(|o| o.id == id).cloned())
    }
}

#[async_trait]
impl MembershipDirectory for InMemoryAuthorityStore {
    async fn organizations_of_user(&self, user_id: UserId) -> AppResult<Vec<OrganizationId>> {
        Ok(self
            .state
            .read()
            .await
            .user_organizations
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn roles_of_user(&self, user_id: UserId) -> AppResult<Vec<RoleId>> {
        Ok(self
            .state
            .read()
            .await
            .user_roles
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl PolicyRuleRepository for InMemoryAuthorityStore {
    async fn upsert_policy_rule(&self, rule: &PolicyRule) -> AppResult<bool> {
        self.take_upsert_failure()?;
        let mut state = self.state.write().await;
        if state.policy_rules.contains(rule) {
            return Ok(false);
        }
        state.policy_rules.push(rule.clone());
        Ok(true)
    }

    async fn delete_policy_rule(&self, rule: &PolicyRule) -> AppResult<bool> {
        let mut state = self.state.write().await;
        let before = state.policy_rules.len();
        state.policy_rules.retain(|r| r != rule);
        Ok(state.policy_rules.len() != before)
    }

    async fn upsert_group_rule(&self, rule: &GroupRule) -> AppResult<bool> {
        self.take_upsert_failure()?;
        let mut state = self.state.write().await;
        if state.group_rules.contains(rule) {
            return Ok(false);
        }
        state.group_rules.push(*rule);
        Ok(true)
    }

    async fn delete_group_rules_of_child(&self, child: OrganizationId) -> AppResult<u64> {
        let mut state = self.state.write().await;
        let before = state.group_rules.len();
        state.group_rules.retain(|g| g.child != child);
        Ok((before - state.group_rules.len()) as u64)
    }
}

#[async_trait]
impl RouteBindingRepository for InMemoryAuthorityStore {
    async fn binding_for_grant(
        &self,
        principal: Principal,
        menu_id: OperationId,
        button_id: OperationId,
    ) -> AppResult<Option<RouteBinding>> {
        let state = self.state.read().await;

        let granted = state
            .grant_position(principal, &AuthType::Button, button_id)
            .is_some_and(|pos| state.grants[pos].is_active());
        let under_menu = state
            .buttons
            .iter()
            .any(|b| b.id == button_id && b.parent_id == menu_id);

        if granted && under_menu {
            Ok(state.routes.get(&button_id).cloned())
        } else {
            Ok(None)
        }
    }

    async fn route_of_button(&self, button_id: OperationId) -> AppResult<Option<RouteBinding>> {
        Ok(self.state.read().await.routes.get(&button_id).cloned())
    }

    async fn routes_of_buttons(&self, button_ids: &[OperationId]) -> AppResult<Vec<RouteBinding>> {
        let state = self.state.read().await;
        Ok(button_ids
            .iter()
            .filter_map(|id| state.routes.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl OrganizationHierarchy for InMemoryAuthorityStore {
    async fn ancestor_path_of(&self, organization_id: OrganizationId) -> AppResult<Vec<OrganizationId>> {
        let state = self.state.read().await;
        let path = state
            .organization_paths
            .get(&organization_id)
            .ok_or_else(|| AppError::not_found(format!("Organization {}", organization_id)))?;
        parse_materialized_path(path, organization_id).map_err(AppError::validation)
    }
}
