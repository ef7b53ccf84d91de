//! 授权服务
//!
//! 对外的统一入口: 授权写入、可用操作查询与执行规则同步。

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cuba_common::{OperationId, OrganizationId, RetryConfig, RoleId, UserId};
use cuba_config::PolicySyncConfig;
use cuba_errors::{AppError, AppResult};
use tracing::{info, warn};

use super::resolver::{load_catalog, AuthorityResolver};
use super::synthesizer::{PolicySynthesizer, SynthesisReport};
use crate::config::policy_retry_config;
use crate::domain::authority::{AuthType, AuthorityRepository, Principal, PrincipalKind};
use crate::domain::operation::{OperationNode, OperationRepository, OperationType};
use crate::domain::policy::{
    OrganizationHierarchy, PolicyRuleRepository, PolicySubject, RouteBindingRepository,
};
use crate::domain::MembershipDirectory;
use crate::error::{AuthorityError, ButtonFailure};

/// 服务依赖的全部存储
#[derive(Clone)]
pub struct AuthorityStores {
    pub authorities: Arc<dyn AuthorityRepository>,
    pub operations: Arc<dyn OperationRepository>,
    pub memberships: Arc<dyn MembershipDirectory>,
    pub policy_rules: Arc<dyn PolicyRuleRepository>,
    pub route_bindings: Arc<dyn RouteBindingRepository>,
    pub hierarchy: Arc<dyn OrganizationHierarchy>,
}

/// 授权服务
pub struct AuthorityService {
    authorities: Arc<dyn AuthorityRepository>,
    operations: Arc<dyn OperationRepository>,
    resolver: AuthorityResolver,
    synthesizer: PolicySynthesizer,
    generation: AtomicU64,
}

impl AuthorityService {
    pub fn new(stores: AuthorityStores, retry: RetryConfig) -> Self {
        let resolver = AuthorityResolver::new(
            stores.authorities.clone(),
            stores.operations.clone(),
            stores.memberships,
        );
        let synthesizer = PolicySynthesizer::new(
            stores.policy_rules,
            stores.route_bindings,
            stores.hierarchy,
            stores.authorities.clone(),
            retry,
        );

        Self {
            authorities: stores.authorities,
            operations: stores.operations,
            resolver,
            synthesizer,
            generation: AtomicU64::new(0),
        }
    }

    /// 按策略同步配置构造重试策略
    pub fn with_policy_sync(stores: AuthorityStores, config: &PolicySyncConfig) -> Self {
        Self::new(stores, policy_retry_config(config))
    }

    pub fn resolver(&self) -> &AuthorityResolver {
        &self.resolver
    }

    pub fn synthesizer(&self) -> &PolicySynthesizer {
        &self.synthesizer
    }

    /// 授权版本号，每次授权变更成功后递增
    pub fn grant_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    // ---- 授权写入 ----

    /// 整体替换角色的授权
    pub async fn grant_to_role(
        &self,
        role_id: RoleId,
        auth_type: AuthType,
        auth_ids: &[OperationId],
    ) -> AppResult<()> {
        self.replace(Principal::Role(role_id), auth_type, auth_ids).await
    }

    /// 整体替换用户的直接授权 (用户不产生执行规则)
    pub async fn grant_to_user(
        &self,
        user_id: UserId,
        auth_type: AuthType,
        auth_ids: &[OperationId],
    ) -> AppResult<()> {
        self.replace(Principal::User(user_id), auth_type, auth_ids).await
    }

    /// 整体替换组织的授权
    pub async fn grant_to_organization(
        &self,
        organization_id: OrganizationId,
        auth_type: AuthType,
        auth_ids: &[OperationId],
    ) -> AppResult<()> {
        self.replace(Principal::Organization(organization_id), auth_type, auth_ids)
            .await
    }

    /// 增量授权，已有授权保持不变
    pub async fn add_grants(
        &self,
        principal: Principal,
        auth_type: AuthType,
        auth_ids: &[OperationId],
    ) -> AppResult<()> {
        let auth_ids = distinct(auth_ids);
        for &auth_id in &auth_ids {
            self.authorities
                .add_grant(principal, &auth_type, auth_id)
                .await?;
        }
        self.bump_generation();
        info!(principal = %principal, auth_type = %auth_type, count = auth_ids.len(), "Grants added");

        let Some(subject) = button_subject(principal, &auth_type) else {
            return Ok(());
        };
        let failures = self.synthesize_buttons(principal, subject, &auth_ids).await;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(partial_failure(principal, "added", failures))
        }
    }

    /// 撤销单条授权；角色/组织的按钮授权同时撤回对应的执行规则
    pub async fn revoke_grant(
        &self,
        kind: PrincipalKind,
        principal_id: i64,
        auth_type: AuthType,
        auth_id: OperationId,
    ) -> AppResult<()> {
        let principal = Principal::from_parts(kind, principal_id);
        self.authorities
            .remove_grant(principal, &auth_type, auth_id)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    AuthorityError::GrantNotFound {
                        principal,
                        auth_type: auth_type.clone(),
                        auth_id,
                    }
                    .into()
                } else {
                    e
                }
            })?;
        self.bump_generation();
        info!(principal = %principal, auth_type = %auth_type, auth_id = %auth_id, "Grant revoked");

        if let Some(subject) = button_subject(principal, &auth_type) {
            if let Err(error) = self.synthesizer.remove_button_policy(subject, auth_id).await {
                return Err(partial_failure(
                    principal,
                    "revoked",
                    vec![ButtonFailure {
                        button_id: auth_id,
                        error,
                    }],
                ));
            }
        }
        Ok(())
    }

    // ---- 查询 ----

    /// 用户可用的操作树
    pub async fn available_operations_for_user(&self, user_id: UserId) -> AppResult<Vec<OperationNode>> {
        Ok(self
            .resolver
            .resolve_user_operations(user_id)
            .await?
            .into_tree())
    }

    /// 角色授予的操作树
    pub async fn role_operations(&self, role_ids: &[RoleId]) -> AppResult<Vec<OperationNode>> {
        Ok(self
            .resolver
            .resolve_role_operations(role_ids)
            .await?
            .into_tree())
    }

    /// 组织授予的操作树
    pub async fn organization_operations(
        &self,
        organization_ids: &[OrganizationId],
    ) -> AppResult<Vec<OperationNode>> {
        Ok(self
            .resolver
            .resolve_organization_operations(organization_ids)
            .await?
            .into_tree())
    }

    /// 用户是否可用某个操作
    pub async fn has_operation(
        &self,
        user_id: UserId,
        kind: OperationType,
        operation_id: OperationId,
    ) -> AppResult<bool> {
        Ok(self
            .resolver
            .resolve_user_operations(user_id)
            .await?
            .contains(kind, operation_id))
    }

    /// 系统完整操作树
    pub async fn system_operation_tree(&self) -> AppResult<Vec<OperationNode>> {
        Ok(load_catalog(self.operations.as_ref()).await?.tree())
    }

    // ---- 执行规则 ----

    /// 组织结构变化 (移动、路径变更) 后重建 g 规则
    pub async fn organization_structure_changed(
        &self,
        organization_ids: &[OrganizationId],
    ) -> AppResult<SynthesisReport> {
        self.synthesizer.rebuild_group_rules(organization_ids).await
    }

    async fn replace(
        &self,
        principal: Principal,
        auth_type: AuthType,
        auth_ids: &[OperationId],
    ) -> AppResult<()> {
        let auth_ids = distinct(auth_ids);
        let subject = button_subject(principal, &auth_type);

        let previous: Vec<OperationId> = match subject {
            Some(_) => self
                .authorities
                .grants_for(principal.kind(), &[principal.raw_id()], &auth_type)
                .await?
                .into_iter()
                .map(|g| g.auth_id)
                .collect(),
            None => Vec::new(),
        };

        self.authorities
            .replace_grants(principal, &auth_type, &auth_ids)
            .await?;
        self.bump_generation();
        info!(principal = %principal, auth_type = %auth_type, count = auth_ids.len(), "Grants replaced");

        let Some(subject) = subject else {
            return Ok(());
        };

        let kept: HashSet<OperationId> = auth_ids.iter().copied().collect();
        let mut failures = Vec::new();
        for button_id in previous.into_iter().filter(|id| !kept.contains(id)) {
            if let Err(error) = self.synthesizer.remove_button_policy(subject, button_id).await {
                warn!(principal = %principal, button_id = %button_id, error = %error, "Grant replaced but policy retraction failed");
                failures.push(ButtonFailure { button_id, error });
            }
        }

        failures.extend(self.synthesize_buttons(principal, subject, &auth_ids).await);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(partial_failure(principal, "replaced", failures))
        }
    }

    /// 为每个按钮写入执行规则，菜单取按钮的父节点
    ///
    /// 单个按钮失败不影响其余按钮，返回全部失败项
    async fn synthesize_buttons(
        &self,
        principal: Principal,
        subject: PolicySubject,
        button_ids: &[OperationId],
    ) -> Vec<ButtonFailure> {
        let mut failures = Vec::new();
        for &button_id in button_ids {
            let result = async {
                let button = self
                    .operations
                    .find(OperationType::Button, button_id)
                    .await?
                    .ok_or(AuthorityError::OperationNotFound {
                        kind: OperationType::Button.as_str(),
                        id: button_id,
                    })?;
                self.synthesizer
                    .assign_button_policy(subject, button.parent_id, button_id)
                    .await
            }
            .await;

            if let Err(error) = result {
                warn!(principal = %principal, button_id = %button_id, error = %error, "Grant stored but policy synthesis failed");
                failures.push(ButtonFailure { button_id, error });
            }
        }
        failures
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

/// 角色/组织的按钮授权对应执行规则主体
fn button_subject(principal: Principal, auth_type: &AuthType) -> Option<PolicySubject> {
    if auth_type.is_button() {
        PolicySubject::from_principal(principal)
    } else {
        None
    }
}

fn distinct(ids: &[OperationId]) -> Vec<OperationId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

fn partial_failure(principal: Principal, action: &str, failures: Vec<ButtonFailure>) -> AppError {
    AuthorityError::PartialFailure {
        stored: format!("grants for {} {}", principal, action),
        failures,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::domain::operation::Operation;
    use crate::domain::policy::RouteBinding;
    use crate::infrastructure::memory::InMemoryAuthorityStore;

    fn service(store: &Arc<InMemoryAuthorityStore>) -> AuthorityService {
        AuthorityService::new(store.stores(), RetryConfig::fixed(5, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_service_from_policy_sync_config() {
        let store = seeded().await;
        let config = PolicySyncConfig {
            retry_delay_ms: 1,
            jitter_ms: 1,
            ..Default::default()
        };
        let service = AuthorityService::with_policy_sync(store.stores(), &config);

        store.fail_next_upserts(4);
        service
            .grant_to_role(RoleId(7), AuthType::Button, &[OperationId(123)])
            .await
            .unwrap();
        assert_eq!(store.pending_upsert_failures(), 0);
        assert_eq!(store.policy_rules_of(&PolicySubject::Role(RoleId(7))).await.len(), 1);
    }

    async fn seeded() -> Arc<InMemoryAuthorityStore> {
        let store = Arc::new(InMemoryAuthorityStore::new());
        store
            .seed_operations(
                vec![Operation::menu(1, 0, "system"), Operation::menu(5, 1, "users")],
                vec![Operation::button(123, 5, "delete"), Operation::button(124, 5, "create")],
            )
            .await;
        store
            .bind_route(RouteBinding::new(OperationId(123), "/api/users/{id}", "DELETE"))
            .await;
        store
            .bind_route(RouteBinding::new(OperationId(124), "/api/users", "POST"))
            .await;
        store
    }

    #[tokio::test]
    async fn test_generation_increments_on_mutation() {
        let store = seeded().await;
        let service = service(&store);
        assert_eq!(service.grant_generation(), 0);

        service
            .grant_to_user(UserId(1), AuthType::Menu, &[OperationId(1)])
            .await
            .unwrap();
        assert_eq!(service.grant_generation(), 1);

        // 撤销不存在的授权不改变版本号
        let err = service
            .revoke_grant(PrincipalKind::User, 1, AuthType::Menu, OperationId(42))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(service.grant_generation(), 1);
    }

    #[tokio::test]
    async fn test_role_button_replace_retracts_removed_buttons() {
        let store = seeded().await;
        let service = service(&store);
        let subject = PolicySubject::Role(RoleId(7));

        service
            .grant_to_role(RoleId(7), AuthType::Button, &[OperationId(123), OperationId(124)])
            .await
            .unwrap();
        assert_eq!(store.policy_rules_of(&subject).await.len(), 2);

        service
            .grant_to_role(RoleId(7), AuthType::Button, &[OperationId(124)])
            .await
            .unwrap();
        let rules = store.policy_rules_of(&subject).await;
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].action, "POST");
    }

    #[tokio::test]
    async fn test_unbound_button_reports_partial_failure() {
        let store = seeded().await;
        store
            .seed_operations(vec![], vec![Operation::button(200, 5, "audit")])
            .await;
        let service = service(&store);

        let err = service
            .grant_to_role(RoleId(7), AuthType::Button, &[OperationId(200)])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PartialFailure(_)));

        // 授权已保存，不回滚
        let grant = store
            .find_grant(Principal::Role(RoleId(7)), &AuthType::Button, OperationId(200))
            .await;
        assert!(grant.is_ok());
    }

    #[tokio::test]
    async fn test_user_button_grant_writes_no_rules() {
        let store = seeded().await;
        let service = service(&store);

        service
            .grant_to_user(UserId(3), AuthType::Button, &[OperationId(123)])
            .await
            .unwrap();
        assert!(store.all_policy_rules().await.is_empty());
        assert!(
            service
                .has_operation(UserId(3), OperationType::Button, OperationId(123))
                .await
                .unwrap()
        );
    }
}
