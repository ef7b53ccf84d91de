//! 执行规则合成
//!
//! 将按钮授权转换为执行引擎的 p 规则，并为组织主体补齐组织层级的 g 规则。
//! 每次调用按 `Begin -> LookupSource -> UpsertPolicy -> PropagateGroup -> Done | Failed`
//! 推进；失败总是返回给调用方，已提交的写入不回滚。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use cuba_common::{with_conditional_retry, OperationId, OrganizationId, RetryConfig};
use cuba_errors::{AppError, AppResult};
use futures::future::BoxFuture;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::domain::authority::{AuthType, AuthorityRepository};
use crate::domain::policy::{
    adjacent_group_rules, OrganizationHierarchy, PolicyRule, PolicyRuleRepository, PolicySubject,
    RouteBindingRepository,
};
use crate::error::AuthorityError;

/// 合成阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisStage {
    Begin,
    LookupSource,
    UpsertPolicy,
    PropagateGroup,
    Done,
    Failed,
}

impl SynthesisStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SynthesisStage::Begin => "begin",
            SynthesisStage::LookupSource => "lookup_source",
            SynthesisStage::UpsertPolicy => "upsert_policy",
            SynthesisStage::PropagateGroup => "propagate_group",
            SynthesisStage::Done => "done",
            SynthesisStage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SynthesisStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 合成结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisReport {
    pub stage: SynthesisStage,
    /// 新插入的 p 规则数 (已存在的不计)
    pub policy_rules_inserted: usize,
    /// 新插入的 g 规则数
    pub group_rules_inserted: usize,
}

impl SynthesisReport {
    fn begin() -> Self {
        Self {
            stage: SynthesisStage::Begin,
            policy_rules_inserted: 0,
            group_rules_inserted: 0,
        }
    }

    fn enter(&mut self, stage: SynthesisStage, target: &str) {
        debug!(target_subject = target, from = %self.stage, to = %stage, "Policy synthesis stage");
        self.stage = stage;
    }
}

/// 执行规则合成器
pub struct PolicySynthesizer {
    rules: Arc<dyn PolicyRuleRepository>,
    bindings: Arc<dyn RouteBindingRepository>,
    hierarchy: Arc<dyn OrganizationHierarchy>,
    authorities: Arc<dyn AuthorityRepository>,
    retry: RetryConfig,
}

impl PolicySynthesizer {
    pub fn new(
        rules: Arc<dyn PolicyRuleRepository>,
        bindings: Arc<dyn RouteBindingRepository>,
        hierarchy: Arc<dyn OrganizationHierarchy>,
        authorities: Arc<dyn AuthorityRepository>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            rules,
            bindings,
            hierarchy,
            authorities,
            retry,
        }
    }

    /// 为主体持有的按钮授权写入 p 规则
    ///
    /// 组织主体继续写入组织层级的 g 规则；角色主体在写入 p 规则后结束。
    pub async fn assign_button_policy(
        &self,
        subject: PolicySubject,
        menu_id: OperationId,
        button_id: OperationId,
    ) -> AppResult<SynthesisReport> {
        let target = subject.to_string();
        let mut report = SynthesisReport::begin();

        let result = self
            .run_assign(&mut report, &target, subject, menu_id, button_id)
            .await;
        self.finish(report, &target, result)
    }

    async fn run_assign(
        &self,
        report: &mut SynthesisReport,
        target: &str,
        subject: PolicySubject,
        menu_id: OperationId,
        button_id: OperationId,
    ) -> AppResult<()> {
        report.enter(SynthesisStage::LookupSource, target);
        let binding = self
            .bindings
            .binding_for_grant(subject.principal(), menu_id, button_id)
            .await?
            .ok_or(AuthorityError::RouteBindingNotFound {
                subject,
                menu_id,
                button_id,
            })?;

        report.enter(SynthesisStage::UpsertPolicy, target);
        let rule = PolicyRule::new(subject, &binding);
        if self
            .upsert_with_retry("policy", || self.rules.upsert_policy_rule(&rule))
            .await?
        {
            report.policy_rules_inserted += 1;
        }

        if let PolicySubject::Organization(organization_id) = subject {
            report.enter(SynthesisStage::PropagateGroup, target);
            report.group_rules_inserted += self.propagate(organization_id).await?;
        }
        Ok(())
    }

    /// 沿组织物化路径写入相邻的 g 规则，根端在前
    pub async fn propagate_group_rules(
        &self,
        organization_id: OrganizationId,
    ) -> AppResult<SynthesisReport> {
        let target = PolicySubject::Organization(organization_id).to_string();
        let mut report = SynthesisReport::begin();

        report.enter(SynthesisStage::PropagateGroup, &target);
        let result = match self.propagate(organization_id).await {
            Ok(inserted) => {
                report.group_rules_inserted = inserted;
                Ok(())
            }
            Err(e) => Err(e),
        };
        self.finish(report, &target, result)
    }

    /// 组织结构变化后重建 g 规则
    ///
    /// 先删除以各组织为 child 的 g 规则，再按新路径重新写入
    pub async fn rebuild_group_rules(
        &self,
        organization_ids: &[OrganizationId],
    ) -> AppResult<SynthesisReport> {
        let mut report = SynthesisReport::begin();
        let target = format!("{} organizations", organization_ids.len());

        report.enter(SynthesisStage::PropagateGroup, &target);
        let mut result = Ok(());
        for &organization_id in organization_ids {
            let step = async {
                let removed = self.rules.delete_group_rules_of_child(organization_id).await?;
                debug!(organization_id = %organization_id, removed, "Group rules cleared");
                self.propagate(organization_id).await
            };
            match step.await {
                Ok(inserted) => report.group_rules_inserted += inserted,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.finish(report, &target, result)
    }

    /// 撤回按钮对应的 p 规则
    ///
    /// 同一主体仍持有的其他按钮映射到相同 (path, method) 时保留规则。
    /// g 规则不受影响。返回是否删除了规则。
    pub async fn remove_button_policy(
        &self,
        subject: PolicySubject,
        button_id: OperationId,
    ) -> AppResult<bool> {
        let Some(binding) = self.bindings.route_of_button(button_id).await? else {
            debug!(subject = %subject, button_id = %button_id, "Button has no route, nothing to retract");
            return Ok(false);
        };

        let principal = subject.principal();
        let remaining: Vec<OperationId> = self
            .authorities
            .grants_for(principal.kind(), &[principal.raw_id()], &AuthType::Button)
            .await?
            .into_iter()
            .map(|g| g.auth_id)
            .filter(|id| *id != button_id)
            .collect();

        if !remaining.is_empty() {
            let routes = self.bindings.routes_of_buttons(&remaining).await?;
            if routes.iter().any(|r| r.same_route(&binding)) {
                debug!(
                    subject = %subject,
                    path = %binding.path,
                    method = %binding.method,
                    "Route still granted through another button, rule kept"
                );
                return Ok(false);
            }
        }

        let rule = PolicyRule::new(subject, &binding);
        let removed = self.rules.delete_policy_rule(&rule).await?;
        if removed {
            info!(rule = %rule, "Policy rule retracted");
        }
        Ok(removed)
    }

    async fn propagate(&self, organization_id: OrganizationId) -> AppResult<usize> {
        let ancestors = self.hierarchy.ancestor_path_of(organization_id).await?;
        let mut inserted = 0;
        for rule in adjacent_group_rules(organization_id, &ancestors) {
            if self
                .upsert_with_retry("group", || self.rules.upsert_group_rule(&rule))
                .await?
            {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// 有界重试的规则写入，仅重试暂时性故障
    async fn upsert_with_retry<'a, F>(&self, kind: &'static str, upsert: F) -> AppResult<bool>
    where
        F: Fn() -> BoxFuture<'a, AppResult<bool>>,
    {
        let attempts = AtomicU32::new(0);
        let result = with_conditional_retry(
            &self.retry,
            "policy_rule_upsert",
            || {
                attempts.fetch_add(1, Ordering::Relaxed);
                counter!("policy_rule_upsert_attempts_total", "kind" => kind).increment(1);
                upsert()
            },
            AppError::is_transient,
        )
        .await;

        match result {
            Ok(inserted) => Ok(inserted),
            Err(source) if source.is_transient() => Err(AuthorityError::RetriesExhausted {
                attempts: attempts.load(Ordering::Relaxed),
                source,
            }
            .into()),
            Err(e) => Err(e),
        }
    }

    fn finish(
        &self,
        mut report: SynthesisReport,
        target: &str,
        result: AppResult<()>,
    ) -> AppResult<SynthesisReport> {
        match result {
            Ok(()) => {
                report.enter(SynthesisStage::Done, target);
                counter!("policy_synthesis_total", "outcome" => "done").increment(1);
                info!(
                    target_subject = target,
                    policy_rules_inserted = report.policy_rules_inserted,
                    group_rules_inserted = report.group_rules_inserted,
                    "Policy synthesis completed"
                );
                Ok(report)
            }
            Err(e) => {
                let failed_at = report.stage;
                report.enter(SynthesisStage::Failed, target);
                counter!("policy_synthesis_total", "outcome" => "failed").increment(1);
                warn!(
                    target_subject = target,
                    stage = %failed_at,
                    error = %e,
                    "Policy synthesis failed"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use cuba_common::RoleId;

    use crate::domain::authority::{AuthorityGrant, Principal, PrincipalKind};
    use crate::domain::policy::{GroupRule, RouteBinding};

    // --- Mocks ---

    #[derive(Default)]
    struct MockRuleRepository {
        policies: Mutex<Vec<PolicyRule>>,
        groups: Mutex<Vec<GroupRule>>,
        transient_failures: AtomicU32,
        upsert_calls: AtomicU32,
    }

    impl MockRuleRepository {
        fn failing(times: u32) -> Self {
            Self {
                transient_failures: AtomicU32::new(times),
                ..Default::default()
            }
        }

        fn take_failure(&self) -> AppResult<()> {
            self.upsert_calls.fetch_add(1, Ordering::SeqCst);
            let left = self.transient_failures.load(Ordering::SeqCst);
            if left > 0 {
                self.transient_failures.store(left - 1, Ordering::SeqCst);
                return Err(AppError::transient("deadlock detected"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PolicyRuleRepository for MockRuleRepository {
        async fn upsert_policy_rule(&self, rule: &PolicyRule) -> AppResult<bool> {
            self.take_failure()?;
            let mut policies = self.policies.lock().unwrap();
            if policies.contains(rule) {
                return Ok(false);
            }
            policies.push(rule.clone());
            Ok(true)
        }

        async fn delete_policy_rule(&self, rule: &PolicyRule) -> AppResult<bool> {
            let mut policies = self.policies.lock().unwrap();
            let before = policies.len();
            policies.retain(|r| r != rule);
            Ok(policies.len() != before)
        }

        async fn upsert_group_rule(&self, rule: &GroupRule) -> AppResult<bool> {
            self.take_failure()?;
            let mut groups = self.groups.lock().unwrap();
            if groups.contains(rule) {
                return Ok(false);
            }
            groups.push(*rule);
            Ok(true)
        }

        async fn delete_group_rules_of_child(&self, child: OrganizationId) -> AppResult<u64> {
            let mut groups = self.groups.lock().unwrap();
            let before = groups.len();
            groups.retain(|g| g.child != child);
            Ok((before - groups.len()) as u64)
        }
    }

    struct MockBindings {
        routes: Vec<(OperationId, OperationId, RouteBinding)>,
        granted: Vec<OperationId>,
    }

    #[async_trait]
    impl RouteBindingRepository for MockBindings {
        async fn binding_for_grant(
            &self,
            _principal: Principal,
            menu_id: OperationId,
            button_id: OperationId,
        ) -> AppResult<Option<RouteBinding>> {
            Ok(self
                .routes
                .iter()
                .find(|(menu, button, _)| {
                    *menu == menu_id && *button == button_id && self.granted.contains(button)
                })
                .map(|(_, _, r)| r.clone()))
        }

        async fn route_of_button(&self, button_id: OperationId) -> AppResult<Option<RouteBinding>> {
            Ok(self
                .routes
                .iter()
                .find(|(_, b, _)| *b == button_id)
                .map(|(_, _, r)| r.clone()))
        }

        async fn routes_of_buttons(&self, button_ids: &[OperationId]) -> AppResult<Vec<RouteBinding>> {
            Ok(self
                .routes
                .iter()
                .filter(|(_, b, _)| button_ids.contains(b))
                .map(|(_, _, r)| r.clone())
                .collect())
        }
    }

    struct MockHierarchy;

    #[async_trait]
    impl OrganizationHierarchy for MockHierarchy {
        async fn ancestor_path_of(&self, organization_id: OrganizationId) -> AppResult<Vec<OrganizationId>> {
            match organization_id.0 {
                1 => Ok(vec![]),
                4 => Ok(vec![OrganizationId(1)]),
                9 => Ok(vec![OrganizationId(4), OrganizationId(1)]),
                _ => Err(AppError::not_found("organization")),
            }
        }
    }

    struct MockAuthorities {
        granted: Vec<OperationId>,
    }

    #[async_trait]
    impl AuthorityRepository for MockAuthorities {
        async fn grants_for(
            &self,
            kind: PrincipalKind,
            principal_ids: &[i64],
            _auth_type: &AuthType,
        ) -> AppResult<Vec<AuthorityGrant>> {
            Ok(self
                .granted
                .iter()
                .map(|id| {
                    AuthorityGrant::active(
                        Principal::from_parts(kind, principal_ids[0]),
                        AuthType::Button,
                        *id,
                    )
                })
                .collect())
        }
        async fn replace_grants(&self, _p: Principal, _t: &AuthType, _ids: &[OperationId]) -> AppResult<()> { Ok(()) }
        async fn add_grant(&self, _p: Principal, _t: &AuthType, _id: OperationId) -> AppResult<()> { Ok(()) }
        async fn remove_grant(&self, _p: Principal, _t: &AuthType, _id: OperationId) -> AppResult<()> { Ok(()) }
        async fn find_grant(&self, _p: Principal, _t: &AuthType, _id: OperationId) -> AppResult<AuthorityGrant> {
            Err(AppError::not_found("grant"))
        }
    }

    fn synthesizer(rules: Arc<MockRuleRepository>, granted: Vec<i64>) -> PolicySynthesizer {
        let granted: Vec<OperationId> = granted.into_iter().map(OperationId).collect();
        let routes = vec![
            (OperationId(5), OperationId(123), RouteBinding::new(OperationId(123), "/api/users", "DELETE")),
            (OperationId(5), OperationId(124), RouteBinding::new(OperationId(124), "/api/users", "delete")),
            (OperationId(5), OperationId(125), RouteBinding::new(OperationId(125), "/api/users", "POST")),
        ];
        PolicySynthesizer::new(
            rules,
            Arc::new(MockBindings {
                routes,
                granted: granted.clone(),
            }),
            Arc::new(MockHierarchy),
            Arc::new(MockAuthorities { granted }),
            RetryConfig::fixed(5, Duration::from_millis(1)),
        )
    }

    // --- Tests ---

    #[tokio::test]
    async fn test_role_assignment_is_idempotent() {
        let rules = Arc::new(MockRuleRepository::default());
        let synth = synthesizer(rules.clone(), vec![123]);
        let subject = PolicySubject::Role(RoleId(1));

        let first = synth
            .assign_button_policy(subject, OperationId(5), OperationId(123))
            .await
            .unwrap();
        let second = synth
            .assign_button_policy(subject, OperationId(5), OperationId(123))
            .await
            .unwrap();

        assert_eq!(first.stage, SynthesisStage::Done);
        assert_eq!(first.policy_rules_inserted, 1);
        assert_eq!(second.policy_rules_inserted, 0);
        assert_eq!(rules.policies.lock().unwrap().len(), 1);
        // 角色主体不写 g 规则
        assert!(rules.groups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_organization_assignment_propagates_adjacent_pairs() {
        let rules = Arc::new(MockRuleRepository::default());
        let synth = synthesizer(rules.clone(), vec![123]);

        let report = synth
            .assign_button_policy(
                PolicySubject::Organization(OrganizationId(9)),
                OperationId(5),
                OperationId(123),
            )
            .await
            .unwrap();

        assert_eq!(report.group_rules_inserted, 2);
        let groups = rules.groups.lock().unwrap().clone();
        assert_eq!(
            groups,
            vec![
                GroupRule::new(OrganizationId(4), OrganizationId(1)),
                GroupRule::new(OrganizationId(9), OrganizationId(4)),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_binding_writes_nothing() {
        let rules = Arc::new(MockRuleRepository::default());
        let synth = synthesizer(rules.clone(), vec![]);

        let err = synth
            .assign_button_policy(PolicySubject::Role(RoleId(1)), OperationId(5), OperationId(123))
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(rules.upsert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let rules = Arc::new(MockRuleRepository::failing(3));
        let synth = synthesizer(rules.clone(), vec![123]);

        let report = synth
            .assign_button_policy(PolicySubject::Role(RoleId(1)), OperationId(5), OperationId(123))
            .await
            .unwrap();

        assert_eq!(report.policy_rules_inserted, 1);
        assert_eq!(rules.upsert_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let rules = Arc::new(MockRuleRepository::failing(100));
        let synth = synthesizer(rules.clone(), vec![123]);

        let err = synth
            .assign_button_policy(PolicySubject::Role(RoleId(1)), OperationId(5), OperationId(123))
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert!(err.to_string().contains("5 attempts"));
        assert_eq!(rules.upsert_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_remove_keeps_rule_shared_by_other_button() {
        let rules = Arc::new(MockRuleRepository::default());
        // 123 与 124 映射到同一路由 DELETE /api/users
        let synth = synthesizer(rules.clone(), vec![124]);
        let subject = PolicySubject::Role(RoleId(1));
        rules
            .upsert_policy_rule(&PolicyRule::new(
                subject,
                &RouteBinding::new(OperationId(123), "/api/users", "DELETE"),
            ))
            .await
            .unwrap();

        assert!(!synth.remove_button_policy(subject, OperationId(123)).await.unwrap());
        assert_eq!(rules.policies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_deletes_unshared_rule() {
        let rules = Arc::new(MockRuleRepository::default());
        let synth = synthesizer(rules.clone(), vec![125]);
        let subject = PolicySubject::Role(RoleId(1));
        rules
            .upsert_policy_rule(&PolicyRule::new(
                subject,
                &RouteBinding::new(OperationId(123), "/api/users", "DELETE"),
            ))
            .await
            .unwrap();

        assert!(synth.remove_button_policy(subject, OperationId(123)).await.unwrap());
        assert!(rules.policies.lock().unwrap().is_empty());
        // 没有路由的按钮
        assert!(!synth.remove_button_policy(subject, OperationId(999)).await.unwrap());
    }

    #[tokio::test]
    async fn test_rebuild_group_rules() {
        let rules = Arc::new(MockRuleRepository::default());
        let synth = synthesizer(rules.clone(), vec![]);
        rules
            .upsert_group_rule(&GroupRule::new(OrganizationId(9), OrganizationId(7)))
            .await
            .unwrap();

        let report = synth.rebuild_group_rules(&[OrganizationId(9)]).await.unwrap();
        assert_eq!(report.group_rules_inserted, 2);
        let groups = rules.groups.lock().unwrap().clone();
        assert!(!groups.contains(&GroupRule::new(OrganizationId(9), OrganizationId(7))));
        assert!(groups.contains(&GroupRule::new(OrganizationId(9), OrganizationId(4))));

        assert!(synth.propagate_group_rules(OrganizationId(77)).await.is_err());
    }
}
