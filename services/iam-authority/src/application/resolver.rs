//! 授权解析
//!
//! 将用户经由组织、角色与直接授权三条路径可达的操作聚合为一个去重集合。
//! 三条路径相互独立: 任一路径失败只记录告警，其余路径照常合并。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use cuba_common::{OperationId, OrganizationId, RoleId, UserId};
use cuba_errors::AppResult;
use metrics::{counter, histogram};
use tracing::{debug, warn};

use crate::domain::authority::{AuthType, AuthorityRepository, PrincipalKind};
use crate::domain::operation::{
    build_operation_tree, display_order, operation_key, Operation, OperationCatalog,
    OperationNode, OperationRepository, OperationType,
};
use crate::domain::MembershipDirectory;

/// 解析结果中的一项，记录最终生效的来源
///
/// `implied` 为真表示该菜单未被授予，仅作为已授予操作的祖先用于组装树
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOperation {
    pub operation: Operation,
    pub source: PrincipalKind,
    pub implied: bool,
}

/// 去重后的操作集合，键为 "{type}:{id}"
#[derive(Debug, Clone, Default)]
pub struct ResolvedOperationSet {
    entries: HashMap<String, ResolvedOperation>,
}

impl ResolvedOperationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 合并一个来源授予的操作；键冲突时后合并者覆盖
    pub fn merge<I>(&mut self, source: PrincipalKind, operations: I)
    where
        I: IntoIterator<Item = Operation>,
    {
        for operation in operations {
            self.entries.insert(
                operation.key(),
                ResolvedOperation {
                    operation,
                    source,
                    implied: false,
                },
            );
        }
    }

    /// 合并仅用于组装树的祖先菜单；已存在的条目保持不变
    pub fn merge_implied<I>(&mut self, source: PrincipalKind, operations: I)
    where
        I: IntoIterator<Item = Operation>,
    {
        for operation in operations {
            self.entries
                .entry(operation.key())
                .or_insert(ResolvedOperation {
                    operation,
                    source,
                    implied: true,
                });
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 是否被授予；仅作为祖先补入的菜单不算
    pub fn contains(&self, kind: OperationType, id: OperationId) -> bool {
        self.entries
            .get(&operation_key(kind, id))
            .is_some_and(|r| !r.implied)
    }

    /// 被授予的条目数
    pub fn granted_len(&self) -> usize {
        self.entries.values().filter(|r| !r.implied).count()
    }

    pub fn get(&self, kind: OperationType, id: OperationId) -> Option<&ResolvedOperation> {
        self.entries.get(&operation_key(kind, id))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// 去重后的操作，按 (sort, id) 排序，菜单在前
    pub fn operations(&self) -> Vec<Operation> {
        let mut operations: Vec<Operation> = self
            .entries
            .values()
            .map(|r| r.operation.clone())
            .collect();
        operations.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| display_order(a, b)));
        operations
    }

    /// 转换为嵌套的操作树
    pub fn into_tree(self) -> Vec<OperationNode> {
        let (mut menus, mut buttons): (Vec<Operation>, Vec<Operation>) = self
            .entries
            .into_values()
            .map(|r| r.operation)
            .partition(Operation::is_menu);
        menus.sort_by(display_order);
        buttons.sort_by(display_order);
        build_operation_tree(menus, buttons)
    }
}

/// 某一来源的有效授权 ID
#[derive(Debug, Clone)]
struct SourceGrants {
    source: PrincipalKind,
    menus: Vec<OperationId>,
    buttons: Vec<OperationId>,
}

impl SourceGrants {
    fn empty(source: PrincipalKind) -> Self {
        Self {
            source,
            menus: Vec::new(),
            buttons: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.menus.is_empty() && self.buttons.is_empty()
    }
}

/// 两次加载 (全部菜单、全部按钮) 得到操作目录
pub async fn load_catalog(operations: &dyn OperationRepository) -> AppResult<OperationCatalog> {
    let (menus, buttons) = futures::try_join!(operations.list_menus(), operations.list_buttons())?;
    Ok(OperationCatalog::new(menus, buttons))
}

/// 授权解析器
pub struct AuthorityResolver {
    authorities: Arc<dyn AuthorityRepository>,
    operations: Arc<dyn OperationRepository>,
    memberships: Arc<dyn MembershipDirectory>,
}

impl AuthorityResolver {
    pub fn new(
        authorities: Arc<dyn AuthorityRepository>,
        operations: Arc<dyn OperationRepository>,
        memberships: Arc<dyn MembershipDirectory>,
    ) -> Self {
        Self {
            authorities,
            operations,
            memberships,
        }
    }

    /// 解析用户可用的全部操作
    ///
    /// 合并顺序: 组织 -> 角色 -> 用户
    pub async fn resolve_user_operations(&self, user_id: UserId) -> AppResult<ResolvedOperationSet> {
        let start = Instant::now();
        let direct_ids = [user_id.0];

        let (organization, role, direct) = futures::join!(
            self.organization_grants_of(user_id),
            self.role_grants_of(user_id),
            self.source_grants(PrincipalKind::User, &direct_ids),
        );

        let mut sources = Vec::with_capacity(3);
        for (kind, result) in [
            (PrincipalKind::Organization, organization),
            (PrincipalKind::Role, role),
            (PrincipalKind::User, direct),
        ] {
            match result {
                Ok(grants) => sources.push(grants),
                Err(e) => {
                    warn!(
                        user_id = %user_id,
                        source = kind.as_str(),
                        error = %e,
                        "Authority source failed, continuing with remaining sources"
                    );
                    counter!("authority_resolution_source_errors_total", "source" => kind.as_str())
                        .increment(1);
                }
            }
        }

        let result = self.materialize(sources).await;

        counter!("authority_resolutions_total", "scope" => "user").increment(1);
        histogram!("authority_resolution_duration_ms").record(start.elapsed().as_millis() as f64);

        if let Ok(set) = &result {
            debug!(user_id = %user_id, operations = set.len(), "Resolved user operations");
        }
        result
    }

    /// 解析一组角色自身授予的操作
    pub async fn resolve_role_operations(&self, role_ids: &[RoleId]) -> AppResult<ResolvedOperationSet> {
        let ids: Vec<i64> = role_ids.iter().map(|id| id.0).collect();
        let grants = self.source_grants(PrincipalKind::Role, &ids).await?;
        counter!("authority_resolutions_total", "scope" => "role").increment(1);
        self.materialize(vec![grants]).await
    }

    /// 解析一组组织自身授予的操作
    pub async fn resolve_organization_operations(
        &self,
        organization_ids: &[OrganizationId],
    ) -> AppResult<ResolvedOperationSet> {
        let ids: Vec<i64> = organization_ids.iter().map(|id| id.0).collect();
        let grants = self.source_grants(PrincipalKind::Organization, &ids).await?;
        counter!("authority_resolutions_total", "scope" => "organization").increment(1);
        self.materialize(vec![grants]).await
    }

    async fn organization_grants_of(&self, user_id: UserId) -> AppResult<SourceGrants> {
        let organizations = self.memberships.organizations_of_user(user_id).await?;
        let ids: Vec<i64> = organizations.iter().map(|id| id.0).collect();
        self.source_grants(PrincipalKind::Organization, &ids).await
    }

    async fn role_grants_of(&self, user_id: UserId) -> AppResult<SourceGrants> {
        let roles = self.memberships.roles_of_user(user_id).await?;
        let ids: Vec<i64> = roles.iter().map(|id| id.0).collect();
        self.source_grants(PrincipalKind::Role, &ids).await
    }

    /// 查询某一来源的菜单授权，再查询按钮授权
    async fn source_grants(&self, kind: PrincipalKind, principal_ids: &[i64]) -> AppResult<SourceGrants> {
        if principal_ids.is_empty() {
            return Ok(SourceGrants::empty(kind));
        }

        let menus = self
            .authorities
            .grants_for(kind, principal_ids, &AuthType::Menu)
            .await?;
        let buttons = self
            .authorities
            .grants_for(kind, principal_ids, &AuthType::Button)
            .await?;

        Ok(SourceGrants {
            source: kind,
            menus: menus.into_iter().map(|g| g.auth_id).collect(),
            buttons: buttons.into_iter().map(|g| g.auth_id).collect(),
        })
    }

    /// 将授权 ID 实体化为操作，并补齐祖先菜单以便重建树
    async fn materialize(&self, sources: Vec<SourceGrants>) -> AppResult<ResolvedOperationSet> {
        let mut set = ResolvedOperationSet::new();
        if sources.iter().all(SourceGrants::is_empty) {
            return Ok(set);
        }

        let catalog = load_catalog(self.operations.as_ref()).await?;
        let expanded: Vec<(PrincipalKind, Expansion)> = sources
            .iter()
            .map(|grants| (grants.source, expand_with_ancestors(&catalog, grants)))
            .collect();
        // 先合并全部授予项，再补祖先，祖先不会覆盖任何授予项的来源
        for (source, expansion) in &expanded {
            set.merge(*source, expansion.granted.iter().cloned());
        }
        for (source, expansion) in expanded {
            set.merge_implied(source, expansion.ancestors);
        }
        Ok(set)
    }
}

/// 某一来源实体化后的操作: 授予项与为组装树补入的祖先菜单
#[derive(Debug, Default)]
struct Expansion {
    granted: Vec<Operation>,
    ancestors: Vec<Operation>,
}

fn expand_with_ancestors(catalog: &OperationCatalog, grants: &SourceGrants) -> Expansion {
    let mut expansion = Expansion::default();
    let mut missing = 0usize;

    for &id in &grants.menus {
        match catalog.menu(id) {
            Some(menu) => {
                expansion.granted.push(menu.clone());
                expansion
                    .ancestors
                    .extend(catalog.menu_ancestors(menu.id).into_iter().cloned());
            }
            None => missing += 1,
        }
    }

    for &id in &grants.buttons {
        match catalog.button(id) {
            Some(button) => {
                expansion.granted.push(button.clone());
                if let Some(menu) = catalog.menu(button.parent_id) {
                    expansion.ancestors.push(menu.clone());
                    expansion
                        .ancestors
                        .extend(catalog.menu_ancestors(menu.id).into_iter().cloned());
                }
            }
            None => missing += 1,
        }
    }

    if missing > 0 {
        debug!(
            source = grants.source.as_str(),
            missing, "Grants reference operations absent from the catalog"
        );
    }
    expansion
}
