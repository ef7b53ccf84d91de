//! 组织层级与物化路径

use async_trait::async_trait;
use cuba_common::OrganizationId;
use cuba_errors::AppResult;

use super::rule::GroupRule;

/// 组织层级查询接口
#[async_trait]
pub trait OrganizationHierarchy: Send + Sync {
    /// 组织的祖先路径，由近到远 (不含自身)；组织不存在时返回 NotFound
    async fn ancestor_path_of(&self, organization_id: OrganizationId)
        -> AppResult<Vec<OrganizationId>>;
}

/// 解析物化路径
///
/// 路径按根到自身的顺序存储 (如 "1/4/9")，分隔符可为 `/`、`,` 或 `.`，
/// 空段被忽略。返回不含自身的祖先，由近到远。
pub fn parse_materialized_path(
    path: &str,
    organization_id: OrganizationId,
) -> Result<Vec<OrganizationId>, String> {
    let mut chain = Vec::new();
    for segment in path.split(['/', ',', '.']) {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let id: i64 = segment
            .parse()
            .map_err(|_| format!("Invalid organization path segment: {}", segment))?;
        chain.push(OrganizationId(id));
    }

    if chain.last() == Some(&organization_id) {
        chain.pop();
    }
    chain.reverse();
    Ok(chain)
}

/// 由祖先路径生成相邻的 g 规则，根端在前
///
/// 只生成相邻对，传递闭包由执行引擎自行计算
pub fn adjacent_group_rules(
    organization_id: OrganizationId,
    ancestors_nearest_first: &[OrganizationId],
) -> Vec<GroupRule> {
    let chain: Vec<OrganizationId> = ancestors_nearest_first
        .iter()
        .rev()
        .copied()
        .chain(std::iter::once(organization_id))
        .collect();

    chain
        .windows(2)
        .filter(|pair| pair[0] != pair[1])
        .map(|pair| GroupRule::new(pair[1], pair[0]))
        .collect()
}
