//! 通用类型定义
//!
//! 平台内主体 (用户/角色/组织) 与操作目录节点均使用 BIGINT 主键

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// 用户 ID
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From,
)]
#[display("{_0}")]
pub struct UserId(pub i64);

/// 角色 ID
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From,
)]
#[display("{_0}")]
pub struct RoleId(pub i64);

/// 组织 ID
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From,
)]
#[display("{_0}")]
pub struct OrganizationId(pub i64);

/// 操作 (菜单/按钮) ID
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From,
)]
#[display("{_0}")]
pub struct OperationId(pub i64);

impl OperationId {
    /// 根节点哨兵: parent_id 为 0 表示顶层
    pub const ROOT: OperationId = OperationId(0);

    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::ROOT
    }
}

macro_rules! impl_from_str {
    ($($ty:ident),*) => {
        $(
            impl std::str::FromStr for $ty {
                type Err = std::num::ParseIntError;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    Ok(Self(s.trim().parse()?))
                }
            }
        )*
    };
}

impl_from_str!(UserId, RoleId, OrganizationId, OperationId);
