//! 执行引擎规则

use cuba_common::{OperationId, OrganizationId, RoleId};
use serde::{Deserialize, Serialize};

use crate::domain::authority::Principal;

/// 规则主体 (角色或组织)
///
/// 渲染为 "role:{id}" / "org:{id}"，避免角色与组织 ID 在规则表中冲突
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicySubject {
    Role(RoleId),
    Organization(OrganizationId),
}

impl PolicySubject {
    /// 用户主体不直接产生执行规则
    pub fn from_principal(principal: Principal) -> Option<Self> {
        match principal {
            Principal::Role(id) => Some(PolicySubject::Role(id)),
            Principal::Organization(id) => Some(PolicySubject::Organization(id)),
            Principal::User(_) => None,
        }
    }

    pub fn principal(&self) -> Principal {
        match *self {
            PolicySubject::Role(id) => Principal::Role(id),
            PolicySubject::Organization(id) => Principal::Organization(id),
        }
    }
}

impl std::fmt::Display for PolicySubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicySubject::Role(id) => write!(f, "role:{}", id),
            PolicySubject::Organization(id) => write!(f, "org:{}", id),
        }
    }
}

/// p 规则: subject 可以对 object (路径) 执行 action (HTTP 方法)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
    pub subject: PolicySubject,
    pub object: String,
    pub action: String,
}

impl PolicyRule {
    pub const PTYPE: &'static str = "p";

    pub fn new(subject: PolicySubject, binding: &RouteBinding) -> Self {
        Self {
            subject,
            object: binding.path.clone(),
            action: binding.method.clone(),
        }
    }
}

impl std::fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p, {}, {}, {}", self.subject, self.object, self.action)
    }
}

/// g 规则: child 继承 parent 的全部授权
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupRule {
    pub child: OrganizationId,
    pub parent: OrganizationId,
}

impl GroupRule {
    pub const PTYPE: &'static str = "g";

    pub fn new(child: OrganizationId, parent: OrganizationId) -> Self {
        Self { child, parent }
    }

    pub fn child_subject(&self) -> PolicySubject {
        PolicySubject::Organization(self.child)
    }

    pub fn parent_subject(&self) -> PolicySubject {
        PolicySubject::Organization(self.parent)
    }
}

impl std::fmt::Display for GroupRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g, {}, {}", self.child_subject(), self.parent_subject())
    }
}

/// 按钮绑定的接口路由
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteBinding {
    pub button_id: OperationId,
    pub path: String,
    /// HTTP 方法 (大写)
    pub method: String,
}

impl RouteBinding {
    pub fn new(button_id: OperationId, path: impl Into<String>, method: impl AsRef<str>) -> Self {
        Self {
            button_id,
            path: path.into(),
            method: method.as_ref().to_uppercase(),
        }
    }

    /// 同一路由 (path + method)
    pub fn same_route(&self, other: &RouteBinding) -> bool {
        self.path == other.path && self.method == other.method
    }
}
