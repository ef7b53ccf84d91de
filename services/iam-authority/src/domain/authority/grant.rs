//! 授权记录实体

use chrono::{DateTime, Utc};
use cuba_common::{OperationId, OrganizationId, RoleId, UserId};
use serde::{Deserialize, Serialize};

use crate::domain::operation::OperationType;

/// 授权类型
///
/// 开放集合: 除 menu / button 外允许扩展类型，统一以小写字符串存储。
/// 扩展类型只能经 `str::parse` 构造。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum AuthType {
    Menu,
    Button,
    Other(ExtendedAuthType),
}

/// 扩展授权类型名: 已去空白、小写，且不与 menu / button 重名
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtendedAuthType(String);

impl ExtendedAuthType {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AuthType {
    pub fn as_str(&self) -> &str {
        match self {
            AuthType::Menu => "menu",
            AuthType::Button => "button",
            AuthType::Other(name) => name.as_str(),
        }
    }

    /// 对应的操作类型 (扩展类型没有对应的操作目录)
    pub fn operation_type(&self) -> Option<OperationType> {
        match self {
            AuthType::Menu => Some(OperationType::Menu),
            AuthType::Button => Some(OperationType::Button),
            AuthType::Other(_) => None,
        }
    }

    pub fn is_button(&self) -> bool {
        matches!(self, AuthType::Button)
    }
}

impl From<OperationType> for AuthType {
    fn from(kind: OperationType) -> Self {
        match kind {
            OperationType::Menu => AuthType::Menu,
            OperationType::Button => AuthType::Button,
        }
    }
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuthType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        match normalized.as_str() {
            "" => Err("Auth type must not be empty".to_string()),
            "menu" => Ok(AuthType::Menu),
            "button" => Ok(AuthType::Button),
            _ => Ok(AuthType::Other(ExtendedAuthType(normalized))),
        }
    }
}

impl From<AuthType> for String {
    fn from(auth_type: AuthType) -> Self {
        auth_type.as_str().to_string()
    }
}

impl TryFrom<String> for AuthType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// 主体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    Organization,
    Role,
    User,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalKind::Organization => "organization",
            PrincipalKind::Role => "role",
            PrincipalKind::User => "user",
        }
    }

    /// 授权表名
    pub fn authority_table(&self) -> &'static str {
        match self {
            PrincipalKind::Organization => "organization_authorities",
            PrincipalKind::Role => "role_authorities",
            PrincipalKind::User => "user_authorities",
        }
    }
}

impl std::fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PrincipalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "organization" | "org" => Ok(PrincipalKind::Organization),
            "role" => Ok(PrincipalKind::Role),
            "user" => Ok(PrincipalKind::User),
            _ => Err(format!("Unknown principal kind: {}", s)),
        }
    }
}

/// 授权主体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Principal {
    Organization(OrganizationId),
    Role(RoleId),
    User(UserId),
}

impl Principal {
    pub fn from_parts(kind: PrincipalKind, id: i64) -> Self {
        match kind {
            PrincipalKind::Organization => Principal::Organization(OrganizationId(id)),
            PrincipalKind::Role => Principal::Role(RoleId(id)),
            PrincipalKind::User => Principal::User(UserId(id)),
        }
    }

    pub fn kind(&self) -> PrincipalKind {
        match self {
            Principal::Organization(_) => PrincipalKind::Organization,
            Principal::Role(_) => PrincipalKind::Role,
            Principal::User(_) => PrincipalKind::User,
        }
    }

    pub fn raw_id(&self) -> i64 {
        match self {
            Principal::Organization(id) => id.0,
            Principal::Role(id) => id.0,
            Principal::User(id) => id.0,
        }
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.raw_id())
    }
}

impl From<RoleId> for Principal {
    fn from(id: RoleId) -> Self {
        Principal::Role(id)
    }
}

impl From<UserId> for Principal {
    fn from(id: UserId) -> Self {
        Principal::User(id)
    }
}

impl From<OrganizationId> for Principal {
    fn from(id: OrganizationId) -> Self {
        Principal::Organization(id)
    }
}

/// 授权记录
///
/// (principal, auth_type, auth_id) 在同一主体类型内唯一；status = 1 为有效
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityGrant {
    pub principal: Principal,
    pub auth_type: AuthType,
    pub auth_id: OperationId,
    pub status: i16,
    pub created_at: DateTime<Utc>,
}

impl AuthorityGrant {
    pub const STATUS_ACTIVE: i16 = 1;
    pub const STATUS_INACTIVE: i16 = 0;

    pub fn active(principal: Principal, auth_type: AuthType, auth_id: OperationId) -> Self {
        Self {
            principal,
            auth_type,
            auth_id,
            status: Self::STATUS_ACTIVE,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == Self::STATUS_ACTIVE
    }
}
