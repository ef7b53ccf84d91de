//! 授权领域模块

pub mod grant;
pub mod repository;

pub use grant::{AuthType, AuthorityGrant, ExtendedAuthType, Principal, PrincipalKind};
pub use repository::AuthorityRepository;
