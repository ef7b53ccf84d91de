//! iam-authority - 菜单/按钮授权解析与执行规则同步
//!
//! - 操作目录 (菜单、按钮) 的树形组装
//! - 组织/角色/用户三类授权的存储与合并解析
//! - 按钮授权到执行引擎 p/g 规则的合成

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use application::{AuthorityResolver, AuthorityService, AuthorityStores, PolicySynthesizer};
pub use error::AuthorityError;

/// 数据库迁移
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
