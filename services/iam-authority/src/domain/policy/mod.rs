//! 执行引擎策略领域模块

pub mod hierarchy;
pub mod repository;
pub mod rule;

pub use hierarchy::{adjacent_group_rules, parse_materialized_path, OrganizationHierarchy};
pub use repository::{PolicyRuleRepository, RouteBindingRepository};
pub use rule::{GroupRule, PolicyRule, PolicySubject, RouteBinding};
