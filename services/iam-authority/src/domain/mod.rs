//! 领域层

pub mod authority;
pub mod membership;
pub mod operation;
pub mod policy;

pub use membership::MembershipDirectory;
