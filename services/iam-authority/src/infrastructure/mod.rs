//! 基础设施层

pub mod memory;
pub mod persistence;

pub use memory::InMemoryAuthorityStore;
pub use persistence::{connect_authority_service, connect_postgres_stores, postgres_stores};
