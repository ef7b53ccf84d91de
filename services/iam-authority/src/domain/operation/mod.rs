//! 操作目录领域模块

#![allow(clippy::module_inception)]

pub mod catalog;
pub mod operation;
pub mod repository;
pub mod tree;

pub use catalog::OperationCatalog;
pub use operation::{display_order, operation_key, Operation, OperationType};
pub use repository::OperationRepository;
pub use tree::{attach_children, build_forest, build_operation_tree, flatten_preorder, OperationNode};
