//! 操作目录仓储接口

use async_trait::async_trait;
use cuba_common::OperationId;
use cuba_errors::AppResult;

use super::operation::{Operation, OperationType};

/// 操作目录仓储接口 (只读)
#[async_trait]
pub trait OperationRepository: Send + Sync {
    /// 列出全部菜单，按 (sort, id) 升序
    async fn list_menus(&self) -> AppResult<Vec<Operation>>;

    /// 列出全部按钮，按 (sort, id) 升序
    async fn list_buttons(&self) -> AppResult<Vec<Operation>>;

    /// 根据类型与 ID 查找操作 (菜单与按钮的 ID 空间相互独立)
    async fn find(&self, kind: OperationType, id: OperationId) -> AppResult<Option<Operation>>;
}
