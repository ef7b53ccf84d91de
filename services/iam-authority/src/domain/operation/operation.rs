//! 操作实体 (菜单 / 按钮)

use cuba_common::OperationId;
use serde::{Deserialize, Serialize};

/// 操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// 菜单 (容器节点)
    Menu,
    /// 按钮 (叶子动作)
    Button,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Menu => "menu",
            OperationType::Button => "button",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "menu" => Ok(OperationType::Menu),
            "button" => Ok(OperationType::Button),
            _ => Err(format!("Unknown operation type: {}", s)),
        }
    }
}

/// 操作实体
///
/// 操作目录中的一个节点。`parent_id` 为 [`OperationId::ROOT`] 时为顶层节点。
/// 本模块只读取与组合操作，不修改它们。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    /// 父节点 ID (fid)
    pub parent_id: OperationId,
    pub title: String,
    pub name: String,
    /// 自由分类标签，仅作展示用元数据
    pub tags: String,
    /// 排序键 (升序)
    pub sort: i32,
    pub kind: OperationType,
}

impl Operation {
    pub fn menu(id: i64, parent_id: i64, name: impl Into<String>) -> Self {
        Self::new(OperationType::Menu, id, parent_id, name)
    }

    pub fn button(id: i64, parent_id: i64, name: impl Into<String>) -> Self {
        Self::new(OperationType::Button, id, parent_id, name)
    }

    fn new(kind: OperationType, id: i64, parent_id: i64, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: OperationId(id),
            parent_id: OperationId(parent_id),
            title: name.clone(),
            name,
            tags: String::new(),
            sort: 0,
            kind,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_sort(mut self, sort: i32) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = tags.into();
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_root()
    }

    pub fn is_menu(&self) -> bool {
        self.kind == OperationType::Menu
    }

    pub fn is_button(&self) -> bool {
        self.kind == OperationType::Button
    }

    /// 去重键 "{type}:{id}"
    pub fn key(&self) -> String {
        operation_key(self.kind, self.id)
    }
}

/// 构造去重键 "{type}:{id}"
pub fn operation_key(kind: OperationType, id: OperationId) -> String {
    format!("{}:{}", kind, id)
}

/// 排序比较: sort 升序，其次 id 升序
pub fn display_order(a: &Operation, b: &Operation) -> std::cmp::Ordering {
    a.sort.cmp(&b.sort).then(a.id.cmp(&b.id))
}
