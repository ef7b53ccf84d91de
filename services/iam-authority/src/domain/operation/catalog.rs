//! 操作目录快照
//!
//! 两次加载 (全部菜单、全部按钮) 后在内存中计算叶子菜单与祖先链

use std::collections::{HashMap, HashSet};

use cuba_common::OperationId;

use super::operation::{Operation, OperationType};
use super::tree::{build_operation_tree, OperationNode};

/// 操作目录
#[derive(Debug, Clone, Default)]
pub struct OperationCatalog {
    menus: Vec<Operation>,
    buttons: Vec<Operation>,
    menu_index: HashMap<OperationId, usize>,
    button_index: HashMap<OperationId, usize>,
    menu_parents: HashSet<OperationId>,
}

impl OperationCatalog {
    pub fn new(menus: Vec<Operation>, buttons: Vec<Operation>) -> Self {
        let menu_index = menus
            .iter()
            .enumerate()
            .map(|(pos, m)| (m.id, pos))
            .collect();
        let button_index = buttons
            .iter()
            .enumerate()
            .map(|(pos, b)| (b.id, pos))
            .collect();
        let menu_parents = menus
            .iter()
            .filter(|m| !m.is_root())
            .map(|m| m.parent_id)
            .collect();

        Self {
            menus,
            buttons,
            menu_index,
            button_index,
            menu_parents,
        }
    }

    pub fn menus(&self) -> &[Operation] {
        &self.menus
    }

    pub fn buttons(&self) -> &[Operation] {
        &self.buttons
    }

    pub fn is_empty(&self) -> bool {
        self.menus.is_empty() && self.buttons.is_empty()
    }

    pub fn get(&self, kind: OperationType, id: OperationId) -> Option<&Operation> {
        match kind {
            OperationType::Menu => self.menu_index.get(&id).map(|&pos| &self.menus[pos]),
            OperationType::Button => self.button_index.get(&id).map(|&pos| &self.buttons[pos]),
        }
    }

    pub fn menu(&self, id: OperationId) -> Option<&Operation> {
        self.get(OperationType::Menu, id)
    }

    pub fn button(&self, id: OperationId) -> Option<&Operation> {
        self.get(OperationType::Button, id)
    }

    /// 叶子菜单: 没有其他菜单以它为父
    pub fn is_leaf_menu(&self, id: OperationId) -> bool {
        self.menu_index.contains_key(&id) && !self.menu_parents.contains(&id)
    }

    /// 菜单的祖先链 (由近到远，不含自身)
    ///
    /// 链长以菜单总数为上限，遇到环时截断。
    pub fn menu_ancestors(&self, id: OperationId) -> Vec<&Operation> {
        let mut chain = Vec::new();
        let mut current = self.menu(id);
        while let Some(menu) = current {
            if menu.is_root() || chain.len() >= self.menus.len() {
                break;
            }
            current = self.menu(menu.parent_id);
            if let Some(parent) = current {
                chain.push(parent);
            }
        }
        chain
    }

    /// 完整操作树
    pub fn tree(&self) -> Vec<OperationNode> {
        build_operation_tree(self.menus.clone(), self.buttons.clone())
    }
}
