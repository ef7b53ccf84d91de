//! 操作树构建
//!
//! 纯内存计算: 扁平的菜单/按钮列表 -> 嵌套森林。
//! 兄弟节点保持输入顺序，构建过程不重新排序；调用方负责按 (sort, id) 预排序。
//! 不做环检测: 环上的节点无法从任何根节点到达，因此不会出现在结果中。

use std::collections::HashMap;

use cuba_common::OperationId;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::operation::Operation;

/// 树节点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationNode {
    #[serde(flatten)]
    pub operation: Operation,
    /// 是否为叶子菜单 (没有子菜单)；按钮恒为 true
    pub leaf: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<OperationNode>,
}

impl OperationNode {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            leaf: true,
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> OperationId {
        self.operation.id
    }
}

impl From<Operation> for OperationNode {
    fn from(operation: Operation) -> Self {
        Self::new(operation)
    }
}

/// 将按钮挂到其父菜单下
///
/// 父 ID 不匹配任何菜单的按钮被静默丢弃。
pub fn attach_children(mut menus: Vec<OperationNode>, buttons: Vec<Operation>) -> Vec<OperationNode> {
    let mut index: HashMap<OperationId, usize> = HashMap::with_capacity(menus.len());
    for (pos, menu) in menus.iter().enumerate() {
        index.entry(menu.id()).or_insert(pos);
    }

    let mut dropped = 0usize;
    for button in buttons {
        match index.get(&button.parent_id) {
            Some(&pos) => menus[pos].children.push(OperationNode::new(button)),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!(dropped, "Buttons without a matching menu were excluded");
    }

    menus
}

/// 构建森林
///
/// 父节点为根哨兵的节点成为顶层节点；其余挂到父节点下。
/// 父节点不在输入集合中的节点 (及其后代) 被过滤。
pub fn build_forest(nodes: Vec<OperationNode>) -> Vec<OperationNode> {
    let mut index: HashMap<OperationId, usize> = HashMap::with_capacity(nodes.len());
    for (pos, node) in nodes.iter().enumerate() {
        index.entry(node.id()).or_insert(pos);
    }

    let mut roots = Vec::new();
    let mut children_of: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut orphans = 0usize;

    for (pos, node) in nodes.iter().enumerate() {
        if node.operation.is_root() {
            roots.push(pos);
            continue;
        }
        match index.get(&node.operation.parent_id) {
            Some(&parent) if parent != pos => children_of[parent].push(pos),
            _ => orphans += 1,
        }
    }

    if orphans > 0 {
        debug!(orphans, "Operations with an unresolved parent were filtered out");
    }

    let mut slots: Vec<Option<OperationNode>> = nodes.into_iter().map(Some).collect();
    roots
        .into_iter()
        .filter_map(|pos| assemble(pos, &mut slots, &children_of))
        .collect()
}

fn assemble(
    pos: usize,
    slots: &mut [Option<OperationNode>],
    children_of: &[Vec<usize>],
) -> Option<OperationNode> {
    let mut node = slots[pos].take()?;

    let mut submenus = Vec::with_capacity(children_of[pos].len());
    for &child in &children_of[pos] {
        if let Some(child_node) = assemble(child, slots, children_of) {
            submenus.push(child_node);
        }
    }

    node.leaf = submenus.is_empty() || node.operation.is_button();
    if !submenus.is_empty() {
        // 子菜单在前，已挂载的按钮在后
        submenus.append(&mut node.children);
        node.children = submenus;
    }
    Some(node)
}

/// 前序遍历展开
pub fn flatten_preorder(forest: &[OperationNode]) -> Vec<&Operation> {
    let mut out = Vec::new();
    let mut stack: Vec<&OperationNode> = forest.iter().rev().collect();
    while let Some(node) = stack.pop() {
        out.push(&node.operation);
        stack.extend(node.children.iter().rev());
    }
    out
}

/// 由扁平的菜单与按钮构建完整的操作树
pub fn build_operation_tree(menus: Vec<Operation>, buttons: Vec<Operation>) -> Vec<OperationNode> {
    let menus = menus.into_iter().map(OperationNode::new).collect();
    build_forest(attach_children(menus, buttons))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(forest: &[OperationNode]) -> Vec<i64> {
        forest.iter().map(|n| n.id().0).collect()
    }

    #[test]
    fn test_attach_children_drops_unmatched() {
        let menus = vec![
            OperationNode::new(Operation::menu(1, 0, "system")),
            OperationNode::new(Operation::menu(2, 0, "report")),
        ];
        let buttons = vec![
            Operation::button(10, 1, "add"),
            Operation::button(11, 99, "ghost"),
            Operation::button(12, 2, "export"),
        ];

        let menus = attach_children(menus, buttons);
        assert_eq!(ids(&menus[0].children), vec![10]);
        assert_eq!(ids(&menus[1].children), vec![12]);
    }

    #[test]
    fn test_build_forest_nests_and_preserves_order() {
        let nodes = vec![
            Operation::menu(3, 1, "users").with_sort(2),
            Operation::menu(1, 0, "system"),
            Operation::menu(4, 1, "roles").with_sort(1),
            Operation::menu(2, 0, "report"),
        ]
        .into_iter()
        .map(OperationNode::new)
        .collect();

        let forest = build_forest(nodes);
        assert_eq!(ids(&forest), vec![1, 2]);
        // 输入顺序保留: 3 在 4 之前，即使 sort 更大
        assert_eq!(ids(&forest[0].children), vec![3, 4]);
        assert!(!forest[0].leaf);
        assert!(forest[1].leaf);
    }

    #[test]
    fn test_build_forest_filters_orphans_and_descendants() {
        let nodes = vec![
            Operation::menu(1, 0, "system"),
            Operation::menu(5, 42, "orphan"),
            Operation::menu(6, 5, "orphan-child"),
        ]
        .into_iter()
        .map(OperationNode::new)
        .collect();

        let forest = build_forest(nodes);
        let flat: Vec<i64> = flatten_preorder(&forest).iter().map(|o| o.id.0).collect();
        assert_eq!(flat, vec![1]);
    }

    #[test]
    fn test_build_forest_ignores_cycles() {
        let nodes = vec![
            Operation::menu(1, 0, "system"),
            Operation::menu(7, 8, "a"),
            Operation::menu(8, 7, "b"),
            Operation::menu(9, 9, "self"),
        ]
        .into_iter()
        .map(OperationNode::new)
        .collect();

        let forest = build_forest(nodes);
        assert_eq!(flatten_preorder(&forest).len(), 1);
    }

    #[test]
    fn test_submenus_precede_buttons() {
        let forest = build_operation_tree(
            vec![Operation::menu(1, 0, "system"), Operation::menu(2, 1, "users")],
            vec![Operation::button(10, 1, "refresh"), Operation::button(11, 2, "add")],
        );

        assert_eq!(ids(&forest[0].children), vec![2, 10]);
        assert_eq!(ids(&forest[0].children[0].children), vec![11]);
        // 只有按钮的菜单仍是叶子菜单
        assert!(forest[0].children[0].leaf);
    }

    #[test]
    fn test_flatten_preorder() {
        let forest = build_operation_tree(
            vec![
                Operation::menu(1, 0, "a"),
                Operation::menu(2, 1, "b"),
                Operation::menu(3, 0, "c"),
            ],
            vec![Operation::button(4, 2, "x")],
        );
        let flat: Vec<i64> = flatten_preorder(&forest).iter().map(|o| o.id.0).collect();
        assert_eq!(flat, vec![1, 2, 4, 3]);
    }

    /// 随机无环森林: 每个节点的父节点取自前面的节点或根
    fn acyclic_menus() -> impl Strategy<Value = Vec<Operation>> {
        prop::collection::vec(any::<prop::sample::Index>(), 0..40).prop_map(|picks| {
            let mut menus: Vec<Operation> = Vec::with_capacity(picks.len());
            for (i, pick) in picks.iter().enumerate() {
                let id = i as i64 + 1;
                let parent = if i == 0 || pick.index(3) == 0 {
                    0
                } else {
                    pick.index(i) as i64 + 1
                };
                menus.push(Operation::menu(id, parent, format!("m{}", id)));
            }
            menus
        })
    }

    proptest! {
        /// 前序展开恰好包含全部输入节点，各一次
        #[test]
        fn forest_preserves_node_set(mut menus in acyclic_menus(), seed in any::<u64>()) {
            // 打乱输入顺序，子节点可能先于父节点出现
            let len = menus.len();
            if len > 1 {
                menus.rotate_left((seed as usize) % len);
            }
            let input: Vec<i64> = menus.iter().map(|m| m.id.0).collect();

            let forest = build_forest(menus.into_iter().map(OperationNode::new).collect());
            let mut flat: Vec<i64> = flatten_preorder(&forest).iter().map(|o| o.id.0).collect();
            let mut expected = input.clone();
            flat.sort_unstable();
            expected.sort_unstable();
            prop_assert_eq!(flat, expected);
        }

        /// 挂载的按钮数不超过输入按钮数，全部可解析时相等
        #[test]
        fn attach_children_bounded(menu_count in 1i64..10, parents in prop::collection::vec(0i64..20, 0..30)) {
            let menus: Vec<OperationNode> = (1..=menu_count)
                .map(|id| OperationNode::new(Operation::menu(id, 0, "m")))
                .collect();
            let buttons: Vec<Operation> = parents
                .iter()
                .enumerate()
                .map(|(i, &p)| Operation::button(1000 + i as i64, p, "b"))
                .collect();
            let resolvable = parents.iter().filter(|&&p| p >= 1 && p <= menu_count).count();

            let attached: usize = attach_children(menus, buttons)
                .iter()
                .map(|m| m.children.len())
                .sum();
            prop_assert!(attached <= parents.len());
            prop_assert_eq!(attached, resolvable);
            prop_assert_eq!(attached == parents.len(), resolvable == parents.len());
        }
    }
}
