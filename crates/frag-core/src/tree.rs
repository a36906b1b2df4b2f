//! Flat file map -> nested tree for fragment explorers

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::FileMap;

/// A node in a fragment's file tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeItem {
    File(String),
    Dir(String, Vec<TreeItem>),
}

#[derive(Default)]
struct Node {
    children: BTreeMap<String, Option<Node>>,
}

/// Convert `{"src/a.tsx": .., "main.tsx": ..}` into `[Dir("src", [File("a.tsx")]), File("main.tsx")]`
///
/// Siblings come out in path order.
pub fn file_tree(files: &FileMap) -> Vec<TreeItem> {
    let mut root = Node::default();

    for path in files.keys() {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let Some((file_name, dirs)) = parts.split_last() else {
            continue;
        };

        let mut current = &mut root;
        for dir in dirs {
            current = current
                .children
                .entry((*dir).to_string())
                .or_insert_with(|| Some(Node::default()))
                .get_or_insert_with(Node::default);
        }
        current
            .children
            .entry((*file_name).to_string())
            .or_insert(None);
    }

    convert(root)
}

fn convert(node: Node) -> Vec<TreeItem> {
    node.children
        .into_iter()
        .map(|(name, child)| match child {
            None => TreeItem::File(name),
            Some(dir) => TreeItem::Dir(name, convert(dir)),
        })
        .collect()
}
