//! Structural edits on a [`FilterTree`]. Every function returns a new tree;
//! the input is never mutated.
//!
//! A path is a list of child indices from the root: `[]` is the root itself,
//! `[1, 0]` is the first child of the root's second child.

use super::ast::{FilterNode, FilterTree};
use super::serialize::to_query_string;

pub fn node_at<'t>(tree: &'t FilterTree, path: &[usize]) -> Option<&'t FilterNode> {
    let mut node = tree.root.as_ref()?;
    for &index in path {
        node = node.children().get(index)?;
    }
    Some(node)
}

/// Rebuilds the tree without the node at `path`. Groups left empty disappear;
/// non-negated groups left with one child are replaced by that child, and a
/// child group of the same kind is merged into its parent. An invalid path
/// returns the tree unchanged.
pub fn remove_at(tree: &FilterTree, path: &[usize]) -> FilterTree {
    if node_at(tree, path).is_none() {
        return tree.clone();
    }
    let root = tree.root.clone().and_then(|root| rebuild(root, path, None));
    derived(tree, root)
}

/// Rebuilds the tree with `replacement` at `path`.
pub fn replace_at(tree: &FilterTree, path: &[usize], replacement: FilterNode) -> FilterTree {
    if node_at(tree, path).is_none() {
        return tree.clone();
    }
    let root = tree
        .root
        .clone()
        .and_then(|root| rebuild(root, path, Some(replacement)));
    derived(tree, root)
}

fn rebuild(node: FilterNode, path: &[usize], replacement: Option<FilterNode>) -> Option<FilterNode> {
    let Some((&index, rest)) = path.split_first() else {
        return replacement;
    };

    match node {
        FilterNode::Group {
            kind,
            children,
            negated,
        } => {
            let children: Vec<FilterNode> = children
                .into_iter()
                .enumerate()
                .filter_map(|(i, child)| {
                    if i == index {
                        rebuild(child, rest, replacement.clone())
                    } else {
                        Some(child)
                    }
                })
                .collect();

            // same joining rules as the parser, so the edited tree is what
            // its own query string parses to
            let joined = FilterNode::join(kind, children)?;
            Some(if negated {
                FilterNode::negate(joined)
            } else {
                joined
            })
        }
        leaf => Some(leaf),
    }
}

fn derived(tree: &FilterTree, root: Option<FilterNode>) -> FilterTree {
    let original_query = root.as_ref().map(to_query_string).unwrap_or_default();
    log::debug!("tree edited: {:?} -> {:?}", tree.original_query, original_query);
    FilterTree {
        root,
        original_query,
        parse_errors: Vec::new(),
        parse_warnings: tree.parse_warnings.clone(),
    }
}
