//! Binary search tree whose nodes live in a [`Repository`].
//!
//! Child links are [`Handle`]s created null, and a new node is attached by
//! retargeting the null child slot, so every copy of that child handle
//! (including the one stored in the parent) sees the node.

use dynamic_memory::{Handle, Repository, RepositoryError};
use std::cmp::Ordering;
use std::fmt;
use tracing::trace;

/// A tree node. Equality is structural, through the handles' value equality.
#[derive(Debug, PartialEq)]
pub struct Node {
    pub value: usize,
    pub left: Handle<Node>,
    pub right: Handle<Node>,
}

impl Node {
    /// A leaf with two fresh null children.
    pub fn new(value: usize, repo: &Repository<Node>) -> Self {
        Self {
            value,
            left: repo.create_null(),
            right: repo.create_null(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// A tree rooted at one handle.
pub struct SearchTree<'r> {
    repo: &'r Repository<Node>,
    root: Handle<Node>,
}

enum Step {
    Attach,
    Advance,
    Descend(Handle<Node>),
}

impl<'r> SearchTree<'r> {
    /// An empty tree; the root is a null handle.
    pub fn new(repo: &'r Repository<Node>) -> Self {
        Self {
            repo,
            root: repo.create_null(),
        }
    }

    pub fn root(&self) -> &Handle<Node> {
        &self.root
    }

    /// Write `keys` down one path of the tree.
    ///
    /// Starting at the root, each key is compared against the current node:
    /// smaller keys descend left, larger keys descend right, and an equal key
    /// is consumed in place. A key reaching a null child is attached there and
    /// the following keys continue from the new node.
    pub fn insert_path(&self, keys: &[usize]) -> Result<(), RepositoryError> {
        let mut cursor = self.root.clone();
        let mut keys = keys;

        while let Some((&key, rest)) = keys.split_first() {
            let step = match cursor.get() {
                None => Step::Attach,
                Some(node) => match key.cmp(&node.value) {
                    Ordering::Equal => Step::Advance,
                    Ordering::Less => Step::Descend(node.left.clone()),
                    Ordering::Greater => Step::Descend(node.right.clone()),
                },
            };

            match step {
                Step::Attach => {
                    self.repo
                        .replace_with(&cursor, Node::new(key, self.repo))?;
                    trace!(key, slot = %cursor.slot(), "attached node");
                    keys = rest;
                }
                Step::Advance => keys = rest,
                Step::Descend(child) => cursor = child,
            }
        }

        Ok(())
    }

    /// Returns true if `key` is reachable by ordinary search from the root.
    pub fn contains(&self, key: usize) -> bool {
        let mut cursor = self.root.clone();
        loop {
            let next = match cursor.get() {
                None => return false,
                Some(node) => match key.cmp(&node.value) {
                    Ordering::Equal => return true,
                    Ordering::Less => node.left.clone(),
                    Ordering::Greater => node.right.clone(),
                },
            };
            cursor = next;
        }
    }

    /// Keys in left-root-right order.
    pub fn in_order(&self) -> Vec<usize> {
        let mut out = Vec::new();
        collect_in_order(&self.root, &mut out);
        out
    }

    /// One line per node, pre-order, indented by two dots per level.
    pub fn render(&self) -> String {
        let mut out = String::new();
        render_into(&self.root, 0, &mut out);
        out
    }
}

fn collect_in_order(handle: &Handle<Node>, out: &mut Vec<usize>) {
    if let Some(node) = handle.get() {
        collect_in_order(&node.left, out);
        out.push(node.value);
        collect_in_order(&node.right, out);
    }
}

fn render_into(handle: &Handle<Node>, depth: usize, out: &mut String) {
    let Some(node) = handle.get() else { return };
    out.push_str(&".".repeat(depth * 2));
    out.push_str(&node.value.to_string());
    out.push('\n');
    render_into(&node.left, depth + 1, out);
    render_into(&node.right, depth + 1, out);
}
