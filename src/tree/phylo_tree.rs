use serde::{Deserialize, Serialize};

pub type NodeId = usize;

/// One node of a genealogy: identity, observed multiplicity, branch length
/// to the parent, and links into the arena. Fields stay public so that
/// downstream renderers and annotators can read and amend them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhyloNode {
  pub name: String,
  pub sequence: String,
  pub frequency: usize,
  pub dist: f64,
  pub parent: Option<NodeId>,
  pub children: Vec<NodeId>,
}

/// Rooted tree stored as an arena of nodes addressed by `NodeId`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhyloTree {
  nodes: Vec<PhyloNode>,
  root: NodeId,
}

impl PhyloTree {
  /// Tree consisting of a single root node.
  pub fn with_root(name: impl Into<String>, sequence: impl Into<String>, frequency: usize) -> Self {
    let root = PhyloNode {
      name: name.into(),
      sequence: sequence.into(),
      frequency,
      dist: 0.0,
      parent: None,
      children: vec![],
    };
    Self {
      nodes: vec![root],
      root: 0,
    }
  }

  /// Append a new node below `parent` and return its id.
  pub fn add_child(
    &mut self,
    parent: NodeId,
    name: impl Into<String>,
    sequence: impl Into<String>,
    frequency: usize,
    dist: f64,
  ) -> NodeId {
    let id = self.nodes.len();
    self.nodes.push(PhyloNode {
      name: name.into(),
      sequence: sequence.into(),
      frequency,
      dist,
      parent: Some(parent),
      children: vec![],
    });
    self.nodes[parent].children.push(id);
    id
  }

  pub fn root(&self) -> NodeId {
    self.root
  }

  pub fn node(&self, id: NodeId) -> &PhyloNode {
    &self.nodes[id]
  }

  pub fn node_mut(&mut self, id: NodeId) -> &mut PhyloNode {
    &mut self.nodes[id]
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Node ids in preorder, root first, children in insertion order.
  pub fn preorder(&self) -> Vec<NodeId> {
    let mut order = Vec::with_capacity(self.nodes.len());
    let mut stack = vec![self.root];
    while let Some(id) = stack.pop() {
      order.push(id);
      stack.extend(self.node(id).children.iter().rev().copied());
    }
    order
  }

  /// Total observed multiplicity over all nodes.
  pub fn total_frequency(&self) -> usize {
    self.nodes.iter().map(|node| node.frequency).sum()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn sample_tree() -> PhyloTree {
    let mut tree = PhyloTree::with_root("root", "AAA", 2);
    let a = tree.add_child(tree.root(), "a", "AAT", 1, 1.0);
    tree.add_child(a, "aa", "ATT", 3, 2.0);
    tree.add_child(tree.root(), "b", "CAA", 4, 1.0);
    tree
  }

  #[test]
  fn test_preorder_visits_root_first_and_children_in_order() {
    let tree = sample_tree();
    let names: Vec<&str> = tree
      .preorder()
      .into_iter()
      .map(|id| tree.node(id).name.as_str())
      .collect();
    assert_eq!(names, vec!["root", "a", "aa", "b"]);
  }

  #[test]
  fn test_child_links_are_consistent() {
    let tree = sample_tree();
    for id in tree.preorder() {
      for &child in &tree.node(id).children {
        assert_eq!(tree.node(child).parent, Some(id));
      }
    }
    assert_eq!(tree.node(tree.root()).parent, None);
  }

  #[test]
  fn test_total_frequency_sums_all_nodes() {
    assert_eq!(sample_tree().total_frequency(), 10);
  }

  #[test]
  fn test_serde_round_trip_preserves_the_tree() {
    let tree = sample_tree();
    let json = serde_json::to_string(&tree).unwrap();
    let restored: PhyloTree = serde_json::from_str(&json).unwrap();
    assert_eq!(tree, restored);
  }
}
