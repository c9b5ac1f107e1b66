use crate::tree::phylo_tree::{NodeId, PhyloTree};
use itertools::Itertools;
use log::warn;

/// Rebuild `tree` with every zero-length edge below the root merged away:
/// the child's frequency moves to its parent and the grandchildren are
/// reattached in the child's place. Chains of zero-length edges collapse
/// transitively. Total frequency mass is conserved.
pub fn collapse_zero_edges(tree: &PhyloTree) -> PhyloTree {
  let root = tree.node(tree.root());
  let mut out = PhyloTree::with_root(root.name.clone(), root.sequence.clone(), root.frequency);

  // pairs of (source node, parent in the output tree), pushed in reverse so
  // that siblings pop in their original order
  let mut stack: Vec<(NodeId, NodeId)> = root.children.iter().rev().map(|&child| (child, out.root())).collect();
  while let Some((src_id, dst_parent)) = stack.pop() {
    let src = tree.node(src_id);
    if src.dist == 0.0 {
      out.node_mut(dst_parent).frequency += src.frequency;
      stack.extend(src.children.iter().rev().map(|&child| (child, dst_parent)));
    } else {
      let dst = out.add_child(
        dst_parent,
        src.name.clone(),
        src.sequence.clone(),
        src.frequency,
        src.dist,
      );
      stack.extend(src.children.iter().rev().map(|&child| (child, dst)));
    }
  }

  assert_eq!(
    tree.total_frequency(),
    out.total_frequency(),
    "collapsing zero-length edges must conserve total frequency"
  );

  let sequences = out
    .preorder()
    .into_iter()
    .map(|id| out.node(id).sequence.as_str())
    .filter(|sequence| !sequence.is_empty())
    .collect_vec();
  if sequences.iter().unique().count() != sequences.len() {
    warn!("repeated sequences in collapsed tree, possible backmutation");
  }

  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use rand::Rng;

  #[test]
  fn test_zero_length_child_merges_into_its_parent() {
    let mut tree = PhyloTree::with_root("root", "AAA", 2);
    tree.add_child(tree.root(), "child", "AAA", 1, 0.0);
    let collapsed = collapse_zero_edges(&tree);
    assert_eq!(collapsed.len(), 1);
    assert_eq!(collapsed.node(collapsed.root()).frequency, 3);
    assert!(collapsed.node(collapsed.root()).children.is_empty());
  }

  #[test]
  fn test_grandchildren_are_spliced_into_the_childs_position() {
    let mut tree = PhyloTree::with_root("root", "AAA", 1);
    tree.add_child(tree.root(), "x", "AAC", 1, 1.0);
    let z = tree.add_child(tree.root(), "z", "AAA", 2, 0.0);
    tree.add_child(z, "g1", "AAG", 1, 3.0);
    tree.add_child(z, "g2", "AGG", 1, 1.0);
    tree.add_child(tree.root(), "y", "AAT", 1, 1.0);

    let collapsed = collapse_zero_edges(&tree);
    let root = collapsed.node(collapsed.root());
    assert_eq!(root.frequency, 3);
    let names: Vec<&str> = root
      .children
      .iter()
      .map(|&child| collapsed.node(child).name.as_str())
      .collect();
    assert_eq!(names, vec!["x", "g1", "g2", "y"]);
    let g1 = collapsed.node(root.children[1]);
    assert_eq!((g1.dist, g1.parent), (3.0, Some(collapsed.root())));
  }

  #[test]
  fn test_chains_of_zero_length_edges_collapse_transitively() {
    let mut tree = PhyloTree::with_root("root", "AAA", 1);
    let a = tree.add_child(tree.root(), "a", "AAA", 2, 0.0);
    let b = tree.add_child(a, "b", "AAA", 4, 0.0);
    tree.add_child(b, "c", "ACA", 8, 2.0);
    let collapsed = collapse_zero_edges(&tree);
    assert_eq!(collapsed.len(), 2);
    assert_eq!(collapsed.node(collapsed.root()).frequency, 7);
    assert_eq!(collapsed.total_frequency(), 15);
  }

  #[test]
  fn test_trees_without_zero_length_edges_are_unchanged() {
    let mut tree = PhyloTree::with_root("root", "AAA", 1);
    let a = tree.add_child(tree.root(), "a", "AAT", 2, 1.0);
    tree.add_child(a, "b", "ATT", 3, 2.0);
    let collapsed = collapse_zero_edges(&tree);
    assert_eq!(collapsed, tree);
  }

  #[test]
  fn test_collapse_conserves_mass_on_random_trees() {
    let mut rng = crate::utils::random::get_random_number_generator(Some(31));
    for _ in 0..20 {
      let mut tree = PhyloTree::with_root("root", "", rng.gen_range(0..4));
      for _ in 0..50 {
        let parent = rng.gen_range(0..tree.len());
        let dist = if rng.gen::<f64>() < 0.4 { 0.0 } else { 1.0 };
        tree.add_child(parent, "", "", rng.gen_range(0..4), dist);
      }
      let collapsed = collapse_zero_edges(&tree);
      assert_eq!(collapsed.total_frequency(), tree.total_frequency());
    }
  }
}
