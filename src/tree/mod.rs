pub mod collapse;
pub mod collapsed_tree;
pub mod phylo_tree;
