pub mod forest;
pub mod likelihood;
pub mod model;
pub mod optimize;
pub mod tree;
pub mod utils;
