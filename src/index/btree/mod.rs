pub mod context;
pub mod error;
pub mod index;
pub mod node;
pub mod serialization;

pub use error::BTreeError;
pub use index::{BTreeIndex, BTreeLeafIterator};
pub use node::{BTreeNode, NodeType};
