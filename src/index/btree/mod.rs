pub mod error;
pub mod iterator;
pub mod key;
pub mod node;
pub mod tree;

pub use error::BTreeError;
pub use iterator::BPlusTreeIterator;
pub use key::{IndexKey, IndexValue, KeyComparator, OrdComparator};
pub use node::{BTreeNode, InternalNode, LeafNode};
pub use tree::BPlusTree;
