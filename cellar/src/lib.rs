mod allocator;
mod arena;
mod bytearrays;
mod cell;
mod collector;
mod context;
mod dict;
mod error;
mod iterators;
mod list;
mod lock;
mod mutables;
mod objects;
mod set;
mod space;
mod sparse_list;
mod system;
pub mod tagged;
mod threads;
pub mod tree;
mod tuple;
mod visitor;

#[cfg(test)]
mod testing;

pub use allocator::Allocator;
pub use arena::{Arena, Chain, Segment};
pub use bytearrays::*;
pub use cell::*;
pub use collector::CycleReport;
pub use context::{Context, ContextFrame, LOCALS_CAPACITY};
pub use dict::IdentityDict;
pub use error::SpaceError;
pub use iterators::*;
pub use list::List;
pub use mutables::MutableHandle;
pub use objects::*;
pub use set::Set;
pub use space::{CollectionStats, ExhaustionPolicy, Space, SpaceInner, SpaceSettings, WorldState};
pub use sparse_list::SparseList;
pub use system::{OS_PAGE_SIZE, map_memory, unmap_memory};
pub use tagged::{Embedded, Tag, Value, mix};
pub use threads::{MutatorThread, ThreadShared, ThreadState};
pub use tree::TreeNode;
pub use tuple::{Tuple, TupleDictionary, TupleIndirect, TupleLeaf};
pub use visitor::{Visitable, Visitor};
