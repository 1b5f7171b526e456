//! The five rule kinds. Each configuration struct is also its own event
//! handler.

mod count_link;
mod group_aggregate;
mod revision_stamp;
mod tree_level;
mod union_sync;

pub use self::count_link::CountLink;
pub use self::group_aggregate::{GroupAggregate, GroupSummary};
pub use self::revision_stamp::RevisionStamp;
pub use self::tree_level::TreeLevel;
pub use self::union_sync::{SyncDirection, UnionSync};
