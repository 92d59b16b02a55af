//! semstore property-table diffs
//!
//! When a page is re-annotated, each property table only gets the rows that
//! actually changed. This crate holds the ledger of those changes for one
//! update operation and the views consumers read from it:
//!
//! ```text
//!  per-table updater             CompositeDiff                  consumers
//! ┌────────────────────┐  append  ┌─────────────────────────┐
//! │ TableDiff::compute │────────► │ ("wikipage_refs", diff) │──► ids(Insert)  re-index
//! │ desired \ current  │          │ ("dates", diff)         │──► ids(Delete)  evict
//! └────────────────────┘          │ ...                     │──► to_cbor()    audit
//!                                 └─────────────────────────┘
//! ```
//!
//! ## Key properties
//!
//! - **Total**: no operation on a constructed diff can fail; rows missing a
//!   role column are simply skipped by the id walk.
//! - **Stateless reads**: [`CompositeDiff::iter`] and
//!   [`CompositeDiff::flat_id_list`] can be called any number of times and
//!   always agree with the appends so far.
//! - **Lossless representation**: see [`repr`].
//!
//! A composite diff belongs to exactly one update operation. It carries no
//! synchronization; callers append from one writer and read afterwards.

pub mod composite;
pub mod error;
pub mod ids;
pub mod repr;
pub mod row;
pub mod table_diff;

pub use composite::{CompositeDiff, TableRecord};
pub use error::DiffError;
pub use ids::{FlatIdList, IdExtractor};
pub use row::{EntityId, PayloadValue, Role, Row};
pub use table_diff::{DiffSide, TableDiff};
