//! # Container Store
//!
//! Encrypted, file-backed key/value containers with whole-container
//! operations and predicate search.

mod filter;
mod locks;
pub mod naming;
mod store;

pub use filter::{lookup, FilterExpr, FilterOperator, FilterSet};
pub use locks::WriteLocks;
pub use store::{ContainerStore, Records, Storage};
