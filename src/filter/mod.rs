pub mod compiler;
pub mod error;
pub mod filter_order;
pub mod predicate;
pub mod sql;
pub mod types;

pub use compiler::FilterCompiler;
pub use error::FilterError;
pub use filter_order::FilterOrder;
pub use predicate::{CompareOp, FieldSource, Predicate, TextMatch};
pub use types::{Filter, FilterOp, SortDirection, SortSpec};
