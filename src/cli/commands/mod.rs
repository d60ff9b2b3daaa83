pub mod condition;
pub mod filter;
pub mod schema;
