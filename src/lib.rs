pub mod access;
pub mod cli;
pub mod condition;
pub mod config;
pub mod error;
pub mod filter;
pub mod observer;
pub mod populate;
pub mod record;
pub mod schema;
pub mod services;
pub mod store;
pub mod types;
pub mod validation;

pub use error::EngineError;
pub use services::{ListRequest, ListResponse, RecordService};
pub use types::{Action, RequestContext};
