pub mod record_service;

pub use record_service::{ListRequest, ListResponse, PageMeta, RecordService};
