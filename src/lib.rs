pub mod aggregate;
pub mod backend;
pub mod batch;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod edits;
pub mod error;
pub mod ipc;
pub mod model;
pub mod pagination;
pub mod store;
pub mod view;

pub use error::{Result, SyncError};
