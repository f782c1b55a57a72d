pub mod availability;
pub mod client;
pub mod config;
pub mod consistency;
pub mod db;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod links;
pub mod locks;
pub mod models;
pub mod oracle;
pub mod query;
pub mod seed;
pub mod store;
pub mod subscription;
mod migrations;

pub use client::ForumClient;
pub use config::{ClientConfig, RetrySettings};
pub use db::{open_store, SyncStore};
pub use engine::BoardEngine;
pub use error::CoreError;
