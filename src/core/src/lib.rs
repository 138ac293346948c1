//! containerdisks core - foundational types shared by the runtime and the CLI.
//!
//! This crate holds the error taxonomy, the pipeline options and the tag math
//! used to address pushed containerdisks.

pub mod config;
pub mod error;
pub mod tags;

// Re-export commonly used types
pub use config::{Options, PublishOptions, VerifyOptions};
pub use error::{DiskError, Result};
pub use tags::{join_path, prepare_tags, prepare_timestamp_tag};

/// containerdisks version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
