//! fdump-app - Dump pipelines and orchestration for flutter-dump
//!
//! Builds on [`fdump_daemon`] to connect to a running Flutter app, walk its
//! widget tree, and write the results to disk.
//!
//! ## Public API
//!
//! - [`run_dump()`] - One dump from launch/attach to teardown
//! - [`Session`] - VM Service connection plus the main isolate id
//! - [`config`] - `.fdump/config.toml` loading and defaults
//! - [`poller::wait_for_ready()`] - Retry a probe until the widget tree exists
//! - [`crawl::discover_and_fetch()`] - Per-node layout and details crawl
//! - [`inject::inject()`] - Compile the figma crawler into the app, reversibly
//! - [`assets::embed()`] - Inline local image assets as base64

pub mod artifacts;
pub mod assets;
pub mod config;
pub mod crawl;
pub mod dump;
pub mod inject;
pub mod poller;
pub mod session;

pub use config::{DumpMode, Settings};
pub use dump::{run_dump, DumpOutcome, DumpRequest, Target};
pub use session::Session;
