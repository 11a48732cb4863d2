#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Application wiring for the vidra torrent streaming controller.
//!
//! Layout: `bootstrap.rs` (service wiring and the run loop), `monitor.rs`
//! (external address/port watchdog and its restart exit code).

/// Service wiring and the run loop.
pub mod bootstrap;
/// External address/port watchdog.
pub mod monitor;

pub use bootstrap::run_app;
pub use monitor::RESTART_EXIT_CODE;
