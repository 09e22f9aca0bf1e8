#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod archive;
pub mod config;
pub mod data;
pub mod export;
pub mod group;
pub mod item;
pub mod pager;
pub mod source;
pub mod store;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
