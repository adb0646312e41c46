#![allow(clippy::uninlined_format_args)]

pub mod access;
pub mod app;
pub mod cli;
pub mod client;
pub mod compose;
pub mod config;
pub mod data;
pub mod forum;
pub mod render;
pub mod security;
pub mod session;
pub mod storage;
pub mod thread;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
pub use thread::{linearize, ThreadEntry};
