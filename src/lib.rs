#![allow(clippy::uninlined_format_args)]

pub mod anonymize;
pub mod app;
pub mod auth;
pub mod bucket;
pub mod config;
pub mod data;
pub mod env;
pub mod feed;
pub mod images;
pub mod kudos;
pub mod sigv4;
pub mod ui;
pub mod visibility;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
