pub mod api;
pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod logging;
pub mod notifications;
pub mod scheduler;
pub mod utils;
