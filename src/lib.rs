pub mod api;
pub mod backoff;
pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod files;
pub mod logger;
pub mod metrics;
pub mod proxy;
pub mod registry;
pub mod relay;
pub mod resolver;
pub mod server;
pub mod service;
pub mod status;
pub mod types;
pub mod util;
