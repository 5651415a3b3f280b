pub mod config;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod output;
pub mod resource;
pub mod state;
