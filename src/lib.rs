pub mod cache;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod fetchers;
pub mod indicators;
pub mod processor;
pub mod utils;

pub use error::{PipelineError, Result};
