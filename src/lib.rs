pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod feed;
pub mod retention;
pub mod schedule;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
