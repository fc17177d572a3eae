pub mod backup;
pub mod config;
pub mod constants;
pub mod cron;
pub mod database;
pub mod db;
pub mod error;
pub mod runtime;
pub mod storage;
pub mod target;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{HarborError, Result};
