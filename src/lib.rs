pub mod app;
pub mod config;
pub mod error;
pub mod fetch;
pub mod records;
pub mod services;
pub mod storage;
pub mod utils;

pub use error::{AppError, Result, SourceError};
