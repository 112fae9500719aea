pub mod config;
pub mod error;
pub mod profile;
pub mod tuya;

pub use error::{AppError, Result};
