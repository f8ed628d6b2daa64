pub mod config;
pub mod error;

pub use config::KestrelConfig;
pub use error::{KestrelError, Result};
