pub mod config;
pub mod error;
pub mod telemetry;

pub use config::{ChainSettings, DatabaseSettings, MonitorSettings, Settings};
pub use error::AppError;
