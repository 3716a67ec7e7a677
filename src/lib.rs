pub mod catalog;
pub mod config;
pub mod console;
pub mod engine;
pub mod images;
pub mod marketplace;
pub mod models;
pub mod pricing;
pub mod scheduler;
pub mod settings;
pub mod tracking;
pub mod utils;
pub mod view;

// Re-export commonly used types
pub use config::AppConfig;
pub use engine::{EngineEvent, EngineHandle, EngineSnapshot, Session};
pub use marketplace::{MarketplaceApi, MarketplaceClient, Visibility};
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
