pub mod credentials;
pub mod price_update;
pub mod product;

// Re-exports for convenience
pub use credentials::*;
pub use price_update::*;
pub use product::*;
