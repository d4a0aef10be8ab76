//! Local staging cache for the environmental dataset

pub mod coordinator;
pub mod store;
pub mod window;

pub use coordinator::{CacheCoordinator, CacheSettings, Residency};
pub use store::{CacheAxes, CacheError, LocalCache};
pub use window::CacheWindow;
