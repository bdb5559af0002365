pub mod acquirer;
pub mod provider;
pub mod simulated;
pub mod strategy;

pub use acquirer::{LocationAcquirer, WatchHandle};
pub use provider::{PositionProvider, WatchOptions};
pub use strategy::AcquireOptions;
