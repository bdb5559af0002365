pub mod coordinator;
pub mod desk;
pub mod lifecycle;
pub mod live_sync;
pub mod publisher;

pub use coordinator::RideRequestCoordinator;
pub use desk::OperatorDesk;
pub use live_sync::{LiveEstimate, RiderLiveSync};
pub use publisher::OperatorPublisher;
