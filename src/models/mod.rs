pub mod location;
pub mod presence;
pub mod ride;
pub mod user;
