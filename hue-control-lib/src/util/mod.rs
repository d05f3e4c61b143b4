pub mod description;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod socket;
pub mod strategy;
pub mod traits;
