//! HTTP request handlers.

pub mod health;
pub mod raffle;

pub use health::health_check;
pub use raffle::{get_entry, submit_entry};
