pub mod config;
mod expiry;
mod gate;
mod index;
pub mod manager;
mod pipeline;

pub use config::{ManagerConfig, RetryConfig};
pub use manager::TicketManager;
