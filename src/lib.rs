pub mod agent;
pub mod channel;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod orchestration;
