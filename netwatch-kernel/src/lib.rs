pub mod bandwidth;
pub mod command;
pub mod config;
pub mod http;
pub mod models;
pub mod monitor;
pub mod probe;
pub mod scheduler;
pub mod state;
pub mod store;
