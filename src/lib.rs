pub mod clients;
pub mod config;
pub mod correlation;
pub mod models;
pub mod store;
pub mod sync;
