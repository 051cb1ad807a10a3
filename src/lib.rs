pub mod access;
pub mod config;
pub mod error;
pub mod normalize;
pub mod platform;
pub mod provider;
pub mod routes;
pub mod store;

pub use routes::{AppState, router};
