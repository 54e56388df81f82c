pub mod api;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod enrollment;
pub mod error;
pub mod notification;
pub mod query;
pub mod realtime;
pub mod server;
pub mod store;
pub mod utils;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
