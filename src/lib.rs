pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod paths;
pub mod remote;
pub mod session;
pub mod srs;
pub mod sync;
pub mod xp;

#[cfg(test)]
pub mod testing;

pub use error::{Error, Result};
