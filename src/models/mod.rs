//! Data models for the ZipShip service.
//!
//! Wire types use camelCase to match the web client.

mod archive;
mod connection;
mod credit;
mod deployment;

pub use archive::*;
pub use connection::*;
pub use credit::*;
pub use deployment::*;
