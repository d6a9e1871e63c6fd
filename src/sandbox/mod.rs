//! Sandbox module containing all execution-related components.

pub mod command;
pub mod config;
pub mod env;
pub mod executor;
pub mod io;
pub mod limits;
pub mod path;
pub mod tools;
