//! Configuration module
//!
//! Search, sort, paging and display defaults loaded from a TOML file.

pub mod config;
