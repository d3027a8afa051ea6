pub mod config;
pub mod data;
pub mod error;
pub mod table_display;
pub mod utils;
