//! Data layer for the view
//!
//! Rows live in the [`row_store`]; [`data_view::DataView`] derives the
//! filtered, sorted and paginated window from them and keeps a
//! [`render_bridge::RenderBridge`] in sync.

// Core data modules
pub mod data_view;
pub mod datatable;
pub mod row_store;

// Pipeline stages
pub mod datavalue_compare;
pub mod filter_engine;
pub mod pagination;
pub mod sort_engine;

pub mod loaders;
pub mod render_bridge;
