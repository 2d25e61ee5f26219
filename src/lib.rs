//! Storefront support chat server - Library exports for testing

pub mod api;
pub mod core;
pub mod infrastructure;
