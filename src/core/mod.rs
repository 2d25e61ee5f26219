pub mod ai;
pub mod auth;
pub mod bot;
pub mod error;
pub mod guest;
pub mod hub;
pub mod services;
pub mod traits;
