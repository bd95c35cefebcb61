//! HTTP server: function execution and management endpoints

pub mod handlers;
pub mod serve;
pub mod state;
