//! Warden Library
//!
//! Control plane for functions-as-a-service: builds container images from
//! git repositories, runs them on a container engine and forwards calls to
//! the running instances.

pub mod app;
pub mod build;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod proxy;
pub mod server;
pub mod storage;
pub mod utils;
