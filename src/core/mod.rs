//! Core translation module

pub mod client;
pub mod config;
pub mod engine;
pub mod errors;
pub mod models;
