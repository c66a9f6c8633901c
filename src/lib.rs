//! EPUB translator - local machine translation library
//!
//! This library hosts a sequence-to-sequence translation model behind an
//! HTTP API and converts ePub books to and from a tagged text format.

#![deny(unsafe_code)]

pub mod cli;
pub mod core;
pub mod processors;
pub mod server;

// Re-export key types for convenience
pub use crate::core::{
    client::TranslationClient,
    config::AppConfig,
    engine::{ModelHost, SharedEngine, TranslationEngine},
    errors::TranslationError,
    models::{Block, BlockKind, Chapter, Document, TranslationRequest, TranslationResponse},
};

pub use crate::processors::{builder::EpubBuilder, epub::EpubExtractor};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
