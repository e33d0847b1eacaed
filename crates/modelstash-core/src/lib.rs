//! modelstash-core: Core types for the modelstash model cache
//!
//! This crate provides the fundamental types used throughout modelstash:
//! - Model identity (hub, format, size, source)
//! - Model specifications for LLM, embedding, audio and image models
//! - Serializable model descriptions
//! - Configuration types
//! - Error handling

pub mod config;
pub mod description;
pub mod error;
pub mod model;
pub mod spec;

pub use config::*;
pub use description::*;
pub use error::*;
pub use model::*;
pub use spec::*;
