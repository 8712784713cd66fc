//! Engine operation handlers.
//!
//! This module contains the public operations of the engine, organized
//! into submodules by category. Each submodule adds methods to
//! [`crate::engine::ObjectEngine`].
//!
//! A protocol layer (HTTP, RPC) maps requests onto these methods and
//! [`crate::error::StorageError::code`] onto its error responses.

pub mod bucket;
pub mod bucket_config;
pub mod list;
pub mod multipart;
pub mod object;
pub mod object_config;
pub mod stats;
pub mod trash;
