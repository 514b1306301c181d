//! Blob storage access.
//!
//! The [`backend::BlobStore`] trait abstracts the blob service.
//! Implementations are the Azure Blob REST API and an in-memory store; the
//! [`adapter::BlobAdapter`] layers file-system semantics on top.

pub mod adapter;
pub mod azure;
pub mod backend;
pub mod memory;
