//! Error taxonomy for the merge engine and the publish workflows.

use rpmrepo_schema::CatalogKind;
use thiserror::Error;

use crate::rpm::DecodeError;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] opendal::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Malformed {kind} catalog: {reason}")]
    Malformed { kind: CatalogKind, reason: String },

    #[error("Append requires a primary catalog item")]
    MissingPrimary,

    #[error("Failed to decode package {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: DecodeError,
    },

    #[error("Lock on '{scope}' unavailable after {attempts} attempts")]
    LockUnavailable { scope: String, attempts: u32 },

    #[error("Repository under '{scope}' changed while the update was prepared")]
    Conflict { scope: String },

    #[error("{kind} catalog holds {actual} records, primary holds {expected}")]
    Inconsistent {
        kind: CatalogKind,
        expected: u64,
        actual: u64,
    },

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl MetadataError {
    pub fn malformed(kind: CatalogKind, reason: impl std::fmt::Display) -> Self {
        Self::Malformed {
            kind,
            reason: reason.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for MetadataError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for MetadataError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::Xml(err.into())
    }
}

pub type Result<T> = std::result::Result<T, MetadataError>;
