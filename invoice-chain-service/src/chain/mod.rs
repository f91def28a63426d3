//! Hash chain over issued fiscal documents.
//!
//! Every document of a (tenant, fiscal year, series, document type) chain
//! carries the hash of its predecessor, so rewriting any issued document
//! breaks the link to the next one.

pub mod amounts;
pub mod builder;
pub mod error;
pub mod exporter;
pub mod hasher;
pub mod validator;

pub use builder::ChainBuilder;
pub use error::ChainError;
pub use exporter::{LedgerExport, LedgerExporter, LedgerFormat};
pub use hasher::{compute_hash, HashInput, GENESIS_HASH, HASH_VERSION};
pub use validator::{
    validate_chain, AnomalyKind, ChainAnomaly, ChainValidator, ValidationReport, VerificationMode,
};
