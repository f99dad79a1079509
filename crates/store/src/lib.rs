//! Strata Store: the crate binary file format and the flat spec/field
//! store it backs
//!
//! A crate file is a versioned, sectioned, indexed binary encoding of
//! a spec store: specs keyed by path, each owning a shared,
//! deduplicated vector of (field name, value) pairs. Files open either
//! attached (memory-mapped, values materialize lazily) or detached
//! (all bytes copied out). Saves are atomic and deterministic: specs
//! sort prim-paths-first with property paths grouped by name, field
//! sets deduplicate, and the writer negotiates the lowest file version
//! that can represent the data.
//!
//! # Modules
//!
//! - `data`: the spec store and its query/edit/visit surface
//! - `format`: magic, versions, sections, and the 64-bit value rep
//! - `reader` / `writer`: the binary decode and encode paths
//! - `timesamples`: internal and public time-sample forms
//! - `payload`: payload records and compact-form conversions
//! - `spec_type`: spec type tags and reserved field names

pub mod data;
pub mod error;
pub mod format;
pub mod payload;
pub mod spec_type;
pub mod timesamples;

mod mapping;
mod reader;
mod shared;
mod writer;

pub use data::SpecStore;
pub use error::CrateError;
pub use format::{TypeEnum, ValueRep, Version};
pub use payload::{Payload, PayloadListOp};
pub use reader::{LazyValue, OpaqueValue};
pub use shared::Shared;
pub use spec_type::{SpecType, fields};
pub use timesamples::{TimeSampleMap, TimeSamples};

use strata_core::{ListOp, Token};
use strata_path::Path;

/// A list-op over paths, the stored form of relationship targets and
/// attribute connections.
pub type PathListOp = ListOp<Path>;

/// A list-op over tokens.
pub type TokenListOp = ListOp<Token>;
