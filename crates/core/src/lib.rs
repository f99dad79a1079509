//! Strata Core: storage primitives for scene description
//!
//! This crate provides the foundation the path interner and the crate
//! file store are built on:
//!
//! - `Token`: interned, immortal strings with O(1) equality
//! - `Pool`: fixed-size slab allocator returning 32-bit handles
//! - `Value`: type-erased value container with small-value storage
//!   and shared (copy-on-write) remote storage
//! - `Array`: typed dynamic arrays sharing buffers until mutated
//! - `Dictionary`: ordered string-to-value maps with path-addressed
//!   access and overlay composition
//! - `ListOp`: explicit / incremental ordered-set edits
//! - `LayerOffset`: affine time transforms
//! - `PlainValue`: serializable interchange form (JSON)

pub mod array;
pub mod dictionary;
pub mod layer_offset;
pub mod listop;
pub mod pool;
pub mod serialize;
pub mod token;
pub mod value;

pub use array::Array;
pub use dictionary::{
    Dictionary, KEY_PATH_DELIMITER, dictionary_over, dictionary_over_in_place,
    dictionary_over_recursive, dictionary_over_recursive_in_place,
};
pub use layer_offset::LayerOffset;
pub use listop::ListOp;
pub use pool::{Handle, Pool};
pub use serialize::{InterchangeError, PlainValue};
pub use token::Token;
pub use value::{
    Value, ValueItem, ensure_standard_casts, hash_combine, register_cast, register_default,
};
