//! Strata Path: interned hierarchical path identifiers
//!
//! Every distinct scene path gets a compact, reference-counted
//! identity in a global, thread-safe trie, giving O(1) equality and
//! hashing and O(depth) construction. Paths split into a prim-like
//! prefix tree and a property-like prefix tree so property suffixes
//! are shared across all prims bearing the same property.
//!
//! # Modules
//!
//! - `path`: the `Path` type and its algebra (appends, prefixes,
//!   replacement, ordering)
//! - `parser`: the path text grammar
//! - `map_function`: canonicalized namespace-translating transforms
//! - `node`, `interner`: the node representation and the global
//!   find-or-create machinery

mod interner;
mod node;

pub mod map_function;
pub mod parser;
pub mod path;

pub use interner::table_sizes;
pub use map_function::MapFunction;
pub use parser::PathParseError;
pub use path::Path;

use strata_core::ValueItem;

impl ValueItem for Path {
    // A path is two pool handles; copying bumps two refcounts.
    const CHEAP_COPY: bool = true;
    const HASHABLE: bool = true;

    fn hash_item(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut h = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut h);
        h.finish()
    }

    fn stream(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

/// Register the standard path-value conversions with the erased value
/// container.
pub fn ensure_path_casts() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        strata_core::register_cast::<Path, String>(|p| Some(p.as_string()));
        strata_core::register_cast::<String, Path>(|s| Path::parse(s).ok());
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Value;

    #[test]
    fn test_path_as_value_item() {
        let v = Value::new(Path::parse("/A/B").unwrap());
        assert!(v.is_local());
        assert!(v.is_holding::<Path>());
        assert_eq!(v.get::<Path>().unwrap().as_string(), "/A/B");
        let c = v.clone();
        assert_eq!(v, c);
        assert_eq!(v.hash_value(), c.hash_value());
    }

    #[test]
    fn test_path_value_casts() {
        ensure_path_casts();
        let v = Value::new(Path::parse("/A").unwrap());
        let s = v.cast::<String>().unwrap();
        assert_eq!(s.get::<String>().unwrap(), "/A");
        let back = s.cast::<Path>().unwrap();
        assert_eq!(back.get::<Path>().unwrap(), v.get::<Path>().unwrap());
    }
}
