//! Namespace Mapping Functions
//!
//! A `MapFunction` expresses a correspondence between two scene
//! namespaces as a canonicalized list of (source, target) path pairs
//! plus a layer offset for time. Composition arcs consume these to
//! translate paths across layer stacks.
//!
//! Construction canonicalizes: invalid endpoints are rejected,
//! duplicates are reported as coding errors, entries derivable from an
//! ancestor mapping are dropped, blockers (pairs with an empty target)
//! survive only when they actually suppress a mapping, and the root
//! identity pair `/ -> /` is extracted into a flag.
//!
//! Mapping a path finds the longest matching source prefix, replaces
//! it, and then verifies the result maps back: if some other pair is a
//! better inverse match, the function is not one-to-one at that path
//! and the empty path is returned ("outside the domain"). Blocked and
//! unmapped paths report the same way.

use crate::path::Path;
use once_cell::sync::Lazy;
use smallvec::SmallVec;
use std::fmt;
use std::hash::{Hash, Hasher};
use strata_core::LayerOffset;
use tracing::error;

type PathPair = (Path, Path);

/// A canonicalized namespace-translating transform.
#[derive(Clone, PartialEq, Default)]
pub struct MapFunction {
    // Sorted by (source, target); never contains the root identity.
    pairs: Vec<PathPair>,
    has_root_identity: bool,
    offset: LayerOffset,
}

static IDENTITY: Lazy<MapFunction> = Lazy::new(|| MapFunction {
    pairs: Vec::new(),
    has_root_identity: true,
    offset: LayerOffset::identity(),
});

impl MapFunction {
    /// The null function, mapping nothing.
    pub fn null() -> MapFunction {
        MapFunction::default()
    }

    /// The identity function.
    pub fn identity() -> MapFunction {
        IDENTITY.clone()
    }

    /// Build a canonicalized function from (source, target) pairs.
    ///
    /// Sources must be absolute prim or variant-selection paths (or
    /// the absolute root); targets the same, or empty to denote a
    /// blocker. Violations report a coding error and yield the null
    /// function.
    pub fn create(pairs: Vec<PathPair>, offset: LayerOffset) -> MapFunction {
        let absolute_root = Path::absolute_root_path();

        if pairs.len() == 1
            && offset.is_identity()
            && pairs[0].0 == absolute_root
            && pairs[0].1 == absolute_root
        {
            return MapFunction::identity();
        }

        let is_valid_map_path = |p: &Path| {
            p.is_absolute_path()
                && (p.is_absolute_root_or_prim_path() || p.is_prim_variant_selection_path())
        };
        for (source, target) in &pairs {
            if !is_valid_map_path(source) || !(target.is_empty() || is_valid_map_path(target)) {
                error!(
                    source = %source,
                    target = %target,
                    "invalid mapping endpoints"
                );
                return MapFunction::null();
            }
        }

        let mut vec = pairs;
        let has_root_identity = canonicalize(&mut vec);
        MapFunction {
            pairs: vec,
            has_root_identity,
            offset,
        }
    }

    /// True for the null function.
    pub fn is_null(&self) -> bool {
        self.pairs.is_empty() && !self.has_root_identity
    }

    pub fn is_identity(&self) -> bool {
        self.is_identity_path_mapping() && self.offset.is_identity()
    }

    pub fn is_identity_path_mapping(&self) -> bool {
        self.pairs.is_empty() && self.has_root_identity
    }

    pub fn has_root_identity(&self) -> bool {
        self.has_root_identity
    }

    pub fn time_offset(&self) -> LayerOffset {
        self.offset
    }

    /// The canonical pair list, root identity included.
    pub fn source_to_target_map(&self) -> Vec<PathPair> {
        let mut v = self.pairs.clone();
        if self.has_root_identity {
            let root = Path::absolute_root_path();
            v.push((root.clone(), root));
        }
        v
    }

    /// Map a path from source namespace to target namespace. Yields
    /// the empty path outside the function's domain.
    pub fn map_source_to_target(&self, path: &Path) -> Path {
        map(path, &self.pairs, self.has_root_identity, false)
    }

    /// Map a path from target namespace back to source namespace.
    pub fn map_target_to_source(&self, path: &Path) -> Path {
        map(path, &self.pairs, self.has_root_identity, true)
    }

    /// The function with sources and targets exchanged.
    pub fn inverse(&self) -> MapFunction {
        MapFunction {
            pairs: self
                .pairs
                .iter()
                .map(|(s, t)| (t.clone(), s.clone()))
                .collect(),
            has_root_identity: self.has_root_identity,
            offset: self.offset.inverse(),
        }
    }

    /// The function applying `inner` first, then `self`.
    pub fn compose(&self, inner: &MapFunction) -> MapFunction {
        if self.is_identity() {
            return inner.clone();
        }
        if inner.is_identity() {
            return self.clone();
        }

        // Typical results are tiny (a root identity plus one pair), so
        // compose in stack scratch space.
        let mut scratch: SmallVec<[PathPair; 4]> = SmallVec::new();
        let absolute_root = Path::absolute_root_path();

        // Apply the outer function to the output range of inner.
        for pair in &inner.pairs {
            let mapped = (pair.0.clone(), self.map_source_to_target(&pair.1));
            if !scratch.contains(&mapped) {
                scratch.push(mapped);
            }
        }
        if inner.has_root_identity {
            let mapped = (
                absolute_root.clone(),
                self.map_source_to_target(&absolute_root),
            );
            if !scratch.contains(&mapped) {
                scratch.push(mapped);
            }
        }

        // Apply the inverse of inner to the domain of the outer
        // function.
        for pair in &self.pairs {
            let source = inner.map_target_to_source(&pair.0);
            if !source.is_empty() {
                let mapped = (source, pair.1.clone());
                if !scratch.contains(&mapped) {
                    scratch.push(mapped);
                }
            }
        }
        if self.has_root_identity {
            let source = inner.map_target_to_source(&absolute_root);
            if !source.is_empty() {
                let mapped = (source, absolute_root.clone());
                if !scratch.contains(&mapped) {
                    scratch.push(mapped);
                }
            }
        }

        let mut vec: Vec<PathPair> = scratch.into_vec();
        let has_root_identity = canonicalize(&mut vec);
        MapFunction {
            pairs: vec,
            has_root_identity,
            offset: self.offset * inner.offset,
        }
    }

    /// This function with an additional time offset composed on.
    pub fn compose_offset(&self, offset: LayerOffset) -> MapFunction {
        let mut composed = self.clone();
        composed.offset = composed.offset * offset;
        composed
    }
}

impl Eq for MapFunction {}

impl Hash for MapFunction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.has_root_identity.hash(state);
        self.offset.offset().to_bits().hash(state);
        self.offset.scale().to_bits().hash(state);
        for (s, t) in &self.pairs {
            s.hash(state);
            t.hash(state);
        }
    }
}

impl fmt::Debug for MapFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MapFunction {{")?;
        if self.has_root_identity {
            writeln!(f, "    / -> /")?;
        }
        for (s, t) in &self.pairs {
            writeln!(f, "    {} -> {}", s.as_string(), t.as_string())?;
        }
        if !self.offset.is_identity() {
            writeln!(f, "    offset: {:?}", self.offset)?;
        }
        write!(f, "}}")
    }
}

// =============================================================================
// Canonicalization and mapping
// =============================================================================

// The entry whose source (target when inverted) is the longest prefix
// of `path`, restricted to sources of at least `min_element_count`
// elements. Later entries win ties, matching the removal scan order.
fn best_source_match(
    path: &Path,
    pairs: &[PathPair],
    invert: bool,
    min_element_count: usize,
) -> Option<usize> {
    let mut best = None;
    let mut best_count = min_element_count;
    for (i, pair) in pairs.iter().enumerate() {
        let source = if invert { &pair.1 } else { &pair.0 };
        if source.is_empty() {
            // Blockers have no inverse image.
            continue;
        }
        let count = source.element_count();
        if count >= best_count && path.has_prefix(source) {
            best_count = count;
            best = Some(i);
        }
    }
    best
}

// Whether some entry is a better inverse match for `target_path` than
// the already-chosen `best_source_match`, which would break the
// one-to-one requirement.
fn has_better_target_match(
    target_path: &Path,
    pairs: &[PathPair],
    best_source_match_index: Option<usize>,
    invert: bool,
) -> bool {
    let min_element_count = best_source_match_index.map_or(0, |i| {
        let target = if invert { &pairs[i].0 } else { &pairs[i].1 };
        target.element_count()
    });
    let best_target = best_source_match(target_path, pairs, !invert, min_element_count);
    best_target.is_some() && best_target != best_source_match_index
}

fn is_redundant(index: usize, pairs: &[PathPair]) -> bool {
    let (entry_source, entry_target) = &pairs[index];
    let is_block = entry_target.is_empty();

    for (other_source, other_target) in &pairs[..index] {
        if other_source == entry_source {
            error!(source = %entry_source, "map function has two entries with the same source");
            return true;
        }
        if !is_block && other_target == entry_target {
            error!(target = %entry_target, "map function has two entries with the same target");
            return true;
        }
    }

    if is_block {
        // A block is redundant when its source would not map even
        // without it.
        let best = best_source_match(&entry_source.parent_path(), pairs, false, 0);
        let Some(b) = best else { return true };
        if pairs[b].1.is_empty() {
            return true;
        }
        let target_path = entry_source.replace_prefix(&pairs[b].0, &pairs[b].1, true);
        return has_better_target_match(&target_path, pairs, Some(b), false);
    }

    // A normal entry cannot be redundant if it renames its source.
    if entry_source.name_token() != entry_target.name_token() {
        return false;
    }

    let best = best_source_match(&entry_source.parent_path(), pairs, false, 0);
    let Some(b) = best else { return false };
    if pairs[b].1.is_empty() {
        return false;
    }

    // The ancestor mapping must land the source at the same depth.
    let source_drop =
        entry_source.element_count() as isize - pairs[b].0.element_count() as isize;
    let target_drop =
        entry_target.element_count() as isize - pairs[b].1.element_count() as isize;
    if source_drop != target_drop {
        return false;
    }

    // Equivalent to checking that replacing the ancestor prefix in the
    // entry source produces the entry target.
    let mut source_ancestor = entry_source.parent_path();
    let mut target_ancestor = entry_target.parent_path();
    while source_ancestor != pairs[b].0 {
        if source_ancestor.name_token() != target_ancestor.name_token() {
            return false;
        }
        source_ancestor = source_ancestor.parent_path();
        target_ancestor = target_ancestor.parent_path();
    }
    if pairs[b].1 != target_ancestor {
        return false;
    }

    // The ancestor mapping must actually apply (no better inverse).
    !has_better_target_match(&entry_target.parent_path(), pairs, Some(b), false)
}

// Remove redundant entries in place, sort, and extract the root
// identity pair. Returns whether the root identity was present.
fn canonicalize(pairs: &mut Vec<PathPair>) -> bool {
    let mut end = pairs.len();
    let mut i = 0;
    while i < end {
        if is_redundant(i, &pairs[..end]) {
            pairs.swap(i, end - 1);
            end -= 1;
        } else {
            i += 1;
        }
    }
    pairs.truncate(end);
    pairs.sort();

    let absolute_root = Path::absolute_root_path();
    if let Some(first) = pairs.first() {
        if first.0 == absolute_root && first.1 == absolute_root {
            pairs.remove(0);
            return true;
        }
    }
    false
}

fn map(path: &Path, pairs: &[PathPair], has_root_identity: bool, invert: bool) -> Path {
    // Embedded target paths are intentionally not rewritten here;
    // callers that want them translated recurse on target paths
    // themselves.
    let best = best_source_match(path, pairs, invert, 0);

    let result = match best {
        None => {
            if has_root_identity {
                path.clone()
            } else {
                Path::empty()
            }
        }
        Some(b) => {
            if invert {
                path.replace_prefix(&pairs[b].1, &pairs[b].0, false)
            } else {
                path.replace_prefix(&pairs[b].0, &pairs[b].1, false)
            }
        }
    };

    if result.is_empty() {
        // No mapping, or a blocked mapping.
        return result;
    }

    // Verify the result translates back to the input; a better inverse
    // match elsewhere means the mapping is not one-to-one here.
    if has_better_target_match(&result, pairs, best, invert) {
        return Path::empty();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    fn mf(pairs: &[(&str, &str)]) -> MapFunction {
        let v = pairs
            .iter()
            .map(|(s, t)| {
                (
                    p(s),
                    if t.is_empty() { Path::empty() } else { p(t) },
                )
            })
            .collect();
        MapFunction::create(v, LayerOffset::identity())
    }

    #[test]
    fn test_identity() {
        let id = MapFunction::identity();
        assert!(id.is_identity());
        assert_eq!(id.map_source_to_target(&p("/A/B")), p("/A/B"));
        assert_eq!(mf(&[("/", "/")]), id);
    }

    #[test]
    fn test_null_maps_nothing() {
        let null = MapFunction::null();
        assert!(null.is_null());
        assert!(null.map_source_to_target(&p("/A")).is_empty());
    }

    #[test]
    fn test_basic_mapping() {
        let m = mf(&[("/A", "/B")]);
        assert_eq!(m.map_source_to_target(&p("/A")), p("/B"));
        assert_eq!(m.map_source_to_target(&p("/A/Child")), p("/B/Child"));
        assert!(m.map_source_to_target(&p("/Other")).is_empty());
        assert_eq!(m.map_target_to_source(&p("/B/Child")), p("/A/Child"));
    }

    #[test]
    fn test_canonicalization_drops_derivable_pairs() {
        let m = mf(&[("/A", "/B"), ("/A/C", "/B/C"), ("/", "/")]);
        assert!(m.has_root_identity());
        let pairs = m.source_to_target_map();
        // The /A/C pair is derivable from /A -> /B; only /A -> /B and
        // the root identity survive.
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], (p("/A"), p("/B")));
        assert_eq!(pairs[1], (p("/"), p("/")));
    }

    #[test]
    fn test_renaming_pair_is_not_redundant() {
        let m = mf(&[("/A", "/B"), ("/A/C", "/B/D")]);
        assert_eq!(m.source_to_target_map().len(), 2);
        assert_eq!(m.map_source_to_target(&p("/A/C")), p("/B/D"));
        // The rename shadows the ancestor mapping for /A/C entirely.
        assert!(m.map_source_to_target(&p("/A/D")).is_empty());
    }

    #[test]
    fn test_bijection_check() {
        // /Model maps to /Model via the identity, but the inverse of
        // /Model is /_class_Model; the conflict makes /Model unmappable.
        let m = mf(&[("/", "/"), ("/_class_Model", "/Model")]);
        assert_eq!(m.map_source_to_target(&p("/_class_Model")), p("/Model"));
        assert!(m.map_source_to_target(&p("/Model")).is_empty());
        // But an overlapping consistent mapping is fine.
        let m = mf(&[("/A", "/A/B")]);
        assert_eq!(m.map_source_to_target(&p("/A/B")), p("/A/B/B"));
    }

    #[test]
    fn test_blockers() {
        let m = mf(&[("/A", "/B"), ("/A/Private", "")]);
        assert_eq!(m.map_source_to_target(&p("/A/Public")), p("/B/Public"));
        assert!(m.map_source_to_target(&p("/A/Private")).is_empty());
        assert!(m.map_source_to_target(&p("/A/Private/Deep")).is_empty());
    }

    #[test]
    fn test_redundant_blocker_removed() {
        // Nothing maps /X, so blocking it is a no-op.
        let m = mf(&[("/A", "/B"), ("/X/Y", "")]);
        assert_eq!(m.source_to_target_map().len(), 1);
    }

    #[test]
    fn test_invalid_endpoints_yield_null() {
        let m = MapFunction::create(
            vec![(p("relative"), p("/B"))],
            LayerOffset::identity(),
        );
        assert!(m.is_null());
        let m = MapFunction::create(vec![(p("/A.prop"), p("/B"))], LayerOffset::identity());
        assert!(m.is_null());
    }

    #[test]
    fn test_inverse_roundtrip() {
        let m = mf(&[("/A", "/B"), ("/", "/")]);
        let inv = m.inverse();
        for path in ["/A", "/A/X", "/Other"] {
            let forward = m.map_source_to_target(&p(path));
            if !forward.is_empty() {
                assert_eq!(inv.map_source_to_target(&forward), p(path));
                assert_eq!(m.map_target_to_source(&forward), p(path));
            }
        }
    }

    #[test]
    fn test_compose() {
        let outer = mf(&[("/B", "/C")]);
        let inner = mf(&[("/A", "/B")]);
        let composed = outer.compose(&inner);
        assert_eq!(composed.map_source_to_target(&p("/A/X")), p("/C/X"));
    }

    #[test]
    fn test_compose_offsets_multiply() {
        let outer = MapFunction::create(
            vec![(p("/"), p("/"))],
            LayerOffset::new(10.0, 1.0),
        );
        let inner = MapFunction::create(
            vec![(p("/"), p("/"))],
            LayerOffset::new(0.0, 2.0),
        );
        let composed = outer.compose(&inner);
        assert_eq!(composed.time_offset().apply(1.0), 12.0);
    }

    #[test]
    fn test_identity_compose_fast_paths() {
        let m = mf(&[("/A", "/B")]);
        assert_eq!(m.compose(&MapFunction::identity()), m);
        assert_eq!(MapFunction::identity().compose(&m), m);
    }
}
