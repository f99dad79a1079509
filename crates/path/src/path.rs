//! Interned Hierarchical Paths
//!
//! A `Path` names a location in scene namespace: a prim, a property,
//! a variant selection, a relationship target, and so on. Paths are
//! interned: the whole path is two 32-bit handles into the global
//! node trees, so equality and hashing are O(1) and construction of a
//! child path is O(1) amortized through per-thread append caches.
//!
//! The prim-part handle addresses the prim-like prefix (`/World/Char`)
//! and the optional prop-part handle addresses the property-like
//! suffix (`.radius`, `.rel[/target]`, ...). The empty handle pair is
//! the empty path, which is what failed operations return (after
//! logging a diagnostic).
//!
//! Canonical strings are built lazily on first request and cached in
//! the interner's side table.

use crate::interner::{
    self, absolute_root, add_ref_prim, add_ref_prop, prim_node, prop_node, relative_root,
    release_prim, release_prop,
};
use crate::node::{NodeType, PathNode};
use crate::parser::{self, PathParseError};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use strata_core::{Token, hash_combine};
use tracing::warn;

// =============================================================================
// RAII node references
// =============================================================================

/// Owned reference to a prim-part node; 0 is the empty reference.
pub(crate) struct PrimRef(u32);

impl PrimRef {
    pub(crate) const NULL: PrimRef = PrimRef(0);

    /// Wrap a handle that already carries a reference for us.
    #[inline]
    pub(crate) fn from_owned(raw: u32) -> PrimRef {
        PrimRef(raw)
    }

    /// Wrap a handle, claiming a new reference.
    #[inline]
    pub(crate) fn from_borrowed(raw: u32) -> PrimRef {
        add_ref_prim(raw);
        PrimRef(raw)
    }

    #[inline]
    pub(crate) fn raw(&self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl Clone for PrimRef {
    fn clone(&self) -> Self {
        add_ref_prim(self.0);
        PrimRef(self.0)
    }
}

impl Drop for PrimRef {
    fn drop(&mut self) {
        release_prim(self.0);
    }
}

/// Owned reference to a prop-part node; 0 is the empty reference.
pub(crate) struct PropRef(u32);

impl PropRef {
    pub(crate) const NULL: PropRef = PropRef(0);

    #[inline]
    pub(crate) fn from_owned(raw: u32) -> PropRef {
        PropRef(raw)
    }

    #[inline]
    pub(crate) fn from_borrowed(raw: u32) -> PropRef {
        add_ref_prop(raw);
        PropRef(raw)
    }

    #[inline]
    pub(crate) fn raw(&self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl Clone for PropRef {
    fn clone(&self) -> Self {
        add_ref_prop(self.0);
        PropRef(self.0)
    }
}

impl Drop for PropRef {
    fn drop(&mut self) {
        release_prop(self.0);
    }
}

// =============================================================================
// Path
// =============================================================================

/// An interned path: a prim-part handle plus an optional prop-part
/// handle. Eight bytes; equality and hashing are handle comparisons.
pub struct Path {
    prim: PrimRef,
    prop: PropRef,
}

impl Path {
    /// The empty path.
    pub const fn empty() -> Path {
        Path {
            prim: PrimRef::NULL,
            prop: PropRef::NULL,
        }
    }

    /// The absolute root path `/`.
    pub fn absolute_root_path() -> Path {
        Path {
            prim: PrimRef::from_borrowed(absolute_root()),
            prop: PropRef::NULL,
        }
    }

    /// The reflexive relative path `.`.
    pub fn reflexive_relative_path() -> Path {
        Path {
            prim: PrimRef::from_borrowed(relative_root()),
            prop: PropRef::NULL,
        }
    }

    /// Parse a path from its text form.
    pub fn parse(text: &str) -> Result<Path, PathParseError> {
        parser::parse_path(text)
    }

    /// Parse, logging and yielding the empty path on error.
    pub fn new(text: &str) -> Path {
        match Path::parse(text) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = text, error = %e, "invalid path string");
                Path::empty()
            }
        }
    }

    #[inline]
    pub(crate) fn from_parts(prim: PrimRef, prop: PropRef) -> Path {
        Path { prim, prop }
    }

    #[inline]
    pub(crate) fn prim_raw(&self) -> u32 {
        self.prim.raw()
    }

    #[inline]
    pub(crate) fn prop_raw(&self) -> u32 {
        self.prop.raw()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.prim.is_null()
    }

    #[inline]
    fn is_reflexive_relative(&self) -> bool {
        self.prim.raw() == relative_root() && self.prop.is_null()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Total number of path elements (prim part plus prop part).
    pub fn element_count(&self) -> usize {
        let mut n = 0;
        if !self.prim.is_null() {
            n += prim_node(self.prim.raw()).element_count as usize;
        }
        if !self.prop.is_null() {
            n += prop_node(self.prop.raw()).element_count as usize;
        }
        n
    }

    pub fn is_absolute_path(&self) -> bool {
        !self.prim.is_null() && prim_node(self.prim.raw()).is_absolute()
    }

    pub fn is_absolute_root_path(&self) -> bool {
        self.prim.raw() == absolute_root() && self.prop.is_null()
    }

    pub fn is_prim_path(&self) -> bool {
        !self.prim.is_null()
            && self.prop.is_null()
            && (prim_node(self.prim.raw()).node_type == NodeType::Prim
                || self.is_reflexive_relative())
    }

    pub fn is_absolute_root_or_prim_path(&self) -> bool {
        self.is_prim_path() || self.is_absolute_root_path()
    }

    pub fn is_root_prim_path(&self) -> bool {
        if self.prim.is_null() || !self.prop.is_null() {
            return false;
        }
        let node = prim_node(self.prim.raw());
        node.node_type == NodeType::Prim && node.element_count == 1
    }

    pub fn is_property_path(&self) -> bool {
        !self.prop.is_null()
            && matches!(
                prop_node(self.prop.raw()).node_type,
                NodeType::PrimProperty | NodeType::RelationalAttribute
            )
    }

    pub fn is_prim_property_path(&self) -> bool {
        !self.prop.is_null() && prop_node(self.prop.raw()).node_type == NodeType::PrimProperty
    }

    pub fn is_namespaced_property_path(&self) -> bool {
        self.is_property_path() && self.name().contains(':')
    }

    pub fn is_prim_variant_selection_path(&self) -> bool {
        !self.prim.is_null()
            && self.prop.is_null()
            && prim_node(self.prim.raw()).node_type == NodeType::PrimVariantSelection
    }

    pub fn is_prim_or_prim_variant_selection_path(&self) -> bool {
        self.is_prim_path() || self.is_prim_variant_selection_path()
    }

    pub fn contains_prim_variant_selection(&self) -> bool {
        !self.prim.is_null() && prim_node(self.prim.raw()).contains_variant_selection()
    }

    pub fn contains_target_path(&self) -> bool {
        !self.prop.is_null() && prop_node(self.prop.raw()).contains_target_path()
    }

    pub fn is_target_path(&self) -> bool {
        !self.prop.is_null() && prop_node(self.prop.raw()).node_type == NodeType::Target
    }

    pub fn is_relational_attribute_path(&self) -> bool {
        !self.prop.is_null()
            && prop_node(self.prop.raw()).node_type == NodeType::RelationalAttribute
    }

    pub fn is_mapper_path(&self) -> bool {
        !self.prop.is_null() && prop_node(self.prop.raw()).node_type == NodeType::Mapper
    }

    pub fn is_mapper_arg_path(&self) -> bool {
        !self.prop.is_null() && prop_node(self.prop.raw()).node_type == NodeType::MapperArg
    }

    pub fn is_expression_path(&self) -> bool {
        !self.prop.is_null() && prop_node(self.prop.raw()).node_type == NodeType::Expression
    }

    /// The leafmost element's name.
    pub fn name_token(&self) -> Token {
        if self.is_empty() {
            return Token::empty();
        }
        if !self.prop.is_null() {
            prop_node(self.prop.raw()).name()
        } else {
            prim_node(self.prim.raw()).name()
        }
    }

    /// The leafmost element's name as a string slice.
    pub fn name(&self) -> &'static str {
        self.name_token().as_str()
    }

    /// The leafmost element's full text (".name", "{set=sel}", ...).
    pub fn element_string(&self) -> String {
        let mut s = String::new();
        if !self.prop.is_null() {
            prop_node(self.prop.raw()).write_element(&mut s);
        } else if !self.prim.is_null() {
            prim_node(self.prim.raw()).write_element(&mut s);
        }
        s
    }

    /// The nearest enclosing target path for target, relational
    /// attribute, mapper, and deeper paths; empty otherwise.
    pub fn target_path(&self) -> Path {
        let mut cur = self.prop.raw();
        while cur != 0 {
            let node = prop_node(cur);
            if let Some(p) = node.target_path() {
                return p.clone();
            }
            cur = node.parent;
        }
        Path::empty()
    }

    /// The (variant set, variant) pair for variant-selection paths.
    pub fn variant_selection(&self) -> Option<(Token, Token)> {
        if self.is_prim_variant_selection_path() {
            prim_node(self.prim.raw()).variant_selection()
        } else {
            None
        }
    }

    // =========================================================================
    // Parents and prefixes
    // =========================================================================

    /// The path one namespace level up. For `.` and paths ending in
    /// `..` this appends another `..`; for `/` it yields the empty
    /// path.
    pub fn parent_path(&self) -> Path {
        if self.is_empty() {
            return Path::empty();
        }
        if !self.prop.is_null() {
            let parent = prop_node(self.prop.raw()).parent;
            return Path {
                prim: self.prim.clone(),
                prop: PropRef::from_borrowed(parent),
            };
        }
        let node = prim_node(self.prim.raw());
        let parent_token = Token::new("..");
        if node.is_absolute()
            || (self.prim.raw() != relative_root() && node.name() != parent_token)
        {
            return Path {
                prim: PrimRef::from_borrowed(node.parent),
                prop: PropRef::NULL,
            };
        }
        // Relative root, or a path already ending in '..'.
        Path {
            prim: PrimRef::from_owned(interner::find_or_create_prim(
                self.prim.raw(),
                parent_token,
            )),
            prop: PropRef::NULL,
        }
    }

    /// The longest prefix of this path that is a prim path.
    pub fn prim_path(&self) -> Path {
        let mut cur = self.prim.raw();
        while cur != 0 && prim_node(cur).node_type != NodeType::Prim {
            cur = prim_node(cur).parent;
        }
        Path {
            prim: PrimRef::from_borrowed(cur),
            prop: PropRef::NULL,
        }
    }

    /// The longest prefix that is a prim or prim-variant-selection
    /// path.
    pub fn prim_or_prim_variant_selection_path(&self) -> Path {
        let mut cur = self.prim.raw();
        while cur != 0
            && !matches!(
                prim_node(cur).node_type,
                NodeType::Prim | NodeType::PrimVariantSelection
            )
        {
            cur = prim_node(cur).parent;
        }
        Path {
            prim: PrimRef::from_borrowed(cur),
            prop: PropRef::NULL,
        }
    }

    /// True if `prefix` is a (non-strict) prefix of this path.
    pub fn has_prefix(&self, prefix: &Path) -> bool {
        if prefix.is_empty() {
            warn!("has_prefix: empty prefix");
            return false;
        }
        if self.is_empty() {
            return false;
        }
        if prefix.prop.is_null() {
            // Prim-like prefix: climb our prim chain to its depth.
            let prefix_count = prim_node(prefix.prim.raw()).element_count;
            let mut cur = self.prim.raw();
            let mut count = prim_node(cur).element_count;
            if count < prefix_count {
                return false;
            }
            while count > prefix_count {
                cur = prim_node(cur).parent;
                count -= 1;
            }
            cur == prefix.prim.raw()
        } else {
            if self.prop.is_null() || self.prim.raw() != prefix.prim.raw() {
                return false;
            }
            let prefix_count = prop_node(prefix.prop.raw()).element_count;
            let mut cur = self.prop.raw();
            let mut count = prop_node(cur).element_count;
            if count < prefix_count {
                return false;
            }
            while count > prefix_count {
                cur = prop_node(cur).parent;
                count -= 1;
            }
            cur == prefix.prop.raw()
        }
    }

    /// All prefixes of this path, shortest first, ending with the path
    /// itself. The root sentinels are not included.
    pub fn get_prefixes(&self) -> Vec<Path> {
        let mut out: Vec<Path> = Vec::new();
        let mut cur = self.prop.raw();
        while cur != 0 {
            out.push(Path {
                prim: self.prim.clone(),
                prop: PropRef::from_borrowed(cur),
            });
            cur = prop_node(cur).parent;
        }
        let mut cur = self.prim.raw();
        while cur != 0 && prim_node(cur).element_count > 0 {
            out.push(Path {
                prim: PrimRef::from_borrowed(cur),
                prop: PropRef::NULL,
            });
            cur = prim_node(cur).parent;
        }
        out.reverse();
        out
    }

    /// The longest path that is a prefix of both paths.
    pub fn common_prefix(&self, other: &Path) -> Path {
        if self.is_empty() || other.is_empty() {
            warn!("common_prefix: empty path");
            return Path::empty();
        }

        // Stay in the property area only when both paths share the
        // leafmost prim element.
        let prim_like = self.prop.is_null()
            || other.prop.is_null()
            || self.prim.raw() != other.prim.raw();

        if prim_like {
            let mut a = self.prim.raw();
            let mut b = other.prim.raw();
            let mut ca = prim_node(a).element_count;
            let mut cb = prim_node(b).element_count;
            while ca > cb {
                a = prim_node(a).parent;
                ca -= 1;
            }
            while cb > ca {
                b = prim_node(b).parent;
                cb -= 1;
            }
            while a != b {
                a = prim_node(a).parent;
                b = prim_node(b).parent;
            }
            Path {
                prim: PrimRef::from_borrowed(a),
                prop: PropRef::NULL,
            }
        } else {
            let mut a = self.prop.raw();
            let mut b = other.prop.raw();
            let mut ca = prop_node(a).element_count;
            let mut cb = prop_node(b).element_count;
            while ca > cb {
                a = prop_node(a).parent;
                ca -= 1;
            }
            while cb > ca {
                b = prop_node(b).parent;
                cb -= 1;
            }
            while a != b {
                a = prop_node(a).parent;
                b = prop_node(b).parent;
            }
            Path {
                prim: self.prim.clone(),
                prop: PropRef::from_borrowed(a),
            }
        }
    }

    /// Trim the longest shared suffix from both paths.
    ///
    /// With `stop_at_root_prim` set, the ascent stops before trimming
    /// either path down to its root.
    pub fn remove_common_suffix(&self, other: &Path, stop_at_root_prim: bool) -> (Path, Path) {
        if self.is_empty()
            || other.is_empty()
            || (self.prop.is_null() != other.prop.is_null())
        {
            return (self.clone(), other.clone());
        }

        // Property parts first; a differing property element means the
        // prim parts are untouched.
        if !self.prop.is_null() {
            let mut a = self.prop.raw();
            let mut b = other.prop.raw();
            while a != 0 && b != 0 {
                if !prop_node(a).eq_discriminant(prop_node(b)) {
                    return (
                        Path {
                            prim: self.prim.clone(),
                            prop: PropRef::from_borrowed(a),
                        },
                        Path {
                            prim: other.prim.clone(),
                            prop: PropRef::from_borrowed(b),
                        },
                    );
                }
                a = prop_node(a).parent;
                b = prop_node(b).parent;
            }
            if a != 0 || b != 0 {
                return (
                    Path {
                        prim: self.prim.clone(),
                        prop: PropRef::from_borrowed(a),
                    },
                    Path {
                        prim: other.prim.clone(),
                        prop: PropRef::from_borrowed(b),
                    },
                );
            }
        }

        // With stop_at_root_prim the ascent halts before either result
        // would become a root prim; without it, matching chains may
        // collapse all the way into the roots.
        let floor: u16 = if stop_at_root_prim { 2 } else { 1 };
        let mut a = self.prim.raw();
        let mut b = other.prim.raw();
        while prim_node(a).element_count > floor && prim_node(b).element_count > floor {
            if !prim_node(a).eq_discriminant(prim_node(b)) {
                break;
            }
            a = prim_node(a).parent;
            b = prim_node(b).parent;
        }

        // Unless stopping at root prims, one more equal step may climb
        // into the roots themselves.
        if !stop_at_root_prim
            && prim_node(a).element_count >= 1
            && prim_node(b).element_count >= 1
            && prim_node(a).eq_discriminant(prim_node(b))
        {
            a = prim_node(a).parent;
            b = prim_node(b).parent;
        }

        (
            Path {
                prim: PrimRef::from_borrowed(a),
                prop: PropRef::NULL,
            },
            Path {
                prim: PrimRef::from_borrowed(b),
                prop: PropRef::NULL,
            },
        )
    }

    // =========================================================================
    // Appends
    // =========================================================================

    /// Append a prim child. `..` appends climb instead.
    pub fn append_child(&self, child_name: Token) -> Path {
        if !self.prop.is_null() || self.is_empty() {
            warn!(child = child_name.as_str(), path = %self, "cannot append child");
            return Path::empty();
        }
        PRIM_PATH_CACHE.with(|cell| {
            let mut cache = cell.borrow_mut();
            let (hit, store_index) = cache.find(self.prim.raw(), child_name);
            if let Some(raw) = hit {
                return Path {
                    prim: PrimRef::from_borrowed(raw),
                    prop: PropRef::NULL,
                };
            }
            if !self.is_absolute_root_or_prim_path()
                && !self.is_prim_variant_selection_path()
                && !self.is_reflexive_relative()
            {
                warn!(child = child_name.as_str(), path = %self, "cannot append child");
                return Path::empty();
            }
            if child_name == Token::new("..") {
                return self.parent_path();
            }
            if !is_valid_identifier(child_name.as_str()) {
                warn!(name = child_name.as_str(), "invalid prim name");
                return Path::empty();
            }
            let raw = interner::find_or_create_prim(self.prim.raw(), child_name);
            cache.store(self.prim.raw(), child_name, raw, store_index);
            Path {
                prim: PrimRef::from_owned(raw),
                prop: PropRef::NULL,
            }
        })
    }

    /// Append a property element (possibly namespaced).
    pub fn append_property(&self, prop_name: Token) -> Path {
        if !self.prop.is_null() || self.is_empty() {
            warn!(property = prop_name.as_str(), path = %self, "can only append a property to a prim path");
            return Path::empty();
        }
        PROP_PATH_CACHE.with(|cell| {
            let mut cache = cell.borrow_mut();
            let (hit, store_index) = cache.find(prop_name);
            if let Some(raw) = hit {
                return Path {
                    prim: self.prim.clone(),
                    prop: PropRef::from_borrowed(raw),
                };
            }
            if !is_valid_namespaced_identifier(prop_name.as_str()) {
                warn!(name = prop_name.as_str(), "invalid property name");
                return Path::empty();
            }
            if !self.is_prim_variant_selection_path()
                && !self.is_prim_path()
                && !self.is_reflexive_relative()
            {
                warn!(property = prop_name.as_str(), path = %self, "can only append a property to a prim path");
                return Path::empty();
            }
            let raw = interner::find_or_create_prim_property(prop_name);
            cache.store(prop_name, raw, store_index);
            Path {
                prim: self.prim.clone(),
                prop: PropRef::from_owned(raw),
            }
        })
    }

    /// Append a variant selection `{set=variant}`.
    pub fn append_variant_selection(&self, set: &str, variant: &str) -> Path {
        if !self.is_prim_or_prim_variant_selection_path() {
            tracing::error!(
                set,
                variant,
                path = %self,
                "can only append a variant selection to a prim or prim variant selection path"
            );
            return Path::empty();
        }
        Path {
            prim: PrimRef::from_owned(interner::find_or_create_prim_variant_selection(
                self.prim.raw(),
                Token::new(set),
                Token::new(variant),
            )),
            prop: PropRef::NULL,
        }
    }

    /// Append a relationship target `[target]`.
    pub fn append_target(&self, target_path: &Path) -> Path {
        if !self.is_property_path() {
            warn!(path = %self, "can only append a target to a property path");
            return Path::empty();
        }
        if target_path.is_empty() {
            warn!("target path cannot be empty");
            return Path::empty();
        }
        Path {
            prim: self.prim.clone(),
            prop: PropRef::from_owned(interner::find_or_create_target(
                self.prop.raw(),
                target_path.clone(),
            )),
        }
    }

    /// Append a relational attribute; valid on target paths.
    pub fn append_relational_attribute(&self, attr_name: Token) -> Path {
        if !is_valid_namespaced_identifier(attr_name.as_str()) {
            warn!(name = attr_name.as_str(), "invalid property name");
            return Path::empty();
        }
        if !self.is_target_path() {
            warn!(path = %self, "can only append a relational attribute to a target path");
            return Path::empty();
        }
        Path {
            prim: self.prim.clone(),
            prop: PropRef::from_owned(interner::find_or_create_relational_attribute(
                self.prop.raw(),
                attr_name,
            )),
        }
    }

    /// Append a mapper element `.mapper[target]`.
    pub fn append_mapper(&self, target_path: &Path) -> Path {
        if !self.is_property_path() {
            warn!(path = %self, "can only append a mapper to a property path");
            return Path::empty();
        }
        if target_path.is_empty() {
            warn!("mapper target path cannot be empty");
            return Path::empty();
        }
        Path {
            prim: self.prim.clone(),
            prop: PropRef::from_owned(interner::find_or_create_mapper(
                self.prop.raw(),
                target_path.clone(),
            )),
        }
    }

    /// Append a mapper argument; valid on mapper paths.
    pub fn append_mapper_arg(&self, arg_name: Token) -> Path {
        if !is_valid_identifier(arg_name.as_str()) {
            warn!(name = arg_name.as_str(), "invalid mapper arg name");
            return Path::empty();
        }
        if !self.is_mapper_path() {
            warn!(path = %self, "can only append a mapper arg to a mapper path");
            return Path::empty();
        }
        Path {
            prim: self.prim.clone(),
            prop: PropRef::from_owned(interner::find_or_create_mapper_arg(
                self.prop.raw(),
                arg_name,
            )),
        }
    }

    /// Append an expression element; valid on property paths.
    pub fn append_expression(&self) -> Path {
        if !self.is_property_path() {
            warn!(path = %self, "can only append an expression to a property path");
            return Path::empty();
        }
        Path {
            prim: self.prim.clone(),
            prop: PropRef::from_owned(interner::find_or_create_expression(self.prop.raw())),
        }
    }

    /// Append a whole relative path.
    pub fn append_path(&self, suffix: &Path) -> Path {
        if self.is_empty() {
            warn!("cannot append to the empty path");
            return Path::empty();
        }
        if suffix.is_empty() {
            warn!(path = %self, "cannot append the empty path");
            return Path::empty();
        }
        if suffix.is_absolute_path() {
            warn!(suffix = %suffix, path = %self, "cannot append an absolute path");
            return Path::empty();
        }
        if suffix.is_reflexive_relative() {
            return self.clone();
        }
        let prim_type = prim_node(self.prim.raw()).node_type;
        if !self.prop.is_null()
            || !matches!(
                prim_type,
                NodeType::Root | NodeType::Prim | NodeType::PrimVariantSelection
            )
        {
            warn!(path = %self, "cannot append a path to a non-prim path");
            return Path::empty();
        }

        // Collect the suffix's nodes leaf-first.
        let mut tail: SmallVec<[(bool, u32); 16]> = SmallVec::new();
        let mut cur = suffix.prop.raw();
        while cur != 0 {
            tail.push((false, cur));
            cur = prop_node(cur).parent;
        }
        let mut cur = suffix.prim.raw();
        while cur != relative_root() {
            tail.push((true, cur));
            cur = prim_node(cur).parent;
        }

        if let Some(&(is_prim, leading)) = tail.last() {
            if !is_prim
                && prop_node(leading).node_type == NodeType::PrimProperty
                && self.is_absolute_root_path()
            {
                warn!("cannot append a property path to the absolute root path");
                return Path::empty();
            }
        }

        let mut result = self.clone();
        for &(is_prim, raw) in tail.iter().rev() {
            result = append_node(&result, is_prim, raw);
            if result.is_empty() {
                break;
            }
        }
        result
    }

    // =========================================================================
    // Prefix replacement
    // =========================================================================

    /// Replace `old_prefix` with `new_prefix` where it prefixes this
    /// path. With `fix_target_paths`, embedded target paths are
    /// rewritten recursively as well.
    pub fn replace_prefix(&self, old_prefix: &Path, new_prefix: &Path, fix_target_paths: bool) -> Path {
        if self.is_empty() || old_prefix == new_prefix {
            return self.clone();
        }
        if old_prefix.is_empty() || new_prefix.is_empty() {
            return Path::empty();
        }
        if self == old_prefix {
            return new_prefix.clone();
        }

        if old_prefix.prop.is_null() {
            let mut new_path = self.replace_prim_prefix(old_prefix, new_prefix);
            if fix_target_paths
                && !new_path.prop.is_null()
                && prop_node(new_path.prop.raw()).contains_target_path()
            {
                new_path = new_path.replace_target_path_prefixes(old_prefix, new_prefix);
            }
            new_path
        } else {
            // A property-like prefix cannot prefix a prim-like path.
            if self.prop.is_null() {
                return self.clone();
            }
            if self.prim.raw() != old_prefix.prim.raw() {
                if fix_target_paths && prop_node(self.prop.raw()).contains_target_path() {
                    self.replace_target_path_prefixes(old_prefix, new_prefix)
                } else {
                    self.clone()
                }
            } else {
                self.replace_prop_prefix(old_prefix, new_prefix, fix_target_paths)
            }
        }
    }

    fn replace_prim_prefix(&self, old_prefix: &Path, new_prefix: &Path) -> Path {
        let prefix_count = prim_node(old_prefix.prim.raw()).element_count;
        let mut cur = self.prim.raw();
        let mut count = prim_node(cur).element_count;
        if count < prefix_count {
            return self.clone();
        }

        let mut tail: SmallVec<[u32; 16]> = SmallVec::new();
        while count > prefix_count {
            tail.push(cur);
            cur = prim_node(cur).parent;
            count -= 1;
        }
        if cur != old_prefix.prim.raw() {
            return self.clone();
        }

        let mut new_path = Path {
            prim: new_prefix.prim.clone(),
            prop: PropRef::NULL,
        };
        for &raw in tail.iter().rev() {
            new_path = append_node(&new_path, true, raw);
            if new_path.is_empty() {
                return Path::empty();
            }
        }
        new_path.prop = self.prop.clone();
        new_path
    }

    fn replace_prop_prefix(&self, old_prefix: &Path, new_prefix: &Path, fix_target_paths: bool) -> Path {
        let prefix_count = prop_node(old_prefix.prop.raw()).element_count;
        let mut cur = self.prop.raw();
        let mut count = prop_node(cur).element_count;

        if count < prefix_count {
            return if fix_target_paths && prop_node(cur).contains_target_path() {
                self.replace_target_path_prefixes(old_prefix, new_prefix)
            } else {
                self.clone()
            };
        }

        let mut tail: SmallVec<[u32; 16]> = SmallVec::new();
        while count > prefix_count {
            tail.push(cur);
            cur = prop_node(cur).parent;
            count -= 1;
        }
        if cur != old_prefix.prop.raw() {
            return if fix_target_paths && self.contains_target_path() {
                self.replace_target_path_prefixes(old_prefix, new_prefix)
            } else {
                self.clone()
            };
        }

        let mut new_path = new_prefix.clone();
        for &raw in tail.iter().rev() {
            new_path = self.replay_prop_node(new_path, raw, old_prefix, new_prefix, fix_target_paths);
            if new_path.is_empty() {
                return Path::empty();
            }
        }
        new_path
    }

    // Rebuild the property chain above a replaced prefix, rewriting
    // embedded targets along the way.
    fn replace_target_path_prefixes(&self, old_prefix: &Path, new_prefix: &Path) -> Path {
        let mut cur = self.prop.raw();
        if cur == 0 || !prop_node(cur).contains_target_path() {
            return self.clone();
        }

        let mut tail: SmallVec<[u32; 16]> = SmallVec::new();
        while cur != 0 && prop_node(cur).contains_target_path() {
            tail.push(cur);
            cur = prop_node(cur).parent;
        }

        let mut new_path = Path {
            prim: self.prim.clone(),
            prop: PropRef::from_borrowed(cur),
        };
        for &raw in tail.iter().rev() {
            new_path = self.replay_prop_node(new_path, raw, old_prefix, new_prefix, true);
            if new_path.is_empty() {
                return Path::empty();
            }
        }
        new_path
    }

    // Append one recorded property node onto `base`, rewriting target
    // payloads when requested.
    fn replay_prop_node(
        &self,
        base: Path,
        raw: u32,
        old_prefix: &Path,
        new_prefix: &Path,
        fix_target_paths: bool,
    ) -> Path {
        let node = prop_node(raw);
        match node.node_type {
            NodeType::PrimProperty => Path {
                prim: base.prim.clone(),
                prop: PropRef::from_owned(interner::find_or_create_prim_property(node.name())),
            },
            NodeType::Target if fix_target_paths => {
                let target = node
                    .target_path()
                    .expect("target node carries a path")
                    .replace_prefix(old_prefix, new_prefix, true);
                base.append_target(&target)
            }
            NodeType::Mapper if fix_target_paths => {
                let target = node
                    .target_path()
                    .expect("mapper node carries a path")
                    .replace_prefix(old_prefix, new_prefix, true);
                base.append_mapper(&target)
            }
            _ => append_node(&base, false, raw),
        }
    }

    /// This path with every variant selection removed.
    pub fn strip_all_variant_selections(&self) -> Path {
        if !self.contains_prim_variant_selection() {
            return self.clone();
        }
        let mut prim_nodes: SmallVec<[u32; 16]> = SmallVec::new();
        let mut cur = self.prim.raw();
        while cur != 0 {
            if prim_node(cur).node_type != NodeType::PrimVariantSelection {
                prim_nodes.push(cur);
            }
            cur = prim_node(cur).parent;
        }

        // The last collected node is a root.
        let root = prim_nodes.pop().expect("prim chain ends at a root");
        let mut stripped = Path {
            prim: PrimRef::from_borrowed(root),
            prop: PropRef::NULL,
        };
        for &raw in prim_nodes.iter().rev() {
            stripped = append_node(&stripped, true, raw);
        }
        stripped.prop = self.prop.clone();
        stripped
    }

    // =========================================================================
    // Strings
    // =========================================================================

    /// The canonical text of this path, cached after the first call.
    pub fn as_token(&self) -> Token {
        if self.is_empty() {
            return Token::empty();
        }
        interner::get_path_token(self.prim.raw(), self.prop.raw(), || {
            Token::new(build_path_string(self.prim.raw(), self.prop.raw()))
        })
    }

    /// The canonical text of this path as an owned string.
    pub fn as_string(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        build_path_string(self.prim.raw(), self.prop.raw())
    }
}

impl Default for Path {
    fn default() -> Self {
        Path::empty()
    }
}

impl Clone for Path {
    fn clone(&self) -> Self {
        Path {
            prim: self.prim.clone(),
            prop: self.prop.clone(),
        }
    }
}

impl PartialEq for Path {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.prim.raw() == other.prim.raw() && self.prop.raw() == other.prop.raw()
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(hash_combine(self.prim.raw() as u64, self.prop.raw() as u64));
    }
}

impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Path {
    fn cmp(&self, other: &Self) -> Ordering {
        if self == other {
            return Ordering::Equal;
        }
        // The empty path sorts before everything.
        match (self.is_empty(), other.is_empty()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }

        let labs = self.is_absolute_path();
        let rabs = other.is_absolute_path();
        if labs != rabs {
            // Absolute paths sort before relative paths.
            return if labs { Ordering::Less } else { Ordering::Greater };
        }

        if self.prim.raw() != other.prim.raw() {
            return compare_node_chains(self.prim.raw(), other.prim.raw(), true);
        }
        match (self.prop.is_null(), other.prop.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => compare_node_chains(self.prop.raw(), other.prop.raw(), false),
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token().as_str())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({})", self.as_string())
    }
}

impl FromStr for Path {
    type Err = PathParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

// =============================================================================
// Ordering helper
// =============================================================================

// Caller ensures both chains are same-tree and both absolute or both
// relative. Climb the deeper chain to equal depth, then climb both in
// lock step until the parents agree, then compare discriminants.
fn compare_node_chains(l: u32, r: u32, is_prim: bool) -> Ordering {
    let node = |raw: u32| -> &'static PathNode {
        if is_prim {
            prim_node(raw)
        } else {
            prop_node(raw)
        }
    };

    let mut l = l;
    let mut r = r;
    let lcount = node(l).element_count as i32;
    let rcount = node(r).element_count as i32;

    if lcount == 0 || rcount == 0 {
        // A root is less than any deeper chain.
        return lcount.cmp(&rcount);
    }

    let mut diff = rcount - lcount;
    while diff < 0 {
        l = node(l).parent;
        diff += 1;
    }
    while diff > 0 {
        r = node(r).parent;
        diff -= 1;
    }

    if l == r {
        // Equal up to the shorter depth; the shallower path is less.
        return lcount.cmp(&rcount);
    }

    let mut lp = node(l).parent;
    let mut rp = node(r).parent;
    while lp != rp {
        l = lp;
        r = rp;
        lp = node(l).parent;
        rp = node(r).parent;
    }
    node(l).cmp_discriminant(node(r))
}

// =============================================================================
// Node replay
// =============================================================================

// Append the element carried by `raw` (from the prim or prop tree)
// onto `path` through the public append operations.
pub(crate) fn append_node(path: &Path, is_prim: bool, raw: u32) -> Path {
    let node: &PathNode = if is_prim { prim_node(raw) } else { prop_node(raw) };
    match node.node_type {
        NodeType::Prim => path.append_child(node.name()),
        NodeType::PrimProperty => path.append_property(node.name()),
        NodeType::PrimVariantSelection => {
            let (set, var) = node.variant_selection().expect("variant node");
            path.append_variant_selection(set.as_str(), var.as_str())
        }
        NodeType::Target => path.append_target(node.target_path().expect("target node")),
        NodeType::RelationalAttribute => path.append_relational_attribute(node.name()),
        NodeType::Mapper => path.append_mapper(node.target_path().expect("mapper node")),
        NodeType::MapperArg => path.append_mapper_arg(node.name()),
        NodeType::Expression => path.append_expression(),
        NodeType::Root => {
            tracing::error!("unexpected root node in path replay");
            Path::empty()
        }
    }
}

// =============================================================================
// Canonical string construction
// =============================================================================

fn build_path_string(prim: u32, prop: u32) -> String {
    if prim == relative_root() && prop == 0 {
        return ".".to_string();
    }

    let mut nodes: SmallVec<[&'static PathNode; 16]> = SmallVec::new();
    let mut cur = prop;
    while cur != 0 {
        nodes.push(prop_node(cur));
        cur = prop_node(cur).parent;
    }
    let root = if prim_node(prim).is_absolute() {
        absolute_root()
    } else {
        relative_root()
    };
    let mut cur = prim;
    while cur != 0 && cur != root {
        nodes.push(prim_node(cur));
        cur = prim_node(cur).parent;
    }

    let mut out = String::new();
    if prim_node(prim).is_absolute() {
        out.push('/');
    }

    let parent_token = Token::new("..");
    let mut prev_type: Option<NodeType> = None;
    let mut prev_name = Token::empty();
    for node in nodes.iter().rev() {
        // A '/' separates consecutive prim elements, and a prim
        // element ending in '..' from whatever follows.
        if prev_type == Some(NodeType::Prim)
            && (node.node_type == NodeType::Prim || prev_name == parent_token)
        {
            out.push('/');
        }
        node.write_element(&mut out);
        prev_name = node.name();
        prev_type = Some(node.node_type);
    }
    out
}

// =============================================================================
// Identifier validation
// =============================================================================

pub(crate) fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn is_valid_namespaced_identifier(s: &str) -> bool {
    !s.is_empty() && s.split(':').all(is_valid_identifier)
}

// =============================================================================
// Per-thread append caches
// =============================================================================

// Small open-addressed caches of recent appends. Entries hold owned
// node references, so a cached node cannot die while cached;
// overwriting a slot releases the old entries.

const PRIM_CACHE_SHIFT: u32 = 12;
const PRIM_CACHE_SIZE: usize = 1 << PRIM_CACHE_SHIFT;
const PROP_CACHE_SHIFT: u32 = 10;
const PROP_CACHE_SIZE: usize = 1 << PROP_CACHE_SHIFT;
const PROBE_SHIFT: u32 = 1;
const PROBES: usize = 1 << PROBE_SHIFT;

struct PrimCacheEntry {
    parent: PrimRef,
    result: PrimRef,
    name: Token,
}

struct PrimPathCache {
    entries: Vec<PrimCacheEntry>,
}

impl PrimPathCache {
    fn new() -> PrimPathCache {
        PrimPathCache {
            entries: Vec::new(),
        }
    }

    fn ensure_init(&mut self) {
        if self.entries.is_empty() {
            self.entries.resize_with(PRIM_CACHE_SIZE, || PrimCacheEntry {
                parent: PrimRef::NULL,
                result: PrimRef::NULL,
                name: Token::empty(),
            });
        }
    }

    fn find(&mut self, parent: u32, name: Token) -> (Option<u32>, usize) {
        self.ensure_init();
        let h = hash_combine(name.hash_value(), (parent >> 8) as u64);
        let index = (h as usize) & (PRIM_CACHE_SIZE - 1);
        for probe in 0..PROBES {
            let e = &self.entries[(index + probe) & (PRIM_CACHE_SIZE - 1)];
            if e.parent.raw() == parent && e.name == name {
                return (Some(e.result.raw()), index);
            }
            if e.parent.is_null() {
                break;
            }
        }
        (None, index)
    }

    fn store(&mut self, parent: u32, name: Token, result: u32, index: usize) {
        self.entries[index] = PrimCacheEntry {
            parent: PrimRef::from_borrowed(parent),
            result: PrimRef::from_borrowed(result),
            name,
        };
    }
}

struct PropCacheEntry {
    name: Token,
    result: PropRef,
}

struct PropPathCache {
    entries: Vec<PropCacheEntry>,
}

impl PropPathCache {
    fn new() -> PropPathCache {
        PropPathCache {
            entries: Vec::new(),
        }
    }

    fn ensure_init(&mut self) {
        if self.entries.is_empty() {
            self.entries.resize_with(PROP_CACHE_SIZE, || PropCacheEntry {
                name: Token::empty(),
                result: PropRef::NULL,
            });
        }
    }

    fn find(&mut self, name: Token) -> (Option<u32>, usize) {
        self.ensure_init();
        let index = (name.hash_value() as usize >> (32 - PROP_CACHE_SHIFT)) & (PROP_CACHE_SIZE - 1);
        for probe in 0..PROBES {
            let e = &self.entries[(index + probe) & (PROP_CACHE_SIZE - 1)];
            if e.name == name {
                return (Some(e.result.raw()), index);
            }
            if e.name.is_empty() {
                break;
            }
        }
        (None, index)
    }

    fn store(&mut self, name: Token, result: u32, index: usize) {
        self.entries[index] = PropCacheEntry {
            name,
            result: PropRef::from_borrowed(result),
        };
    }
}

thread_local! {
    static PRIM_PATH_CACHE: RefCell<PrimPathCache> = RefCell::new(PrimPathCache::new());
    static PROP_PATH_CACHE: RefCell<PropPathCache> = RefCell::new(PropPathCache::new());
}
