//! Ordered String-to-Value Dictionary
//!
//! A `Dictionary` maps string keys to erased [`Value`]s in sorted key
//! order, so iteration is deterministic. Empty dictionaries carry no
//! heap allocation; the backing map is created on first insert.
//!
//! Dictionaries nest: a value may itself hold a `Dictionary`, and the
//! path-addressed accessors (`get_value_at_path` and friends) descend
//! through nested dictionaries along `:`-delimited key paths. Setting
//! a path creates intermediate dictionaries as required; erasing a
//! path removes sub-dictionaries that become empty, bottom-up.
//!
//! Overlay composition combines a stronger dictionary over a weaker
//! one, optionally coercing the stronger value to the weaker value's
//! type, and optionally recursing into nested dictionaries instead of
//! replacing them wholesale.

use crate::value::Value;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fmt;

/// Key-path delimiter for the path-addressed accessors.
pub const KEY_PATH_DELIMITER: char = ':';

static EMPTY_TABLE: Lazy<BTreeMap<String, Value>> = Lazy::new(BTreeMap::new);

/// An ordered mapping from string keys to erased values.
#[derive(Default)]
pub struct Dictionary {
    table: Option<Box<BTreeMap<String, Value>>>,
}

impl Dictionary {
    /// An empty dictionary. Allocates nothing.
    pub const fn new() -> Dictionary {
        Dictionary { table: None }
    }

    fn table(&self) -> &BTreeMap<String, Value> {
        self.table.as_deref().unwrap_or(&EMPTY_TABLE)
    }

    fn table_mut(&mut self) -> &mut BTreeMap<String, Value> {
        self.table.get_or_insert_with(|| Box::new(BTreeMap::new()))
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.table().contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.table().get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.table.as_deref_mut().and_then(|t| t.get_mut(key))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.table_mut().insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        match self.table.as_deref_mut() {
            Some(t) => t.remove(key),
            None => None,
        }
    }

    pub fn clear(&mut self) {
        self.table = None;
    }

    pub fn iter(&self) -> std::collections::btree_map::Iter<'_, String, Value> {
        self.table().iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.table().keys()
    }

    // =========================================================================
    // Path-addressed access
    // =========================================================================

    /// Look up a `:`-delimited key path, descending through nested
    /// dictionaries.
    pub fn get_value_at_path(&self, key_path: &str) -> Option<&Value> {
        self.get_value_at_path_elems(&split_key_path(key_path))
    }

    /// Pre-split variant of [`Dictionary::get_value_at_path`].
    pub fn get_value_at_path_elems(&self, elems: &[&str]) -> Option<&Value> {
        let (first, rest) = elems.split_first()?;
        let value = self.get(first)?;
        if rest.is_empty() {
            return Some(value);
        }
        value.get::<Dictionary>()?.get_value_at_path_elems(rest)
    }

    /// Set the value at a `:`-delimited key path, creating intermediate
    /// dictionaries as required.
    pub fn set_value_at_path(&mut self, key_path: &str, value: impl Into<Value>) {
        let elems = split_key_path(key_path);
        if elems.is_empty() {
            return;
        }
        self.set_value_at_path_elems(&elems, value.into());
    }

    /// Pre-split variant of [`Dictionary::set_value_at_path`].
    pub fn set_value_at_path_elems(&mut self, elems: &[&str], value: Value) {
        let Some((first, rest)) = elems.split_first() else {
            return;
        };
        if rest.is_empty() {
            self.insert(*first, value);
            return;
        }
        // Descend, replacing any non-dictionary intermediate value.
        let entry = self
            .table_mut()
            .entry((*first).to_string())
            .or_insert_with(|| Value::new(Dictionary::new()));
        if !entry.is_holding::<Dictionary>() {
            *entry = Value::new(Dictionary::new());
        }
        entry
            .get_mut::<Dictionary>()
            .expect("entry was just made a dictionary")
            .set_value_at_path_elems(rest, value);
    }

    /// Erase the value at a `:`-delimited key path. Sub-dictionaries
    /// left empty by the erase are removed, bottom-up.
    pub fn erase_value_at_path(&mut self, key_path: &str) {
        let elems = split_key_path(key_path);
        if !elems.is_empty() {
            self.erase_value_at_path_elems(&elems);
        }
    }

    /// Pre-split variant of [`Dictionary::erase_value_at_path`].
    pub fn erase_value_at_path_elems(&mut self, elems: &[&str]) {
        let Some((first, rest)) = elems.split_first() else {
            return;
        };
        if rest.is_empty() {
            self.remove(first);
            return;
        }
        let mut now_empty = false;
        if let Some(sub) = self.get_mut(first).and_then(|v| v.get_mut::<Dictionary>()) {
            sub.erase_value_at_path_elems(rest);
            now_empty = sub.is_empty();
        }
        if now_empty {
            self.remove(first);
        }
    }
}

fn split_key_path(key_path: &str) -> Vec<&str> {
    if key_path.is_empty() {
        Vec::new()
    } else {
        key_path.split(KEY_PATH_DELIMITER).collect()
    }
}

impl Clone for Dictionary {
    fn clone(&self) -> Self {
        Dictionary {
            table: self.table.clone(),
        }
    }
}

impl PartialEq for Dictionary {
    fn eq(&self, other: &Self) -> bool {
        self.table() == other.table()
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a Dictionary {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Value>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<(String, Value)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let table: BTreeMap<String, Value> = iter.into_iter().collect();
        if table.is_empty() {
            Dictionary::new()
        } else {
            Dictionary {
                table: Some(Box::new(table)),
            }
        }
    }
}

// =============================================================================
// Overlay composition
// =============================================================================

/// Compose `strong` over `weak`: the result has every key of both,
/// with `strong`'s value winning where keys collide.
///
/// If `coerce_to_weaker_type` is set, a winning strong value is cast
/// to the type of the weak value it shadowed; a failed cast stores the
/// empty value so the mismatch is observable.
pub fn dictionary_over(
    strong: &Dictionary,
    weak: &Dictionary,
    coerce_to_weaker_type: bool,
) -> Dictionary {
    let mut result = strong.clone();
    dictionary_over_in_place(&mut result, weak, coerce_to_weaker_type);
    result
}

/// In-place variant of [`dictionary_over`]; `strong` becomes the
/// composed result.
pub fn dictionary_over_in_place(
    strong: &mut Dictionary,
    weak: &Dictionary,
    coerce_to_weaker_type: bool,
) {
    for (k, weak_value) in weak.iter() {
        match strong.get(k) {
            None => {
                strong.insert(k.clone(), weak_value.clone());
            }
            Some(strong_value) => {
                if coerce_to_weaker_type {
                    let coerced = strong_value
                        .cast_to_type_of(weak_value)
                        .unwrap_or_else(Value::empty);
                    strong.insert(k.clone(), coerced);
                }
            }
        }
    }
}

/// Compose `strong` over `weak`, recursing where both sides hold
/// nested dictionaries instead of letting the strong side replace the
/// weak subtree.
pub fn dictionary_over_recursive(
    strong: &Dictionary,
    weak: &Dictionary,
    coerce_to_weaker_type: bool,
) -> Dictionary {
    let mut result = strong.clone();
    dictionary_over_recursive_in_place(&mut result, weak, coerce_to_weaker_type);
    result
}

/// In-place variant of [`dictionary_over_recursive`].
pub fn dictionary_over_recursive_in_place(
    strong: &mut Dictionary,
    weak: &Dictionary,
    coerce_to_weaker_type: bool,
) {
    for (k, weak_value) in weak.iter() {
        let both_dicts = weak_value.is_holding::<Dictionary>()
            && strong.get(k).is_some_and(|v| v.is_holding::<Dictionary>());
        if both_dicts {
            let weak_sub = weak_value
                .get::<Dictionary>()
                .expect("weak value checked to hold a dictionary");
            // Swap the nested dictionary out, compose, swap back;
            // avoids cloning the strong subtree.
            let mut strong_sub = Dictionary::new();
            let slot = strong
                .get_mut(k)
                .and_then(|v| v.get_mut::<Dictionary>())
                .expect("strong value checked to hold a dictionary");
            std::mem::swap(slot, &mut strong_sub);
            dictionary_over_recursive_in_place(&mut strong_sub, weak_sub, coerce_to_weaker_type);
            let slot = strong
                .get_mut(k)
                .and_then(|v| v.get_mut::<Dictionary>())
                .expect("strong value still holds a dictionary");
            std::mem::swap(slot, &mut strong_sub);
        } else {
            match strong.get(k) {
                None => {
                    strong.insert(k.clone(), weak_value.clone());
                }
                Some(strong_value) => {
                    if coerce_to_weaker_type {
                        let coerced = strong_value
                            .cast_to_type_of(weak_value)
                            .unwrap_or_else(Value::empty);
                        strong.insert(k.clone(), coerced);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ensure_standard_casts;

    fn dict(pairs: &[(&str, i64)]) -> Dictionary {
        let mut d = Dictionary::new();
        for (k, v) in pairs {
            d.insert(*k, Value::new(*v));
        }
        d
    }

    #[test]
    fn test_empty_dictionary_has_no_allocation() {
        let d = Dictionary::new();
        assert!(d.is_empty());
        assert!(d.table.is_none());
        assert_eq!(d.len(), 0);
    }

    #[test]
    fn test_insert_get_remove() {
        let mut d = Dictionary::new();
        d.insert("a", Value::new(1i64));
        assert_eq!(d.get("a").unwrap().get::<i64>(), Some(&1));
        assert!(d.contains_key("a"));
        assert_eq!(d.remove("a").unwrap().get::<i64>(), Some(&1));
        assert!(d.is_empty());
    }

    #[test]
    fn test_iteration_is_sorted() {
        let d = dict(&[("c", 3), ("a", 1), ("b", 2)]);
        let keys: Vec<&str> = d.keys().map(|s| s.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_path_get_descends_nested_dicts() {
        let mut inner = Dictionary::new();
        inner.insert("leaf", Value::new(7i64));
        let mut outer = Dictionary::new();
        outer.insert("inner", Value::new(inner));

        assert_eq!(
            outer.get_value_at_path("inner:leaf").unwrap().get::<i64>(),
            Some(&7)
        );
        assert!(outer.get_value_at_path("inner:missing").is_none());
        assert!(outer.get_value_at_path("missing:leaf").is_none());
    }

    #[test]
    fn test_path_set_creates_intermediates() {
        let mut d = Dictionary::new();
        d.set_value_at_path("a:b:c", Value::new(1i64));
        assert_eq!(d.get_value_at_path("a:b:c").unwrap().get::<i64>(), Some(&1));
        assert!(d.get("a").unwrap().is_holding::<Dictionary>());
    }

    #[test]
    fn test_path_set_replaces_non_dict_intermediate() {
        let mut d = Dictionary::new();
        d.insert("a", Value::new(5i64));
        d.set_value_at_path("a:b", Value::new(1i64));
        assert_eq!(d.get_value_at_path("a:b").unwrap().get::<i64>(), Some(&1));
    }

    #[test]
    fn test_path_erase_removes_empty_subdicts() {
        let mut d = Dictionary::new();
        d.set_value_at_path("a:b:c", Value::new(1i64));
        d.set_value_at_path("a:keep", Value::new(2i64));
        d.erase_value_at_path("a:b:c");
        // "a:b" became empty and was removed; "a" still has "keep".
        assert!(d.get_value_at_path("a:b").is_none());
        assert!(d.get_value_at_path("a:keep").is_some());

        d.erase_value_at_path("a:keep");
        assert!(d.is_empty());
    }

    #[test]
    fn test_over_strong_wins() {
        let strong = dict(&[("x", 1), ("shared", 10)]);
        let weak = dict(&[("y", 2), ("shared", 20)]);
        let composed = dictionary_over(&strong, &weak, false);
        assert_eq!(composed.get("x").unwrap().get::<i64>(), Some(&1));
        assert_eq!(composed.get("y").unwrap().get::<i64>(), Some(&2));
        assert_eq!(composed.get("shared").unwrap().get::<i64>(), Some(&10));
    }

    #[test]
    fn test_over_coerces_to_weaker_type() {
        ensure_standard_casts();
        let mut strong = Dictionary::new();
        strong.insert("n", Value::new(1i32));
        let mut weak = Dictionary::new();
        weak.insert("n", Value::new(2.5f64));
        let composed = dictionary_over(&strong, &weak, true);
        assert_eq!(composed.get("n").unwrap().get::<f64>(), Some(&1.0));
    }

    #[test]
    fn test_over_recursive_composes_subtrees() {
        let mut strong_inner = Dictionary::new();
        strong_inner.insert("s", Value::new(1i64));
        let mut strong = Dictionary::new();
        strong.insert("sub", Value::new(strong_inner));

        let mut weak_inner = Dictionary::new();
        weak_inner.insert("w", Value::new(2i64));
        let mut weak = Dictionary::new();
        weak.insert("sub", Value::new(weak_inner));

        let composed = dictionary_over_recursive(&strong, &weak, false);
        let sub = composed.get("sub").unwrap().get::<Dictionary>().unwrap();
        assert_eq!(sub.get("s").unwrap().get::<i64>(), Some(&1));
        assert_eq!(sub.get("w").unwrap().get::<i64>(), Some(&2));

        // Non-recursive overlay would have replaced the subtree.
        let flat = dictionary_over(&strong, &weak, false);
        let sub = flat.get("sub").unwrap().get::<Dictionary>().unwrap();
        assert!(sub.get("w").is_none());
    }
}
