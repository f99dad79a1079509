//! The Flat Spec/Field Store
//!
//! A `SpecStore` is a hash map from path to spec, where each spec is a
//! type tag plus a shared, deduplicated vector of (field name, value)
//! pairs. Specs loaded from the same on-disk field set share one
//! vector until a mutation detaches it.
//!
//! ## Synthesized target and connection specs
//!
//! Relationship-target and connection specs are never stored. Their
//! existence is derived from the owning property's `targetPaths` or
//! `connectionPaths` list-op: membership in the explicit items (for
//! explicit ops) or in the added/prepended/appended items (otherwise).
//! Setting a field on such a spec is a coding error; the synthesized
//! `relationshipTargetChildren` / `connectionChildren` fields answer
//! queries by applying the list-op in order.
//!
//! ## Concurrency
//!
//! Reads of one store may run concurrently; mutation requires outside
//! serialization (`&mut self` encodes exactly that).

use crate::error::CrateError;
use crate::format::VERSION_TARGET_SPECS_ELIDED;
use crate::payload::{from_payload_list_op_value, to_payload_list_op_value};
use crate::reader::{FileData, PathListOp, detach_value};
use crate::shared::Shared;
use crate::spec_type::{SpecType, fields};
use crate::timesamples::{
    TimeSampleMap, TimeSamples, bracketing_times, make_time_sample_map, make_time_samples,
};
use crate::writer::Writer;
use std::collections::HashMap;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use strata_core::{Array, Token, Value};
use strata_path::Path;
use tracing::error;

type FieldVec = Vec<(Token, Value)>;

struct Spec {
    spec_type: SpecType,
    fields: Shared<FieldVec>,
}

/// An in-memory spec store, optionally backed by an open crate file
/// for lazy value materialization.
pub struct SpecStore {
    data: HashMap<Path, Spec>,
    asset_path: Option<PathBuf>,
    detached: bool,
    file: Option<Arc<FileData>>,
}

impl SpecStore {
    /// An empty store with no backing file.
    pub fn new() -> SpecStore {
        SpecStore {
            data: HashMap::new(),
            asset_path: None,
            detached: true,
            file: None,
        }
    }

    /// Populate a store from a crate file.
    ///
    /// With `detached` set, all bytes are copied out and the file is
    /// independent of the filesystem object; otherwise values
    /// materialize lazily from a read-only mapping.
    pub fn open(asset_path: impl AsRef<FsPath>, detached: bool) -> Result<SpecStore, CrateError> {
        let asset_path = asset_path.as_ref();
        let file = FileData::open(asset_path, detached)?;

        let mut data = HashMap::with_capacity(file.specs.len() + (file.specs.len() >> 2));
        let mut live_fieldsets: HashMap<u32, Shared<FieldVec>> = HashMap::new();

        // Old files may carry target specs; they are synthesized now.
        let elide_targets = file.version < VERSION_TARGET_SPECS_ELIDED;

        for spec in &file.specs {
            let path = file.paths[spec.path as usize].clone();
            if elide_targets && path.is_target_path() {
                continue;
            }
            let fields = live_fieldsets
                .entry(spec.fieldset)
                .or_insert_with(|| {
                    let mut v: FieldVec = Vec::new();
                    let mut i = spec.fieldset as usize;
                    while file.fieldsets[i] != crate::format::FIELD_INDEX_SENTINEL {
                        let record = file.fields[file.fieldsets[i] as usize];
                        let token = file.tokens[record.token as usize];
                        v.push((token, FileData::unpack_for_field(&file, record.rep)));
                        i += 1;
                    }
                    Shared::new(v)
                })
                .clone();
            data.insert(
                path,
                Spec {
                    spec_type: SpecType::from_u32(spec.spec_type),
                    fields,
                },
            );
        }

        Ok(SpecStore {
            data,
            asset_path: Some(asset_path.to_path_buf()),
            detached,
            file: Some(file),
        })
    }

    /// The asset this store was opened from or last saved to.
    pub fn asset_path(&self) -> Option<&FsPath> {
        self.asset_path.as_deref()
    }

    /// True while values may still reference an open file mapping.
    pub fn streams_data(&self) -> bool {
        self.file.as_ref().is_some_and(|f| !f.detached)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    // =========================================================================
    // Save
    // =========================================================================

    /// Write to the backing asset path and repopulate from the written
    /// file (the store may pick up a newer negotiated file version).
    pub fn save(&mut self) -> Result<(), CrateError> {
        let Some(path) = self.asset_path.clone() else {
            return Err(CrateError::Coding(
                "store has no asset path; use save_as".to_string(),
            ));
        };
        self.save_as(path)
    }

    /// Write to `path` and repopulate from the written file.
    pub fn save_as(&mut self, path: impl AsRef<FsPath>) -> Result<(), CrateError> {
        let path = path.as_ref();
        self.write_file(path)?;
        *self = SpecStore::open(path, self.detached)?;
        Ok(())
    }

    /// Write to `path` without touching this live store.
    pub fn export(&self, path: impl AsRef<FsPath>) -> Result<(), CrateError> {
        self.write_file(path.as_ref()).map(|_| ())
    }

    fn write_file(&self, path: &FsPath) -> Result<crate::format::Version, CrateError> {
        // Sort for a namespace-grouped layout: prim paths first, then
        // property paths grouped by property name so shared field sets
        // land close together.
        let mut sorted: Vec<&Path> = self.data.keys().collect();
        sorted.sort_by(|p1, p2| {
            use std::cmp::Ordering;
            let p1_is_prop = p1.is_property_path();
            let p2_is_prop = p2.is_property_path();
            match (p1_is_prop, p2_is_prop) {
                (false, true) => Ordering::Less,
                (true, false) => Ordering::Greater,
                (true, true) => match p1.name_token().cmp(&p2.name_token()) {
                    Ordering::Equal => p1.cmp(p2),
                    o => o,
                },
                (false, false) => p1.cmp(p2),
            }
        });

        let mut writer = Writer::new();
        for path in sorted {
            let spec = &self.data[path];
            writer.pack_spec(path, spec.spec_type, spec.fields.get())?;
        }
        writer.write_to(path)
    }

    // =========================================================================
    // Specs
    // =========================================================================

    pub fn has_spec(&self, path: &Path) -> bool {
        if path.is_target_path() {
            return self.has_target_or_connection_spec(path);
        }
        self.data.contains_key(path)
    }

    pub fn create_spec(&mut self, path: &Path, spec_type: SpecType) {
        if spec_type == SpecType::Unknown {
            error!(%path, "cannot create a spec of unknown type");
            return;
        }
        if path.is_target_path() {
            // Target and connection specs are synthesized, not stored.
            return;
        }
        self.data.insert(
            path.clone(),
            Spec {
                spec_type,
                fields: Shared::default(),
            },
        );
    }

    pub fn erase_spec(&mut self, path: &Path) {
        if path.is_target_path() {
            return;
        }
        if self.data.remove(path).is_none() {
            error!(%path, "erase_spec on nonexistent spec");
        }
    }

    pub fn move_spec(&mut self, old_path: &Path, new_path: &Path) {
        if old_path.is_target_path() {
            return;
        }
        match self.data.remove(old_path) {
            Some(spec) => {
                self.data.insert(new_path.clone(), spec);
            }
            None => error!(old = %old_path, "move_spec on nonexistent spec"),
        }
    }

    pub fn spec_type(&self, path: &Path) -> SpecType {
        if *path == Path::absolute_root_path() {
            return SpecType::PseudoRoot;
        }
        if path.is_target_path() {
            if self.has_target_or_connection_spec(path) {
                let parent_type = self.spec_type(&path.parent_path());
                return match parent_type {
                    SpecType::Relationship => SpecType::RelationshipTarget,
                    SpecType::Attribute => SpecType::Connection,
                    _ => SpecType::Unknown,
                };
            }
            return SpecType::Unknown;
        }
        self.data
            .get(path)
            .map_or(SpecType::Unknown, |s| s.spec_type)
    }

    /// Visit every spec (and every synthesized target/connection
    /// spec). The visitor returns false to stop.
    pub fn visit_specs(&self, mut visitor: impl FnMut(&Path, SpecType) -> bool) {
        for (path, spec) in &self.data {
            if !visitor(path, spec.spec_type) {
                return;
            }
            if matches!(spec.spec_type, SpecType::Attribute | SpecType::Relationship) {
                if let Some((parent_type, op)) = self.target_or_connection_list_op(path) {
                    let mut targets: Vec<Path> = if op.is_explicit() {
                        op.explicit_items().to_vec()
                    } else {
                        let mut v: Vec<Path> = op
                            .added_items()
                            .iter()
                            .chain(op.prepended_items())
                            .chain(op.appended_items())
                            .cloned()
                            .collect();
                        v.sort();
                        v.dedup();
                        v
                    };
                    let synthesized_type = match parent_type {
                        SpecType::Relationship => SpecType::RelationshipTarget,
                        _ => SpecType::Connection,
                    };
                    for t in targets.drain(..) {
                        let tp = path.append_target(&t);
                        if !visitor(&tp, synthesized_type) {
                            return;
                        }
                    }
                }
            }
        }
    }

    // =========================================================================
    // Fields
    // =========================================================================

    /// Field names on a spec, including the synthesized children
    /// fields of connected properties.
    pub fn list(&self, path: &Path) -> Vec<Token> {
        let mut names = Vec::new();
        if let Some(spec) = self.data.get(path) {
            names.extend(spec.fields.get().iter().map(|(t, _)| *t));
            if path.is_prim_property_path() {
                match self.target_or_connection_list_op(path) {
                    Some((SpecType::Relationship, _)) => {
                        names.push(fields::relationship_target_children());
                    }
                    Some((SpecType::Attribute, _)) => {
                        names.push(fields::connection_children());
                    }
                    _ => {}
                }
            }
        }
        names
    }

    pub fn has(&self, path: &Path, field: Token) -> bool {
        if self.get_field_value(path, field).is_some() {
            return true;
        }
        if field == fields::connection_children() || field == fields::relationship_target_children()
        {
            return self.target_or_connection_list_op(path).is_some();
        }
        false
    }

    /// The value of a field, fully materialized; empty when absent.
    /// `timeSamples` answers in its public map form and `payload` as a
    /// list-op.
    pub fn get(&self, path: &Path, field: Token) -> Value {
        if let Some(stored) = self.get_field_value(path, field) {
            let value = detach_value(stored);
            if field == fields::time_samples() {
                return make_time_sample_map_value(&value);
            }
            if field == fields::payload() {
                return to_payload_list_op_value(value);
            }
            return value;
        }
        if field == fields::connection_children() || field == fields::relationship_target_children()
        {
            if let Some((_, op)) = self.target_or_connection_list_op(path) {
                return Value::new(Array::from_vec(op.apply_to_empty()));
            }
        }
        Value::empty()
    }

    /// One query answering both the spec's type and a field's value.
    pub fn has_spec_and_field(&self, path: &Path, field: Token) -> (SpecType, Value) {
        let spec_type = self
            .data
            .get(path)
            .map_or(SpecType::Unknown, |s| s.spec_type);
        (spec_type, self.get(path, field))
    }

    pub fn set(&mut self, path: &Path, field: Token, value: Value) {
        if value.is_empty() {
            self.erase(path, field);
            return;
        }
        if path.is_target_path() {
            error!(
                %path,
                field = field.as_str(),
                "cannot set fields on relationship target or attribute connection specs"
            );
            return;
        }
        if field == fields::connection_children() || field == fields::relationship_target_children()
        {
            // Synthesized from the list ops; silently do nothing.
            return;
        }

        let converted = if field == fields::time_samples() {
            make_time_samples_value(value)
        } else if field == fields::payload() {
            // Stored old-version-compatible whenever semantics allow.
            from_payload_list_op_value(value)
        } else {
            value
        };

        let Some(spec) = self.data.get_mut(path) else {
            error!(%path, field = field.as_str(), "set on nonexistent spec");
            return;
        };
        let fields_vec = spec.fields.get_mut();
        for slot in fields_vec.iter_mut() {
            if slot.0 == field {
                slot.1 = converted;
                return;
            }
        }
        fields_vec.push((field, converted));
    }

    pub fn erase(&mut self, path: &Path, field: Token) {
        let Some(spec) = self.data.get_mut(path) else {
            return;
        };
        if let Some(i) = spec.fields.get().iter().position(|(t, _)| *t == field) {
            spec.fields.get_mut().remove(i);
        }
    }

    // =========================================================================
    // Time samples
    // =========================================================================

    /// The union of every spec's sample times, sorted and deduplicated.
    pub fn list_all_time_samples(&self) -> Vec<f64> {
        let mut all: Vec<f64> = Vec::new();
        for path in self.data.keys() {
            all.extend_from_slice(&self.list_time_samples_for_path(path));
        }
        all.sort_by(|a, b| a.partial_cmp(b).expect("sample times are finite"));
        all.dedup();
        all
    }

    pub fn list_time_samples_for_path(&self, path: &Path) -> Vec<f64> {
        match self.get_time_samples(path) {
            Some(ts) => ts.times().to_vec(),
            None => Vec::new(),
        }
    }

    pub fn num_time_samples_for_path(&self, path: &Path) -> usize {
        self.get_time_samples(path).map_or(0, |ts| ts.len())
    }

    pub fn bracketing_time_samples(&self, time: f64) -> Option<(f64, f64)> {
        bracketing_times(&self.list_all_time_samples(), time)
    }

    pub fn bracketing_time_samples_for_path(&self, path: &Path, time: f64) -> Option<(f64, f64)> {
        bracketing_times(&self.list_time_samples_for_path(path), time)
    }

    /// The value sampled at exactly `time`, if present.
    pub fn query_time_sample(&self, path: &Path, time: f64) -> Option<Value> {
        let ts = self.get_time_samples(path)?;
        let i = ts.lower_bound(time).ok()?;
        Some(detach_value(&ts.values[i]))
    }

    /// Insert or replace the sample at `time`. An empty value erases.
    pub fn set_time_sample(&mut self, path: &Path, time: f64, value: Value) {
        if value.is_empty() {
            self.erase_time_sample(path, time);
            return;
        }

        if self.get_field_value(path, fields::time_samples()).is_some() {
            let field_value = self
                .get_mutable_field_value(path, fields::time_samples())
                .expect("field presence just checked");
            if let Some(ts) = field_value.get_mut::<TimeSamples>() {
                ts.insert(time, value);
            } else {
                let mut ts = TimeSamples::default();
                ts.insert(time, value);
                *field_value = Value::new(ts);
            }
        } else {
            let mut ts = TimeSamples::default();
            ts.insert(time, value);
            self.set(path, fields::time_samples(), Value::new(ts));
        }
    }

    /// Remove the sample at exactly `time`. Removing the last sample
    /// removes the whole field.
    pub fn erase_time_sample(&mut self, path: &Path, time: f64) {
        let remove_field = {
            let Some(field_value) = self.get_mutable_field_value(path, fields::time_samples())
            else {
                return;
            };
            let Some(ts) = field_value.get_mut::<TimeSamples>() else {
                return;
            };
            if !ts.remove(time) {
                return;
            }
            ts.is_empty()
        };
        if remove_field {
            self.erase(path, fields::time_samples());
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn get_field_value(&self, path: &Path, field: Token) -> Option<&Value> {
        let spec = self.data.get(path)?;
        spec.fields
            .get()
            .iter()
            .find(|(t, _)| *t == field)
            .map(|(_, v)| v)
    }

    // Detaches the spec's field vector if shared, and materializes a
    // lazy stored value in place before handing out the reference.
    fn get_mutable_field_value(&mut self, path: &Path, field: Token) -> Option<&mut Value> {
        let spec = self.data.get_mut(path)?;
        let fields_vec = spec.fields.get_mut();
        let slot = fields_vec.iter_mut().find(|(t, _)| *t == field)?;
        let materialized = detach_value(&slot.1);
        slot.1 = materialized;
        Some(&mut slot.1)
    }

    fn get_time_samples(&self, path: &Path) -> Option<TimeSamples> {
        let value = self.get_field_value(path, fields::time_samples())?;
        let value = detach_value(value);
        value.get::<TimeSamples>().cloned()
    }

    // The targetPaths (or connectionPaths) list-op on a property,
    // tagged with which of the two it was.
    fn target_or_connection_list_op(&self, path: &Path) -> Option<(SpecType, PathListOp)> {
        if !path.is_prim_property_path() {
            return None;
        }
        if let Some(v) = self.get_field_value(path, fields::target_paths()) {
            let v = detach_value(v);
            if let Some(op) = v.get::<PathListOp>() {
                return Some((SpecType::Relationship, op.clone()));
            }
            return None;
        }
        if let Some(v) = self.get_field_value(path, fields::connection_paths()) {
            let v = detach_value(v);
            if let Some(op) = v.get::<PathListOp>() {
                return Some((SpecType::Attribute, op.clone()));
            }
        }
        None
    }

    // Presence is membership in the owning property's list-op: the
    // explicit set for explicit ops, the added/prepended/appended sets
    // otherwise.
    fn has_target_or_connection_spec(&self, path: &Path) -> bool {
        let parent = path.parent_path();
        let target = path.target_path();
        match self.target_or_connection_list_op(&parent) {
            Some((_, op)) => op.contributes(&target),
            None => false,
        }
    }
}

impl Default for SpecStore {
    fn default() -> Self {
        SpecStore::new()
    }
}

// Convert a stored internal time-sample value to the public map form,
// materializing each sample value.
fn make_time_sample_map_value(value: &Value) -> Value {
    if let Some(ts) = value.get::<TimeSamples>() {
        return Value::new(make_time_sample_map(ts, detach_value));
    }
    value.clone()
}

// Convert a public map value to internal storage on write.
fn make_time_samples_value(value: Value) -> Value {
    if let Some(map) = value.get::<TimeSampleMap>() {
        return Value::new(make_time_samples(map));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    fn store_with_prim() -> SpecStore {
        let mut store = SpecStore::new();
        store.create_spec(&Path::absolute_root_path(), SpecType::PseudoRoot);
        store.create_spec(&p("/A"), SpecType::Prim);
        store
    }

    #[test]
    fn test_create_and_query_specs() {
        let store = store_with_prim();
        assert!(store.has_spec(&p("/A")));
        assert_eq!(store.spec_type(&p("/A")), SpecType::Prim);
        assert_eq!(store.spec_type(&Path::absolute_root_path()), SpecType::PseudoRoot);
        assert_eq!(store.spec_type(&p("/Nope")), SpecType::Unknown);
    }

    #[test]
    fn test_set_get_erase_field() {
        let mut store = store_with_prim();
        let field = Token::new("documentation");
        store.set(&p("/A"), field, Value::new(String::from("doc")));
        assert!(store.has(&p("/A"), field));
        assert_eq!(store.get(&p("/A"), field).get::<String>().unwrap(), "doc");
        assert_eq!(store.list(&p("/A")), vec![field]);

        store.erase(&p("/A"), field);
        assert!(!store.has(&p("/A"), field));
        assert!(store.get(&p("/A"), field).is_empty());
    }

    #[test]
    fn test_set_empty_value_erases() {
        let mut store = store_with_prim();
        let field = Token::new("x");
        store.set(&p("/A"), field, Value::new(1i64));
        store.set(&p("/A"), field, Value::empty());
        assert!(!store.has(&p("/A"), field));
    }

    #[test]
    fn test_set_on_missing_spec_is_an_error_noop() {
        let mut store = SpecStore::new();
        store.set(&p("/Missing"), Token::new("f"), Value::new(1i64));
        assert!(!store.has_spec(&p("/Missing")));
    }

    #[test]
    fn test_move_and_erase_spec() {
        let mut store = store_with_prim();
        store.set(&p("/A"), Token::new("f"), Value::new(7i64));
        store.move_spec(&p("/A"), &p("/B"));
        assert!(!store.has_spec(&p("/A")));
        assert_eq!(store.get(&p("/B"), Token::new("f")).get::<i64>(), Some(&7));
        store.erase_spec(&p("/B"));
        assert!(!store.has_spec(&p("/B")));
    }

    #[test]
    fn test_target_spec_synthesis() {
        let mut store = store_with_prim();
        let rel = p("/A.rel");
        store.create_spec(&rel, SpecType::Relationship);
        let mut op = PathListOp::new();
        op.set_explicit_items(vec![p("/B")]);
        store.set(&rel, fields::target_paths(), Value::new(op));

        let target_spec = p("/A.rel[/B]");
        assert!(store.has_spec(&target_spec));
        assert_eq!(store.spec_type(&target_spec), SpecType::RelationshipTarget);
        assert!(!store.has_spec(&p("/A.rel[/C]")));

        // Setting a field on a synthesized spec is rejected.
        store.set(&target_spec, Token::new("metadata"), Value::new(1i64));
        assert!(!store.has(&target_spec, Token::new("metadata")));
    }

    #[test]
    fn test_target_children_synthesis() {
        let mut store = store_with_prim();
        let rel = p("/A.rel");
        store.create_spec(&rel, SpecType::Relationship);
        let mut op = PathListOp::new();
        op.set_appended_items(vec![p("/B"), p("/C")]);
        store.set(&rel, fields::target_paths(), Value::new(op));

        let children_field = fields::relationship_target_children();
        assert!(store.has(&rel, children_field));
        assert!(store.list(&rel).contains(&children_field));
        let children = store.get(&rel, children_field);
        let arr = children.get::<Array<Path>>().unwrap();
        assert_eq!(arr.as_slice(), &[p("/B"), p("/C")]);

        // The synthesized field cannot be set.
        store.set(&rel, children_field, Value::new(1i64));
        let still = store.get(&rel, children_field);
        assert!(still.get::<Array<Path>>().is_some());
    }

    #[test]
    fn test_connection_spec_synthesis() {
        let mut store = store_with_prim();
        let attr = p("/A.attr");
        store.create_spec(&attr, SpecType::Attribute);
        let mut op = PathListOp::new();
        op.set_explicit_items(vec![p("/Src.out")]);
        store.set(&attr, fields::connection_paths(), Value::new(op));

        let conn = p("/A.attr[/Src.out]");
        assert!(store.has_spec(&conn));
        assert_eq!(store.spec_type(&conn), SpecType::Connection);
        assert!(store.has(&attr, fields::connection_children()));
    }

    #[test]
    fn test_time_sample_scenario() {
        let mut store = store_with_prim();
        let attr = p("/A.attr");
        store.create_spec(&attr, SpecType::Attribute);

        store.set_time_sample(&attr, 0.0, Value::new(1.0f64));
        store.set_time_sample(&attr, 1.0, Value::new(2.0f64));

        assert_eq!(
            store.query_time_sample(&attr, 0.0).unwrap().get::<f64>(),
            Some(&1.0)
        );
        assert!(store.query_time_sample(&attr, 0.5).is_none());
        assert_eq!(store.list_time_samples_for_path(&attr), vec![0.0, 1.0]);
        assert_eq!(store.num_time_samples_for_path(&attr), 2);

        // Duplicate time replaces without growing.
        store.set_time_sample(&attr, 0.0, Value::new(10.0f64));
        assert_eq!(store.num_time_samples_for_path(&attr), 2);
        assert_eq!(
            store.query_time_sample(&attr, 0.0).unwrap().get::<f64>(),
            Some(&10.0)
        );

        store.erase_time_sample(&attr, 0.0);
        assert_eq!(store.list_time_samples_for_path(&attr), vec![1.0]);
        assert!(store.has(&attr, fields::time_samples()));

        // Removing the last sample removes the whole field.
        store.erase_time_sample(&attr, 1.0);
        assert!(!store.has(&attr, fields::time_samples()));
    }

    #[test]
    fn test_time_samples_public_form_is_a_map() {
        let mut store = store_with_prim();
        let attr = p("/A.attr");
        store.create_spec(&attr, SpecType::Attribute);
        store.set_time_sample(&attr, 1.0, Value::new(2.0f64));

        let v = store.get(&attr, fields::time_samples());
        let map = v.get::<TimeSampleMap>().unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(1.0).unwrap().get::<f64>(), Some(&2.0));

        // Setting through the public map form converts to internal.
        let mut map = TimeSampleMap::new();
        map.set(5.0, Value::new(7.0f64));
        store.set(&attr, fields::time_samples(), Value::new(map));
        assert_eq!(store.list_time_samples_for_path(&attr), vec![5.0]);
    }

    #[test]
    fn test_bracketing_queries() {
        let mut store = store_with_prim();
        let a = p("/A.x");
        let b = p("/A.y");
        store.create_spec(&a, SpecType::Attribute);
        store.create_spec(&b, SpecType::Attribute);
        store.set_time_sample(&a, 0.0, Value::new(1i64));
        store.set_time_sample(&b, 2.0, Value::new(2i64));

        assert_eq!(store.list_all_time_samples(), vec![0.0, 2.0]);
        assert_eq!(store.bracketing_time_samples(1.0), Some((0.0, 2.0)));
        assert_eq!(store.bracketing_time_samples_for_path(&a, 5.0), Some((0.0, 0.0)));
        assert_eq!(store.bracketing_time_samples_for_path(&p("/A.z"), 0.0), None);
    }

    #[test]
    fn test_payload_round_trips_as_list_op() {
        use crate::payload::{Payload, PayloadListOp};
        let mut store = store_with_prim();
        let mut op = PayloadListOp::new();
        op.set_explicit_items(vec![Payload::new(
            "asset.strata",
            p("/B"),
            strata_core::LayerOffset::identity(),
        )]);
        store.set(&p("/A"), fields::payload(), Value::new(op.clone()));

        // Stored compactly, read back as the list-op.
        let v = store.get(&p("/A"), fields::payload());
        assert_eq!(v.get::<PayloadListOp>().unwrap(), &op);
    }

    #[test]
    fn test_field_vectors_shared_until_mutated() {
        let mut store = store_with_prim();
        store.create_spec(&p("/B"), SpecType::Prim);
        store.set(&p("/A"), Token::new("f"), Value::new(1i64));

        // Simulate the load path: share one field vector.
        let shared = store.data.get(&p("/A")).unwrap().fields.clone();
        store.data.get_mut(&p("/B")).unwrap().fields = shared;
        assert!(store
            .data
            .get(&p("/A"))
            .unwrap()
            .fields
            .ptr_eq(&store.data.get(&p("/B")).unwrap().fields));

        store.set(&p("/B"), Token::new("f"), Value::new(2i64));
        assert!(!store
            .data
            .get(&p("/A"))
            .unwrap()
            .fields
            .ptr_eq(&store.data.get(&p("/B")).unwrap().fields));
        assert_eq!(store.get(&p("/A"), Token::new("f")).get::<i64>(), Some(&1));
        assert_eq!(store.get(&p("/B"), Token::new("f")).get::<i64>(), Some(&2));
    }

    #[test]
    fn test_visit_specs_with_synthesized_targets() {
        let mut store = store_with_prim();
        let rel = p("/A.rel");
        store.create_spec(&rel, SpecType::Relationship);
        let mut op = PathListOp::new();
        op.set_explicit_items(vec![p("/B")]);
        store.set(&rel, fields::target_paths(), Value::new(op));

        let mut seen = Vec::new();
        store.visit_specs(|path, ty| {
            seen.push((path.clone(), ty));
            true
        });
        assert!(seen.contains(&(p("/A.rel[/B]"), SpecType::RelationshipTarget)));
        assert!(seen.contains(&(rel.clone(), SpecType::Relationship)));

        // Aborting stops the walk early.
        let mut count = 0;
        store.visit_specs(|_, _| {
            count += 1;
            false
        });
        assert_eq!(count, 1);
    }

    #[test]
    fn test_has_spec_and_field() {
        let mut store = store_with_prim();
        store.set(&p("/A"), Token::new("f"), Value::new(3i64));
        let (ty, value) = store.has_spec_and_field(&p("/A"), Token::new("f"));
        assert_eq!(ty, SpecType::Prim);
        assert_eq!(value.get::<i64>(), Some(&3));

        let (ty, value) = store.has_spec_and_field(&p("/Nope"), Token::new("f"));
        assert_eq!(ty, SpecType::Unknown);
        assert!(value.is_empty());
    }
}
