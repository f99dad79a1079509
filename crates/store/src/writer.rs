//! Crate File Writer
//!
//! Packs a spec store into the sectioned binary format. Callers feed
//! specs in their final order; the writer interns tokens, strings, and
//! paths, deduplicates fields and field sets by their (token, rep)
//! content, packs values (inline where the rep has room, into the
//! value payload section otherwise, deflate-compressed above a size
//! threshold), and finishes with the table of contents and footer.
//!
//! The writer negotiates the lowest version able to represent the
//! data: the base version unless a payload list-op cannot collapse to
//! the compact single-payload form.
//!
//! Writes are atomic: bytes go to a temporary file next to the target
//! and are renamed into place only on success, so a failed save leaves
//! any existing file untouched.

use crate::error::{CrateError, corrupt};
use crate::format::*;
use crate::payload::{Payload, PayloadListOp};
use crate::reader::{
    LazyValue, OpaqueValue, PathListOp, TAG_EXPRESSION, TAG_MAPPER, TAG_MAPPER_ARG, TAG_PRIM,
    TAG_PRIM_PROPERTY, TAG_RELATIONAL_ATTRIBUTE, TAG_ROOT, TAG_TARGET, TAG_VARIANT_SELECTION,
    TokenListOp,
};
use crate::spec_type::SpecType;
use crate::timesamples::TimeSamples;
use std::collections::HashMap;
use std::io::Write as _;
use std::path::Path as FsPath;
use strata_core::{Array, Dictionary, LayerOffset, ListOp, Token, Value};
use strata_path::Path;
use tracing::debug;

pub(crate) struct Writer {
    version: Version,
    tokens: Vec<Token>,
    token_index: HashMap<Token, u32>,
    strings: Vec<u32>,
    string_index: HashMap<u32, u32>,
    path_records: Vec<(u32, u32, u8)>,
    path_index: HashMap<Path, u32>,
    fields: Vec<(u32, u64)>,
    field_index: HashMap<(u32, u64), u32>,
    fieldsets: Vec<u32>,
    fieldset_index: HashMap<Vec<u32>, u32>,
    specs: Vec<(u32, u32, u32)>,
    value_bytes: Vec<u8>,
}

impl Writer {
    pub(crate) fn new() -> Writer {
        Writer {
            version: VERSION_BASE,
            tokens: Vec::new(),
            token_index: HashMap::new(),
            strings: Vec::new(),
            string_index: HashMap::new(),
            path_records: Vec::new(),
            path_index: HashMap::new(),
            fields: Vec::new(),
            field_index: HashMap::new(),
            fieldsets: Vec::new(),
            fieldset_index: HashMap::new(),
            specs: Vec::new(),
            value_bytes: Vec::new(),
        }
    }

    pub(crate) fn version(&self) -> Version {
        self.version
    }

    // =========================================================================
    // Interning
    // =========================================================================

    fn add_token(&mut self, token: Token) -> u32 {
        if let Some(&i) = self.token_index.get(&token) {
            return i;
        }
        let i = self.tokens.len() as u32;
        self.tokens.push(token);
        self.token_index.insert(token, i);
        i
    }

    fn add_string(&mut self, s: &str) -> u32 {
        let token_index = self.add_token(Token::new(s));
        if let Some(&i) = self.string_index.get(&token_index) {
            return i;
        }
        let i = self.strings.len() as u32;
        self.strings.push(token_index);
        self.string_index.insert(token_index, i);
        i
    }

    fn add_path(&mut self, path: &Path) -> Result<u32, CrateError> {
        if path.is_empty() {
            return Ok(PATH_INDEX_NONE);
        }
        if let Some(&i) = self.path_index.get(path) {
            return Ok(i);
        }

        let record = if path.is_absolute_root_path() {
            let token = self.add_token(Token::new("/"));
            (PATH_INDEX_NONE, token, TAG_ROOT)
        } else if *path == Path::reflexive_relative_path() {
            let token = self.add_token(Token::new("."));
            (PATH_INDEX_NONE, token, TAG_ROOT)
        } else {
            // parent_path() on a '..' chain appends another '..'; the
            // structural parent of '..^n' is '..^(n-1)'.
            let parent_path = if path.is_prim_path() && path.name() == ".." {
                let mut p = Path::reflexive_relative_path();
                for _ in 0..path.element_count() - 1 {
                    p = p.parent_path();
                }
                p
            } else {
                path.parent_path()
            };
            let parent = self.add_path(&parent_path)?;
            let (tag, elem) = classify_leaf(path)?;
            let token = self.add_token(elem);
            // Target and mapper records embed whole paths; index them
            // too so path-valued reps can reference them.
            if tag == TAG_TARGET || tag == TAG_MAPPER {
                self.add_path(&path.target_path())?;
            }
            (parent, token, tag)
        };

        let i = self.path_records.len() as u32;
        self.path_records.push(record);
        self.path_index.insert(path.clone(), i);
        Ok(i)
    }

    // =========================================================================
    // Value packing
    // =========================================================================

    // Append a length-prefixed payload, compressing large ones, and
    // return (offset, compressed).
    fn add_payload(&mut self, raw: Vec<u8>) -> (u64, bool) {
        let (stored, compressed) = if raw.len() >= COMPRESS_THRESHOLD {
            let mut enc =
                flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(&raw).expect("in-memory deflate cannot fail");
            let packed = enc.finish().expect("in-memory deflate cannot fail");
            if packed.len() < raw.len() {
                (packed, true)
            } else {
                (raw, false)
            }
        } else {
            (raw, false)
        };
        let offset = self.value_bytes.len() as u64;
        self.value_bytes
            .extend_from_slice(&(stored.len() as u64).to_le_bytes());
        self.value_bytes.extend_from_slice(&stored);
        (offset, compressed)
    }

    fn outlined(&mut self, ty: TypeEnum, raw: Vec<u8>, array: bool) -> ValueRep {
        let (offset, compressed) = self.add_payload(raw);
        ValueRep::outlined(ty, offset, array, compressed)
    }

    pub(crate) fn pack_value(&mut self, value: &Value) -> Result<ValueRep, CrateError> {
        if let Some(lazy) = value.get::<LazyValue>() {
            // Round-trip a still-packed value through its source file.
            let resolved = lazy.resolve();
            if resolved.is_empty() {
                return Err(corrupt("unresolvable lazy value"));
            }
            return self.pack_value(&resolved);
        }
        if let Some(opaque) = value.get::<OpaqueValue>() {
            if opaque.rep.is_inline() {
                return Ok(opaque.rep);
            }
            let (offset, _) = self.add_payload_raw(&opaque.data);
            return Ok(opaque.rep.with_offset(offset));
        }

        if let Some(v) = value.get::<bool>() {
            return Ok(ValueRep::inline(TypeEnum::Bool, *v as u64));
        }
        if let Some(v) = value.get::<i32>() {
            return Ok(ValueRep::inline(TypeEnum::Int, *v as u32 as u64));
        }
        if let Some(v) = value.get::<u32>() {
            return Ok(ValueRep::inline(TypeEnum::UInt, *v as u64));
        }
        if let Some(v) = value.get::<i64>() {
            return Ok(if fits_48_signed(*v) {
                ValueRep::inline(TypeEnum::Int64, (*v as u64) & ((1 << 48) - 1))
            } else {
                let raw = (*v as u64).to_le_bytes().to_vec();
                self.outlined(TypeEnum::Int64, raw, false)
            });
        }
        if let Some(v) = value.get::<u64>() {
            return Ok(if *v < (1 << 48) {
                ValueRep::inline(TypeEnum::UInt64, *v)
            } else {
                self.outlined(TypeEnum::UInt64, v.to_le_bytes().to_vec(), false)
            });
        }
        if let Some(v) = value.get::<f32>() {
            return Ok(ValueRep::inline(TypeEnum::Float, v.to_bits() as u64));
        }
        if let Some(v) = value.get::<f64>() {
            let narrowed = *v as f32;
            return Ok(if narrowed as f64 == *v {
                ValueRep::inline(TypeEnum::Double, narrowed.to_bits() as u64)
            } else {
                self.outlined(TypeEnum::Double, v.to_le_bytes().to_vec(), false)
            });
        }
        if let Some(v) = value.get::<Token>() {
            let i = self.add_token(*v);
            return Ok(ValueRep::inline(TypeEnum::Token, i as u64));
        }
        if let Some(v) = value.get::<String>() {
            let i = self.add_string(v);
            return Ok(ValueRep::inline(TypeEnum::String, i as u64));
        }
        if let Some(v) = value.get::<Path>() {
            let i = self.add_path(v)?;
            return Ok(ValueRep::inline(TypeEnum::Path, i as u64));
        }

        if let Some(v) = value.get::<Array<bool>>() {
            return self.pack_array(TypeEnum::Bool, v.len(), |_, out| {
                for x in v {
                    out.push(*x as u8);
                }
                Ok(())
            });
        }
        if let Some(v) = value.get::<Array<i32>>() {
            return self.pack_array(TypeEnum::Int, v.len(), |_, out| {
                for x in v {
                    out.extend_from_slice(&(*x as u32).to_le_bytes());
                }
                Ok(())
            });
        }
        if let Some(v) = value.get::<Array<u32>>() {
            return self.pack_array(TypeEnum::UInt, v.len(), |_, out| {
                for x in v {
                    out.extend_from_slice(&x.to_le_bytes());
                }
                Ok(())
            });
        }
        if let Some(v) = value.get::<Array<i64>>() {
            return self.pack_array(TypeEnum::Int64, v.len(), |_, out| {
                for x in v {
                    out.extend_from_slice(&(*x as u64).to_le_bytes());
                }
                Ok(())
            });
        }
        if let Some(v) = value.get::<Array<u64>>() {
            return self.pack_array(TypeEnum::UInt64, v.len(), |_, out| {
                for x in v {
                    out.extend_from_slice(&x.to_le_bytes());
                }
                Ok(())
            });
        }
        if let Some(v) = value.get::<Array<f32>>() {
            return self.pack_array(TypeEnum::Float, v.len(), |_, out| {
                for x in v {
                    out.extend_from_slice(&x.to_bits().to_le_bytes());
                }
                Ok(())
            });
        }
        if let Some(v) = value.get::<Array<f64>>() {
            return self.pack_array(TypeEnum::Double, v.len(), |_, out| {
                for x in v {
                    out.extend_from_slice(&x.to_le_bytes());
                }
                Ok(())
            });
        }
        if let Some(v) = value.get::<Array<Token>>() {
            let v = v.clone();
            return self.pack_array(TypeEnum::Token, v.len(), |w, out| {
                for x in &v {
                    let i = w.add_token(*x);
                    out.extend_from_slice(&i.to_le_bytes());
                }
                Ok(())
            });
        }
        if let Some(v) = value.get::<Array<String>>() {
            let v = v.clone();
            return self.pack_array(TypeEnum::String, v.len(), |w, out| {
                for x in &v {
                    let i = w.add_string(x);
                    out.extend_from_slice(&i.to_le_bytes());
                }
                Ok(())
            });
        }
        if let Some(v) = value.get::<Array<Path>>() {
            let v = v.clone();
            return self.pack_array(TypeEnum::Path, v.len(), |w, out| {
                for x in &v {
                    let i = w.add_path(x)?;
                    out.extend_from_slice(&i.to_le_bytes());
                }
                Ok(())
            });
        }

        if let Some(v) = value.get::<Payload>() {
            let v = v.clone();
            let mut raw = Vec::new();
            self.write_payload_record(&v, &mut raw)?;
            return Ok(self.outlined(TypeEnum::Payload, raw, false));
        }
        if let Some(op) = value.get::<PathListOp>() {
            let op = op.clone();
            let mut raw = Vec::new();
            self.write_list_op(&op, &mut raw, |w, item, out| {
                let i = w.add_path(item)?;
                out.extend_from_slice(&i.to_le_bytes());
                Ok(())
            })?;
            return Ok(self.outlined(TypeEnum::PathListOp, raw, false));
        }
        if let Some(op) = value.get::<PayloadListOp>() {
            // This op survived the compact-form collapse, so the file
            // must be payload-list-op aware.
            self.version = self.version.max(VERSION_PAYLOAD_LIST_OP);
            let op = op.clone();
            let mut raw = Vec::new();
            self.write_list_op(&op, &mut raw, |w, item, out| {
                w.write_payload_record(item, out)
            })?;
            return Ok(self.outlined(TypeEnum::PayloadListOp, raw, false));
        }
        if let Some(op) = value.get::<TokenListOp>() {
            let op = op.clone();
            let mut raw = Vec::new();
            self.write_list_op(&op, &mut raw, |w, item, out| {
                let i = w.add_token(*item);
                out.extend_from_slice(&i.to_le_bytes());
                Ok(())
            })?;
            return Ok(self.outlined(TypeEnum::TokenListOp, raw, false));
        }
        if let Some(dict) = value.get::<Dictionary>() {
            let dict = dict.clone();
            // Pack nested values first; the dictionary payload then
            // holds their reps.
            let mut entries = Vec::with_capacity(dict.len());
            for (k, v) in dict.iter() {
                let key = self.add_token(Token::new(k));
                let rep = self.pack_value(v)?;
                entries.push((key, rep));
            }
            let mut raw = Vec::new();
            raw.extend_from_slice(&(entries.len() as u64).to_le_bytes());
            for (key, rep) in entries {
                raw.extend_from_slice(&key.to_le_bytes());
                raw.extend_from_slice(&rep.0.to_le_bytes());
            }
            return Ok(self.outlined(TypeEnum::Dictionary, raw, false));
        }
        if let Some(ts) = value.get::<TimeSamples>() {
            let ts = ts.clone();
            let mut reps = Vec::with_capacity(ts.values.len());
            for v in &ts.values {
                reps.push(self.pack_value(v)?);
            }
            let mut raw = Vec::new();
            raw.extend_from_slice(&(ts.times.get().len() as u64).to_le_bytes());
            for t in ts.times.get() {
                raw.extend_from_slice(&t.to_le_bytes());
            }
            for rep in reps {
                raw.extend_from_slice(&rep.0.to_le_bytes());
            }
            return Ok(self.outlined(TypeEnum::TimeSamples, raw, false));
        }
        if let Some(v) = value.get::<LayerOffset>() {
            let mut raw = Vec::new();
            raw.extend_from_slice(&v.offset().to_le_bytes());
            raw.extend_from_slice(&v.scale().to_le_bytes());
            return Ok(self.outlined(TypeEnum::LayerOffset, raw, false));
        }

        Err(CrateError::Coding(format!(
            "value of type {} cannot be written to a crate file",
            value.type_name()
        )))
    }

    // Uncompressed append of already-encoded bytes (opaque carry).
    fn add_payload_raw(&mut self, data: &[u8]) -> (u64, bool) {
        let offset = self.value_bytes.len() as u64;
        self.value_bytes
            .extend_from_slice(&(data.len() as u64).to_le_bytes());
        self.value_bytes.extend_from_slice(data);
        (offset, false)
    }

    fn pack_array(
        &mut self,
        ty: TypeEnum,
        len: usize,
        fill: impl FnOnce(&mut Writer, &mut Vec<u8>) -> Result<(), CrateError>,
    ) -> Result<ValueRep, CrateError> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(len as u64).to_le_bytes());
        fill(self, &mut raw)?;
        Ok(self.outlined(ty, raw, true))
    }

    fn write_payload_record(
        &mut self,
        payload: &Payload,
        out: &mut Vec<u8>,
    ) -> Result<(), CrateError> {
        let asset = self.add_string(payload.asset_path());
        let prim = self.add_path(payload.prim_path())?;
        out.extend_from_slice(&asset.to_le_bytes());
        out.extend_from_slice(&prim.to_le_bytes());
        out.extend_from_slice(&payload.layer_offset().offset().to_le_bytes());
        out.extend_from_slice(&payload.layer_offset().scale().to_le_bytes());
        Ok(())
    }

    fn write_list_op<T: Clone + PartialEq>(
        &mut self,
        op: &ListOp<T>,
        out: &mut Vec<u8>,
        write_item: impl Fn(&mut Writer, &T, &mut Vec<u8>) -> Result<(), CrateError>,
    ) -> Result<(), CrateError> {
        out.push(op.is_explicit() as u8);
        for items in [
            op.explicit_items(),
            op.added_items(),
            op.prepended_items(),
            op.appended_items(),
            op.deleted_items(),
            op.ordered_items(),
        ] {
            out.extend_from_slice(&(items.len() as u64).to_le_bytes());
            let items = items.to_vec();
            for item in &items {
                write_item(self, item, out)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Specs
    // =========================================================================

    /// Pack one spec with its ordered field list. Call in final spec
    /// order; field sets deduplicate automatically.
    pub(crate) fn pack_spec(
        &mut self,
        path: &Path,
        spec_type: SpecType,
        fields: &[(Token, Value)],
    ) -> Result<(), CrateError> {
        let path_index = self.add_path(path)?;

        let mut field_indices = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            let token = self.add_token(*name);
            let rep = self.pack_value(value)?;
            let key = (token, rep.0);
            let index = match self.field_index.get(&key) {
                Some(&i) => i,
                None => {
                    let i = self.fields.len() as u32;
                    self.fields.push(key);
                    self.field_index.insert(key, i);
                    i
                }
            };
            field_indices.push(index);
        }

        let fieldset_index = match self.fieldset_index.get(&field_indices) {
            Some(&i) => i,
            None => {
                let start = self.fieldsets.len() as u32;
                self.fieldsets.extend_from_slice(&field_indices);
                self.fieldsets.push(FIELD_INDEX_SENTINEL);
                self.fieldset_index.insert(field_indices.clone(), start);
                start
            }
        };

        self.specs
            .push((path_index, fieldset_index, spec_type as u32));
        Ok(())
    }

    // =========================================================================
    // Output
    // =========================================================================

    /// Assemble the file and atomically write it to `target`.
    pub(crate) fn write_to(&self, target: &FsPath) -> Result<Version, CrateError> {
        let bytes = self.assemble();

        let dir = target.parent().filter(|d| !d.as_os_str().is_empty());
        let file_name = target
            .file_name()
            .ok_or_else(|| CrateError::Coding(format!("bad save path {}", target.display())))?;
        let tmp_name = format!(
            ".{}.tmp{}",
            file_name.to_string_lossy(),
            std::process::id()
        );
        let tmp_path = match dir {
            Some(d) => d.join(&tmp_name),
            None => std::path::PathBuf::from(&tmp_name),
        };

        let write_result = std::fs::write(&tmp_path, &bytes)
            .and_then(|_| std::fs::rename(&tmp_path, target));
        if let Err(e) = write_result {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(CrateError::Io(e));
        }

        debug!(
            target = %target.display(),
            version = %self.version,
            bytes = bytes.len(),
            specs = self.specs.len(),
            "wrote crate file"
        );
        Ok(self.version)
    }

    fn assemble(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&[self.version.major, self.version.minor, self.version.patch]);
        buf.extend_from_slice(&[0u8; 5]);

        let mut toc: Vec<([u8; 16], u64, u64)> = Vec::new();

        // TOKENS
        let start = buf.len() as u64;
        buf.extend_from_slice(&(self.tokens.len() as u64).to_le_bytes());
        for t in &self.tokens {
            let s = t.as_str().as_bytes();
            buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
            buf.extend_from_slice(s);
        }
        toc.push((
            section_name_bytes(SECTION_TOKENS),
            start,
            buf.len() as u64 - start,
        ));

        // STRINGS
        let start = buf.len() as u64;
        buf.extend_from_slice(&(self.strings.len() as u64).to_le_bytes());
        for s in &self.strings {
            buf.extend_from_slice(&s.to_le_bytes());
        }
        toc.push((
            section_name_bytes(SECTION_STRINGS),
            start,
            buf.len() as u64 - start,
        ));

        // FIELDS
        let start = buf.len() as u64;
        buf.extend_from_slice(&(self.fields.len() as u64).to_le_bytes());
        for (token, rep) in &self.fields {
            buf.extend_from_slice(&token.to_le_bytes());
            buf.extend_from_slice(&rep.to_le_bytes());
        }
        toc.push((
            section_name_bytes(SECTION_FIELDS),
            start,
            buf.len() as u64 - start,
        ));

        // FIELDSETS
        let start = buf.len() as u64;
        buf.extend_from_slice(&(self.fieldsets.len() as u64).to_le_bytes());
        for idx in &self.fieldsets {
            buf.extend_from_slice(&idx.to_le_bytes());
        }
        toc.push((
            section_name_bytes(SECTION_FIELDSETS),
            start,
            buf.len() as u64 - start,
        ));

        // PATHS
        let start = buf.len() as u64;
        buf.extend_from_slice(&(self.path_records.len() as u64).to_le_bytes());
        for (parent, token, tag) in &self.path_records {
            buf.extend_from_slice(&parent.to_le_bytes());
            buf.extend_from_slice(&token.to_le_bytes());
            buf.push(*tag);
        }
        toc.push((
            section_name_bytes(SECTION_PATHS),
            start,
            buf.len() as u64 - start,
        ));

        // SPECS
        let start = buf.len() as u64;
        buf.extend_from_slice(&(self.specs.len() as u64).to_le_bytes());
        for (path, fieldset, spec_type) in &self.specs {
            buf.extend_from_slice(&path.to_le_bytes());
            buf.extend_from_slice(&fieldset.to_le_bytes());
            buf.extend_from_slice(&spec_type.to_le_bytes());
        }
        toc.push((
            section_name_bytes(SECTION_SPECS),
            start,
            buf.len() as u64 - start,
        ));

        // VALUEREPS
        let start = buf.len() as u64;
        buf.extend_from_slice(&self.value_bytes);
        toc.push((
            section_name_bytes(SECTION_VALUEREPS),
            start,
            buf.len() as u64 - start,
        ));

        // TOC + footer
        let toc_offset = buf.len() as u64;
        buf.extend_from_slice(&(toc.len() as u64).to_le_bytes());
        for (name, offset, length) in &toc {
            buf.extend_from_slice(name);
            buf.extend_from_slice(&offset.to_le_bytes());
            buf.extend_from_slice(&length.to_le_bytes());
        }
        buf.extend_from_slice(&toc_offset.to_le_bytes());
        buf.extend_from_slice(&[self.version.major, self.version.minor, self.version.patch]);
        buf.extend_from_slice(&[0u8; 5]);
        buf
    }
}

fn fits_48_signed(v: i64) -> bool {
    (-(1i64 << 47)..(1i64 << 47)).contains(&v)
}

// Classify the leafmost element of a path into its record tag and
// element token.
fn classify_leaf(path: &Path) -> Result<(u8, Token), CrateError> {
    if path.is_prim_variant_selection_path() {
        return Ok((TAG_VARIANT_SELECTION, Token::new(path.element_string())));
    }
    if path.is_prim_property_path() {
        return Ok((TAG_PRIM_PROPERTY, path.name_token()));
    }
    if path.is_target_path() {
        return Ok((TAG_TARGET, Token::new(path.target_path().as_string())));
    }
    if path.is_mapper_path() {
        return Ok((TAG_MAPPER, Token::new(path.target_path().as_string())));
    }
    if path.is_relational_attribute_path() {
        return Ok((TAG_RELATIONAL_ATTRIBUTE, path.name_token()));
    }
    if path.is_mapper_arg_path() {
        return Ok((TAG_MAPPER_ARG, path.name_token()));
    }
    if path.is_expression_path() {
        return Ok((TAG_EXPRESSION, Token::empty()));
    }
    if path.is_prim_path() {
        return Ok((TAG_PRIM, path.name_token()));
    }
    Err(CrateError::Coding(format!(
        "path {path} cannot be recorded in a crate file"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_48_signed() {
        assert!(fits_48_signed(0));
        assert!(fits_48_signed((1 << 47) - 1));
        assert!(fits_48_signed(-(1 << 47)));
        assert!(!fits_48_signed(1 << 47));
        assert!(!fits_48_signed(i64::MIN));
    }

    #[test]
    fn test_token_and_string_dedup() {
        let mut w = Writer::new();
        let a = w.add_token(Token::new("x"));
        let b = w.add_token(Token::new("x"));
        assert_eq!(a, b);
        assert_eq!(w.tokens.len(), 1);

        let a = w.add_string("hello");
        let b = w.add_string("hello");
        assert_eq!(a, b);
        assert_eq!(w.strings.len(), 1);
    }

    #[test]
    fn test_path_records_are_parent_first() {
        let mut w = Writer::new();
        let p = Path::parse("/A/B.attr").unwrap();
        let i = w.add_path(&p).unwrap();
        assert_eq!(i as usize, w.path_records.len() - 1);
        // Root, /A, /A/B, /A/B.attr.
        assert_eq!(w.path_records.len(), 4);
        assert_eq!(w.path_records[0].2, TAG_ROOT);
        for (idx, (parent, _, _)) in w.path_records.iter().enumerate().skip(1) {
            assert!((*parent as usize) < idx);
        }
    }

    #[test]
    fn test_fieldset_dedup() {
        let mut w = Writer::new();
        let fields = vec![(Token::new("a"), Value::new(1i64))];
        let p1 = Path::parse("/X").unwrap();
        let p2 = Path::parse("/Y").unwrap();
        w.pack_spec(&p1, SpecType::Prim, &fields).unwrap();
        w.pack_spec(&p2, SpecType::Prim, &fields).unwrap();
        assert_eq!(w.specs[0].1, w.specs[1].1);
        assert_eq!(w.fields.len(), 1);
    }

    #[test]
    fn test_payload_list_op_raises_version() {
        let mut w = Writer::new();
        assert_eq!(w.version(), VERSION_BASE);
        let mut op = PayloadListOp::new();
        op.set_appended_items(vec![Payload::new(
            "a.strata",
            Path::parse("/A").unwrap(),
            LayerOffset::identity(),
        )]);
        w.pack_value(&Value::new(op)).unwrap();
        assert_eq!(w.version(), VERSION_PAYLOAD_LIST_OP);
    }

    #[test]
    fn test_large_payload_compresses() {
        let mut w = Writer::new();
        let data = vec![0.5f64; 4096];
        let rep = w
            .pack_value(&Value::new(Array::from_vec(data)))
            .unwrap();
        assert!(rep.is_compressed());
        assert!(rep.is_array());
        // Constant data compresses far below raw size.
        assert!(w.value_bytes.len() < 4096 * 8);
    }
}
