//! Crate File Reader
//!
//! Opening a file validates the header, footer, and table of contents,
//! then decodes the structural sections: tokens, strings, fields,
//! field sets, paths, and specs. Paths materialize through the global
//! interner by walking each record's element token. Values stay packed
//! until asked for: non-inline reps load as [`LazyValue`] proxies that
//! unpack through the reader on first access.
//!
//! Reps whose type byte this reader does not know are preserved as
//! [`OpaqueValue`]s (raw payload bytes plus the original rep bits) so
//! a rewrite within the same major version carries them through
//! untouched.

use crate::error::{CrateError, corrupt};
use crate::format::*;
use crate::mapping::ByteSource;
use crate::payload::{Payload, PayloadListOp};
use crate::timesamples::TimeSamples;
use std::any::TypeId;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use strata_core::{Array, Dictionary, LayerOffset, ListOp, Token, Value, ValueItem};
use strata_path::Path;
use tracing::{debug, error};

pub(crate) type PathListOp = ListOp<Path>;
pub(crate) type TokenListOp = ListOp<Token>;

// Path record tags; numerically aligned with the node-type ordering
// used for path sorting.
pub(crate) const TAG_ROOT: u8 = 0;
pub(crate) const TAG_PRIM: u8 = 1;
pub(crate) const TAG_VARIANT_SELECTION: u8 = 2;
pub(crate) const TAG_PRIM_PROPERTY: u8 = 3;
pub(crate) const TAG_TARGET: u8 = 4;
pub(crate) const TAG_MAPPER: u8 = 5;
pub(crate) const TAG_RELATIONAL_ATTRIBUTE: u8 = 6;
pub(crate) const TAG_MAPPER_ARG: u8 = 7;
pub(crate) const TAG_EXPRESSION: u8 = 8;

#[derive(Clone, Copy)]
pub(crate) struct FieldRecord {
    pub token: u32,
    pub rep: ValueRep,
}

#[derive(Clone, Copy)]
pub(crate) struct SpecRecord {
    pub path: u32,
    pub fieldset: u32,
    pub spec_type: u32,
}

/// A fully opened crate file: decoded structural tables plus the raw
/// bytes for lazy value materialization.
pub(crate) struct FileData {
    pub asset_path: PathBuf,
    pub version: Version,
    pub detached: bool,
    bytes: ByteSource,
    pub tokens: Vec<Token>,
    // String table entries are indices into the token table.
    pub strings: Vec<u32>,
    pub fields: Vec<FieldRecord>,
    pub fieldsets: Vec<u32>,
    pub paths: Vec<Path>,
    pub specs: Vec<SpecRecord>,
    values_offset: usize,
    values_len: usize,
}

impl FileData {
    pub(crate) fn open(
        asset_path: &FsPath,
        detached: bool,
    ) -> Result<Arc<FileData>, CrateError> {
        let bytes = ByteSource::open(asset_path, detached)?;
        let data = bytes.bytes();

        if data.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(corrupt("file too small for header and footer"));
        }
        if data[..8] != MAGIC {
            return Err(corrupt("bad magic"));
        }
        let version = Version::new(data[8], data[9], data[10]);
        if !version_supported(version) {
            return Err(CrateError::UnsupportedVersion(version));
        }

        let footer = &data[data.len() - FOOTER_SIZE..];
        let toc_offset = u64::from_le_bytes(footer[..8].try_into().unwrap()) as usize;
        let footer_version = Version::new(footer[8], footer[9], footer[10]);
        if footer_version != version {
            return Err(corrupt("footer version disagrees with header"));
        }
        if toc_offset < HEADER_SIZE || toc_offset > data.len() - FOOTER_SIZE {
            return Err(corrupt("table of contents offset out of range"));
        }

        // Table of contents: count + (name, offset, length) entries.
        let mut toc = Cursor::new(&data[toc_offset..data.len() - FOOTER_SIZE]);
        let count = toc.read_u64()? as usize;
        let mut sections: Vec<([u8; 16], usize, usize)> = Vec::with_capacity(count);
        for _ in 0..count {
            let name: [u8; 16] = toc.read_bytes(16)?.try_into().unwrap();
            let offset = toc.read_u64()? as usize;
            let length = toc.read_u64()? as usize;
            if offset < HEADER_SIZE || offset.saturating_add(length) > data.len() {
                return Err(corrupt("section extends past end of file"));
            }
            sections.push((name, offset, length));
        }
        let section = |name: &str| -> Result<&[u8], CrateError> {
            let key = section_name_bytes(name);
            sections
                .iter()
                .find(|(n, _, _)| *n == key)
                .map(|&(_, off, len)| &data[off..off + len])
                .ok_or_else(|| corrupt(format!("missing required section {name}")))
        };

        // TOKENS
        let mut cur = Cursor::new(section(SECTION_TOKENS)?);
        let n = cur.read_u64()? as usize;
        let mut tokens = Vec::with_capacity(n);
        for _ in 0..n {
            let len = cur.read_u32()? as usize;
            let raw = cur.read_bytes(len)?;
            let s = std::str::from_utf8(raw).map_err(|_| corrupt("token is not UTF-8"))?;
            tokens.push(Token::new(s));
        }

        // STRINGS
        let mut cur = Cursor::new(section(SECTION_STRINGS)?);
        let n = cur.read_u64()? as usize;
        let mut strings = Vec::with_capacity(n);
        for _ in 0..n {
            let idx = cur.read_u32()?;
            if idx as usize >= tokens.len() {
                return Err(corrupt("string entry references unknown token"));
            }
            strings.push(idx);
        }

        // FIELDS
        let mut cur = Cursor::new(section(SECTION_FIELDS)?);
        let n = cur.read_u64()? as usize;
        let mut fields = Vec::with_capacity(n);
        for _ in 0..n {
            let token = cur.read_u32()?;
            if token as usize >= tokens.len() {
                return Err(corrupt("field references unknown token"));
            }
            let rep = ValueRep(cur.read_u64()?);
            fields.push(FieldRecord { token, rep });
        }

        // FIELDSETS
        let mut cur = Cursor::new(section(SECTION_FIELDSETS)?);
        let n = cur.read_u64()? as usize;
        let mut fieldsets = Vec::with_capacity(n);
        for _ in 0..n {
            let idx = cur.read_u32()?;
            if idx != FIELD_INDEX_SENTINEL && idx as usize >= fields.len() {
                return Err(corrupt("field set references unknown field"));
            }
            fieldsets.push(idx);
        }
        if fieldsets.last().is_some_and(|&idx| idx != FIELD_INDEX_SENTINEL) {
            return Err(corrupt("field sets not sentinel-terminated"));
        }

        // PATHS
        let mut cur = Cursor::new(section(SECTION_PATHS)?);
        let n = cur.read_u64()? as usize;
        let mut paths: Vec<Path> = Vec::with_capacity(n);
        for i in 0..n {
            let parent = cur.read_u32()?;
            let token_index = cur.read_u32()?;
            let tag = cur.read_u8()?;
            let elem = if token_index == u32::MAX {
                Token::empty()
            } else {
                *tokens
                    .get(token_index as usize)
                    .ok_or_else(|| corrupt("path record references unknown token"))?
            };
            let path = if tag == TAG_ROOT {
                if parent != PATH_INDEX_NONE {
                    return Err(corrupt("root path record carries a parent"));
                }
                match elem.as_str() {
                    "/" => Path::absolute_root_path(),
                    "." => Path::reflexive_relative_path(),
                    other => {
                        return Err(corrupt(format!("unknown root spelling {other:?}")));
                    }
                }
            } else {
                if parent as usize >= i {
                    return Err(corrupt("path record references a later parent"));
                }
                build_child_path(&paths[parent as usize], tag, elem)?
            };
            paths.push(path);
        }

        // SPECS
        let mut cur = Cursor::new(section(SECTION_SPECS)?);
        let n = cur.read_u64()? as usize;
        let mut specs = Vec::with_capacity(n);
        for _ in 0..n {
            let path = cur.read_u32()?;
            let fieldset = cur.read_u32()?;
            let spec_type = cur.read_u32()?;
            if path as usize >= paths.len() {
                return Err(corrupt("spec references unknown path"));
            }
            if fieldset as usize >= fieldsets.len() {
                return Err(corrupt("spec references unknown field set"));
            }
            specs.push(SpecRecord {
                path,
                fieldset,
                spec_type,
            });
        }

        // VALUEREPS bounds, for lazy access.
        let key = section_name_bytes(SECTION_VALUEREPS);
        let (values_offset, values_len) = sections
            .iter()
            .find(|(n, _, _)| *n == key)
            .map(|&(_, off, len)| (off, len))
            .ok_or_else(|| corrupt("missing required section VALUEREPS"))?;

        debug!(
            asset = %asset_path.display(),
            %version,
            specs = specs.len(),
            paths = paths.len(),
            "opened crate file"
        );

        Ok(Arc::new(FileData {
            asset_path: asset_path.to_path_buf(),
            version,
            detached,
            bytes,
            tokens,
            strings,
            fields,
            fieldsets,
            paths,
            specs,
            values_offset,
            values_len,
        }))
    }

    pub(crate) fn token_at(&self, index: u32) -> Result<Token, CrateError> {
        self.tokens
            .get(index as usize)
            .copied()
            .ok_or_else(|| corrupt("token index out of range"))
    }

    fn string_at(&self, index: u32) -> Result<String, CrateError> {
        let token_index = *self
            .strings
            .get(index as usize)
            .ok_or_else(|| corrupt("string index out of range"))?;
        Ok(self.token_at(token_index)?.as_str().to_string())
    }

    fn path_at(&self, index: u32) -> Result<Path, CrateError> {
        if index == PATH_INDEX_NONE {
            return Ok(Path::empty());
        }
        self.paths
            .get(index as usize)
            .cloned()
            .ok_or_else(|| corrupt("path index out of range"))
    }

    // The length-prefixed payload bytes for a non-inline rep, still
    // compressed if the rep says so.
    fn raw_payload(&self, rep: ValueRep) -> Result<&[u8], CrateError> {
        let section = &self.bytes.bytes()[self.values_offset..self.values_offset + self.values_len];
        let offset = rep.payload() as usize;
        if offset + 8 > section.len() {
            return Err(corrupt("value payload offset out of range"));
        }
        let len = u64::from_le_bytes(section[offset..offset + 8].try_into().unwrap()) as usize;
        let start = offset + 8;
        if start + len > section.len() {
            return Err(corrupt("value payload extends past section"));
        }
        Ok(&section[start..start + len])
    }

    fn payload_bytes(&self, rep: ValueRep) -> Result<Vec<u8>, CrateError> {
        let raw = self.raw_payload(rep)?;
        if rep.is_compressed() {
            use std::io::Read;
            let mut out = Vec::new();
            flate2::read::DeflateDecoder::new(raw)
                .read_to_end(&mut out)
                .map_err(|e| corrupt(format!("bad compressed payload: {e}")))?;
            Ok(out)
        } else {
            Ok(raw.to_vec())
        }
    }

    /// Fully unpack a rep into a live value.
    pub(crate) fn unpack_value(
        this: &Arc<FileData>,
        rep: ValueRep,
    ) -> Result<Value, CrateError> {
        let Some(ty) = rep.type_enum() else {
            // Unknown within our major: preserve the bytes.
            let data = if rep.is_inline() {
                Vec::new()
            } else {
                this.raw_payload(rep)?.to_vec()
            };
            let kept_payload = if rep.is_inline() { rep.payload() } else { 0 };
            return Ok(Value::new(OpaqueValue {
                rep: ValueRep((rep.0 & !((1u64 << 48) - 1)) | kept_payload),
                data,
            }));
        };

        if rep.is_inline() {
            let p = rep.payload();
            return Ok(match ty {
                TypeEnum::Bool => Value::new(p != 0),
                TypeEnum::Int => Value::new(p as u32 as i32),
                TypeEnum::UInt => Value::new(p as u32),
                TypeEnum::Int64 => Value::new(sign_extend_48(p)),
                TypeEnum::UInt64 => Value::new(p),
                TypeEnum::Float => Value::new(f32::from_bits(p as u32)),
                TypeEnum::Double => Value::new(f32::from_bits(p as u32) as f64),
                TypeEnum::Token => Value::new(this.token_at(p as u32)?),
                TypeEnum::String => Value::new(this.string_at(p as u32)?),
                TypeEnum::Path => Value::new(this.path_at(p as u32)?),
                _ => return Err(corrupt(format!("type {ty:?} cannot be inline"))),
            });
        }

        let bytes = this.payload_bytes(rep)?;
        let mut cur = Cursor::new(&bytes);

        if rep.is_array() {
            return this.unpack_array(ty, &mut cur);
        }

        let value = match ty {
            TypeEnum::Int64 => Value::new(cur.read_u64()? as i64),
            TypeEnum::UInt64 => Value::new(cur.read_u64()?),
            TypeEnum::Double => Value::new(cur.read_f64()?),
            TypeEnum::Payload => Value::new(this.read_payload_record(&mut cur)?),
            TypeEnum::PathListOp => {
                Value::new(this.read_list_op(&mut cur, |s, c| s.read_path_item(c))?)
            }
            TypeEnum::PayloadListOp => {
                Value::new(this.read_list_op(&mut cur, |s, c| s.read_payload_record(c))?)
            }
            TypeEnum::TokenListOp => {
                Value::new(this.read_list_op(&mut cur, |s, c| s.read_token_item(c))?)
            }
            TypeEnum::Dictionary => {
                let n = cur.read_u64()? as usize;
                let mut dict = Dictionary::new();
                for _ in 0..n {
                    let key = this.token_at(cur.read_u32()?)?;
                    let value_rep = ValueRep(cur.read_u64()?);
                    dict.insert(key.as_str(), FileData::unpack_value(this, value_rep)?);
                }
                Value::new(dict)
            }
            TypeEnum::TimeSamples => {
                let n = cur.read_u64()? as usize;
                let mut ts = TimeSamples::default();
                {
                    let times = ts.times.get_mut();
                    times.reserve(n);
                    for _ in 0..n {
                        times.push(cur.read_f64()?);
                    }
                }
                ts.values.reserve(n);
                for _ in 0..n {
                    let value_rep = ValueRep(cur.read_u64()?);
                    // Only the requested component of a sample set is
                    // ever decoded; values stay packed until queried.
                    ts.values.push(FileData::wrap_rep(this, value_rep));
                }
                Value::new(ts)
            }
            TypeEnum::LayerOffset => {
                let offset = cur.read_f64()?;
                let scale = cur.read_f64()?;
                Value::new(LayerOffset::new(offset, scale))
            }
            _ => return Err(corrupt(format!("type {ty:?} requires inline encoding"))),
        };
        Ok(value)
    }

    fn unpack_array(
        &self,
        ty: TypeEnum,
        cur: &mut Cursor<'_>,
    ) -> Result<Value, CrateError> {
        let n = cur.read_u64()? as usize;
        macro_rules! read_array {
            ($read:expr) => {{
                let mut v = Vec::with_capacity(n);
                for _ in 0..n {
                    v.push($read?);
                }
                Value::new(Array::from_vec(v))
            }};
        }
        Ok(match ty {
            TypeEnum::Bool => read_array!(cur.read_u8().map(|b| b != 0)),
            TypeEnum::Int => read_array!(cur.read_u32().map(|v| v as i32)),
            TypeEnum::UInt => read_array!(cur.read_u32()),
            TypeEnum::Int64 => read_array!(cur.read_u64().map(|v| v as i64)),
            TypeEnum::UInt64 => read_array!(cur.read_u64()),
            TypeEnum::Float => read_array!(cur.read_u32().map(f32::from_bits)),
            TypeEnum::Double => read_array!(cur.read_f64()),
            TypeEnum::Token => read_array!(cur.read_u32().and_then(|i| self.token_at(i))),
            TypeEnum::String => read_array!(cur.read_u32().and_then(|i| self.string_at(i))),
            TypeEnum::Path => read_array!(cur.read_u32().and_then(|i| self.path_at(i))),
            _ => return Err(corrupt(format!("type {ty:?} has no array form"))),
        })
    }

    fn read_payload_record(&self, cur: &mut Cursor<'_>) -> Result<Payload, CrateError> {
        let asset = self.string_at(cur.read_u32()?)?;
        let prim = self.path_at(cur.read_u32()?)?;
        let offset = cur.read_f64()?;
        let scale = cur.read_f64()?;
        Ok(Payload::new(asset, prim, LayerOffset::new(offset, scale)))
    }

    fn read_path_item(&self, cur: &mut Cursor<'_>) -> Result<Path, CrateError> {
        self.path_at(cur.read_u32()?)
    }

    fn read_token_item(&self, cur: &mut Cursor<'_>) -> Result<Token, CrateError> {
        self.token_at(cur.read_u32()?)
    }

    fn read_list_op<T: Clone + PartialEq>(
        &self,
        cur: &mut Cursor<'_>,
        read_item: impl Fn(&FileData, &mut Cursor<'_>) -> Result<T, CrateError>,
    ) -> Result<ListOp<T>, CrateError> {
        let explicit = cur.read_u8()? != 0;
        let mut read_items = |cur: &mut Cursor<'_>| -> Result<Vec<T>, CrateError> {
            let n = cur.read_u64()? as usize;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(read_item(self, cur)?);
            }
            Ok(v)
        };
        let mut op = ListOp::new();
        let explicit_items = read_items(cur)?;
        op.set_added_items(read_items(cur)?);
        op.set_prepended_items(read_items(cur)?);
        op.set_appended_items(read_items(cur)?);
        op.set_deleted_items(read_items(cur)?);
        op.set_ordered_items(read_items(cur)?);
        if explicit {
            op.set_explicit_items(explicit_items);
        }
        Ok(op)
    }

    /// The field-load policy: inline values and time-sample sets
    /// materialize immediately; everything else defers behind a
    /// [`LazyValue`].
    pub(crate) fn unpack_for_field(this: &Arc<FileData>, rep: ValueRep) -> Value {
        if rep.is_inline() || rep.type_enum() == Some(TypeEnum::TimeSamples) {
            match FileData::unpack_value(this, rep) {
                Ok(v) => v,
                Err(e) => {
                    error!(asset = %this.asset_path.display(), error = %e, "failed to unpack value");
                    Value::empty()
                }
            }
        } else {
            FileData::wrap_rep(this, rep)
        }
    }

    fn wrap_rep(this: &Arc<FileData>, rep: ValueRep) -> Value {
        Value::new(LazyValue {
            file: this.clone(),
            rep,
        })
    }
}

fn sign_extend_48(v: u64) -> i64 {
    ((v << 16) as i64) >> 16
}

// Build one child path from its parent and a path record.
fn build_child_path(parent: &Path, tag: u8, elem: Token) -> Result<Path, CrateError> {
    let path = match tag {
        TAG_PRIM => parent.append_child(elem),
        TAG_PRIM_PROPERTY => parent.append_property(elem),
        TAG_VARIANT_SELECTION => {
            let text = elem.as_str();
            let inner = text
                .strip_prefix('{')
                .and_then(|t| t.strip_suffix('}'))
                .ok_or_else(|| corrupt("malformed variant selection record"))?;
            let (set, var) = inner
                .split_once('=')
                .ok_or_else(|| corrupt("malformed variant selection record"))?;
            parent.append_variant_selection(set, var)
        }
        TAG_TARGET => {
            let target = Path::parse(elem.as_str())
                .map_err(|e| corrupt(format!("bad embedded target path: {e}")))?;
            parent.append_target(&target)
        }
        TAG_MAPPER => {
            let target = Path::parse(elem.as_str())
                .map_err(|e| corrupt(format!("bad embedded mapper path: {e}")))?;
            parent.append_mapper(&target)
        }
        TAG_RELATIONAL_ATTRIBUTE => parent.append_relational_attribute(elem),
        TAG_MAPPER_ARG => parent.append_mapper_arg(elem),
        TAG_EXPRESSION => parent.append_expression(),
        other => return Err(corrupt(format!("unknown path record tag {other}"))),
    };
    if path.is_empty() {
        return Err(corrupt("path record does not compose with its parent"));
    }
    Ok(path)
}

// =============================================================================
// Lazy and opaque values
// =============================================================================

/// A value still packed in its file; unpacks on demand.
#[derive(Clone)]
pub struct LazyValue {
    file: Arc<FileData>,
    rep: ValueRep,
}

impl LazyValue {
    /// Materialize the packed value. Corruption discovered this late
    /// reports a diagnostic and yields the empty value.
    pub fn resolve(&self) -> Value {
        match FileData::unpack_value(&self.file, self.rep) {
            Ok(v) => v,
            Err(e) => {
                error!(
                    asset = %self.file.asset_path.display(),
                    error = %e,
                    "failed to materialize lazy value"
                );
                Value::empty()
            }
        }
    }

    pub(crate) fn rep(&self) -> ValueRep {
        self.rep
    }
}

impl PartialEq for LazyValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.file, &other.file) && self.rep == other.rep
    }
}

impl std::fmt::Debug for LazyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LazyValue({:?})", self.rep)
    }
}

impl ValueItem for LazyValue {
    const PROXY: bool = true;

    fn proxied_type(&self) -> Option<TypeId> {
        let ty = self.rep.type_enum()?;
        if self.rep.is_array() {
            return Some(match ty {
                TypeEnum::Bool => TypeId::of::<Array<bool>>(),
                TypeEnum::Int => TypeId::of::<Array<i32>>(),
                TypeEnum::UInt => TypeId::of::<Array<u32>>(),
                TypeEnum::Int64 => TypeId::of::<Array<i64>>(),
                TypeEnum::UInt64 => TypeId::of::<Array<u64>>(),
                TypeEnum::Float => TypeId::of::<Array<f32>>(),
                TypeEnum::Double => TypeId::of::<Array<f64>>(),
                TypeEnum::Token => TypeId::of::<Array<Token>>(),
                TypeEnum::String => TypeId::of::<Array<String>>(),
                TypeEnum::Path => TypeId::of::<Array<Path>>(),
                _ => return None,
            });
        }
        Some(match ty {
            TypeEnum::Bool => TypeId::of::<bool>(),
            TypeEnum::Int => TypeId::of::<i32>(),
            TypeEnum::UInt => TypeId::of::<u32>(),
            TypeEnum::Int64 => TypeId::of::<i64>(),
            TypeEnum::UInt64 => TypeId::of::<u64>(),
            TypeEnum::Float => TypeId::of::<f32>(),
            TypeEnum::Double => TypeId::of::<f64>(),
            TypeEnum::String => TypeId::of::<String>(),
            TypeEnum::Token => TypeId::of::<Token>(),
            TypeEnum::Path => TypeId::of::<Path>(),
            TypeEnum::PathListOp => TypeId::of::<PathListOp>(),
            TypeEnum::Payload => TypeId::of::<Payload>(),
            TypeEnum::PayloadListOp => TypeId::of::<PayloadListOp>(),
            TypeEnum::TokenListOp => TypeId::of::<TokenListOp>(),
            TypeEnum::Dictionary => TypeId::of::<Dictionary>(),
            TypeEnum::TimeSamples => TypeId::of::<TimeSamples>(),
            TypeEnum::LayerOffset => TypeId::of::<LayerOffset>(),
            TypeEnum::Invalid => return None,
        })
    }
}

/// A value of a type this reader does not know, carried through
/// rewrites byte-for-byte.
#[derive(Clone, PartialEq)]
pub struct OpaqueValue {
    // Original rep bits; the payload field is only meaningful for
    // inline reps.
    pub(crate) rep: ValueRep,
    pub(crate) data: Vec<u8>,
}

impl std::fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "OpaqueValue(type={}, {} bytes)",
            self.rep.type_byte(),
            self.data.len()
        )
    }
}

impl ValueItem for OpaqueValue {}

/// Resolve a possibly-lazy value to its materialized form.
pub(crate) fn detach_value(value: &Value) -> Value {
    if let Some(lazy) = value.get::<LazyValue>() {
        lazy.resolve()
    } else {
        value.clone()
    }
}

// =============================================================================
// Byte cursor
// =============================================================================

pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Cursor<'a> {
        Cursor { data, pos: 0 }
    }

    pub(crate) fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CrateError> {
        if self.pos + n > self.data.len() {
            return Err(corrupt("truncated section"));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, CrateError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, CrateError> {
        Ok(u32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, CrateError> {
        Ok(u64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64, CrateError> {
        Ok(f64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_extend_48() {
        assert_eq!(sign_extend_48(5), 5);
        assert_eq!(sign_extend_48((1u64 << 48) - 1), -1);
        assert_eq!(sign_extend_48((-42i64 as u64) & ((1 << 48) - 1)), -42);
    }

    #[test]
    fn test_cursor_bounds() {
        let mut c = Cursor::new(&[1, 0, 0, 0]);
        assert_eq!(c.read_u32().unwrap(), 1);
        assert!(c.read_u8().is_err());
    }

    #[test]
    fn test_open_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.strata");
        std::fs::write(&path, b"not a crate file at all........").unwrap();
        match FileData::open(&path, true) {
            Err(CrateError::Corrupt(_)) => {}
            Err(other) => panic!("expected corrupt error, got {other}"),
            Ok(_) => panic!("expected corrupt error, got success"),
        }
    }

    #[test]
    fn test_open_rejects_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.strata");
        std::fs::write(&path, b"STRATACR").unwrap();
        assert!(matches!(
            FileData::open(&path, true),
            Err(CrateError::Corrupt(_))
        ));
    }

    #[test]
    fn test_open_rejects_unknown_major() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.strata");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&[9, 0, 0]); // major 9
        bytes.extend_from_slice(&[0; 5]);
        bytes.extend_from_slice(&[0; 16]); // footer-sized filler
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            FileData::open(&path, true),
            Err(CrateError::UnsupportedVersion(v)) if v.major == 9
        ));
    }
}
