//! Type-Erased Value Container
//!
//! `Value` holds one value of any registered type behind a uniform
//! interface: copy, move, hash, equality, stream-out, typed get, typed
//! swap. The representation is two words:
//!
//! ```text
//! +------------------+----------------------------+
//! | storage (8 bytes)| descriptor ptr | tag bits  |
//! +------------------+----------------------------+
//! ```
//!
//! Small, cheap-to-copy values live directly in the storage word
//! (LOCAL bit set); everything else lives in an atomically
//! reference-counted box that copies share until a mutable access
//! detaches it. The TRIVIAL bit marks types whose assignment is a
//! plain byte copy. The PROXY bit marks values that stand in for a
//! deferred value (the crate reader's lazy representations).
//!
//! ## Registering types
//!
//! A stored type implements [`ValueItem`]. Scalars, `String`,
//! [`Token`], arrays, and dictionaries are registered here; downstream
//! crates register their own types (paths, payloads, list-ops) the
//! same way.
//!
//! ## Hashing
//!
//! Only types that advertise `HASHABLE` can be hashed. Hashing any
//! other value reports a coding error through `tracing` and yields 0,
//! so a bad hash never goes unnoticed in diagnostics.

use crate::array::Array;
use crate::dictionary::Dictionary;
use crate::token::Token;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::error;

// =============================================================================
// Storage
// =============================================================================

const TAG_LOCAL: usize = 1;
const TAG_TRIVIAL: usize = 2;
const TAG_PROXY: usize = 4;
const TAG_MASK: usize = 7;

/// One pointer-sized slot: either the value itself (local) or a
/// pointer to a refcounted box holding it (remote).
#[repr(C)]
union Storage {
    bytes: [u8; 8],
    ptr: *const (),
}

impl Storage {
    #[inline]
    fn zeroed() -> Storage {
        Storage { bytes: [0; 8] }
    }

    #[inline]
    unsafe fn as_local<T>(&self) -> *const T {
        (self as *const Storage).cast::<T>()
    }

    #[inline]
    unsafe fn as_local_mut<T>(&mut self) -> *mut T {
        (self as *mut Storage).cast::<T>()
    }

    #[inline]
    unsafe fn remote<T>(&self) -> *const T {
        unsafe { self.ptr.cast::<T>() }
    }
}

// =============================================================================
// Trait for storable types
// =============================================================================

/// A type that can be held by [`Value`].
///
/// The associated constants size the storage strategy:
/// - `CHEAP_COPY` admits the type to local (in-place) storage when it
///   also fits in one pointer; a cheap copy must be O(1) (plain bytes
///   or a refcount bump).
/// - `TRIVIAL` additionally means plain byte assignment is a correct
///   copy (no `Drop`, no refcounts).
/// - `HASHABLE` advertises that `hash_item` is meaningful.
pub trait ValueItem: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    const CHEAP_COPY: bool = false;
    const TRIVIAL: bool = false;
    const HASHABLE: bool = false;
    const IS_ARRAY: bool = false;
    const PROXY: bool = false;

    /// Hash this value. Only called when `HASHABLE` is true.
    fn hash_item(&self) -> u64 {
        debug_assert!(Self::HASHABLE, "hash_item on unhashable type");
        0
    }

    /// Element count, for array-valued types.
    fn item_len(&self) -> usize {
        0
    }

    /// The type this proxy stands in for, when `PROXY` is true.
    fn proxied_type(&self) -> Option<TypeId> {
        None
    }

    /// Stream-out form. Defaults to the `Debug` form.
    fn stream(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[inline]
pub fn hash_combine(seed: u64, v: u64) -> u64 {
    // 64-bit variant of the classic boost combiner.
    seed ^ (v
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2))
}

fn std_hash<T: Hash>(v: &T) -> u64 {
    let mut h = std::collections::hash_map::DefaultHasher::new();
    v.hash(&mut h);
    h.finish()
}

macro_rules! scalar_value_item {
    ($($t:ty),* $(,)?) => {$(
        impl ValueItem for $t {
            const CHEAP_COPY: bool = true;
            const TRIVIAL: bool = true;
            const HASHABLE: bool = true;
            fn hash_item(&self) -> u64 {
                std_hash(self)
            }
            fn stream(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{self}")
            }
        }
    )*};
}

scalar_value_item!(bool, i8, u8, i16, u16, i32, u32, i64, u64);

macro_rules! float_value_item {
    ($($t:ty),* $(,)?) => {$(
        impl ValueItem for $t {
            const CHEAP_COPY: bool = true;
            const TRIVIAL: bool = true;
            const HASHABLE: bool = true;
            fn hash_item(&self) -> u64 {
                // Hash the bit pattern; +0.0 and -0.0 hash alike.
                let v = if *self == 0.0 { 0.0 } else { *self };
                std_hash(&v.to_bits())
            }
            fn stream(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{self}")
            }
        }
    )*};
}

float_value_item!(f32, f64);

impl ValueItem for String {
    const HASHABLE: bool = true;
    fn hash_item(&self) -> u64 {
        std_hash(self)
    }
    fn stream(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self)
    }
}

impl ValueItem for Token {
    const CHEAP_COPY: bool = true;
    const TRIVIAL: bool = true;
    const HASHABLE: bool = true;
    fn hash_item(&self) -> u64 {
        self.hash_value()
    }
    fn stream(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<T: ValueItem> ValueItem for Array<T> {
    // An array is one Arc pointer; copying shares the buffer.
    const CHEAP_COPY: bool = true;
    const HASHABLE: bool = T::HASHABLE;
    const IS_ARRAY: bool = true;

    fn hash_item(&self) -> u64 {
        let mut h = self.len() as u64;
        for item in self.as_slice() {
            h = hash_combine(h, item.hash_item());
        }
        h
    }

    fn item_len(&self) -> usize {
        self.len()
    }
}

impl ValueItem for Dictionary {}

impl ValueItem for crate::layer_offset::LayerOffset {
    fn stream(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl<T: ValueItem> ValueItem for crate::listop::ListOp<T> {}

// =============================================================================
// Per-type descriptor
// =============================================================================

/// Function table describing how to manipulate one stored type. One
/// static instance exists per registered type.
#[repr(align(8))]
pub struct VTable {
    type_id: fn() -> TypeId,
    type_name: fn() -> &'static str,
    local: bool,
    trivial: bool,
    hashable: bool,
    is_array: bool,
    proxy: bool,
    copy_init: unsafe fn(&Storage, &mut Storage),
    destroy: unsafe fn(&mut Storage),
    hash: unsafe fn(&Storage) -> u64,
    equal: unsafe fn(&Storage, &Storage) -> bool,
    make_unique: unsafe fn(&mut Storage),
    stream: unsafe fn(&Storage, &mut fmt::Formatter<'_>) -> fmt::Result,
    array_len: unsafe fn(&Storage) -> usize,
    proxied_type: unsafe fn(&Storage) -> Option<TypeId>,
}

struct VTableOf<T>(PhantomData<T>);

impl<T: ValueItem> VTableOf<T> {
    const LOCAL: bool = std::mem::size_of::<T>() <= std::mem::size_of::<Storage>()
        && std::mem::align_of::<T>() <= std::mem::align_of::<Storage>()
        && T::CHEAP_COPY;

    const VTABLE: VTable = VTable {
        type_id: TypeId::of::<T>,
        type_name: std::any::type_name::<T>,
        local: Self::LOCAL,
        trivial: Self::LOCAL && T::TRIVIAL,
        hashable: T::HASHABLE,
        is_array: T::IS_ARRAY,
        proxy: T::PROXY,
        copy_init: Self::copy_init,
        destroy: Self::destroy,
        hash: Self::hash,
        equal: Self::equal,
        make_unique: Self::make_unique,
        stream: Self::stream,
        array_len: Self::array_len,
        proxied_type: Self::proxied_type,
    };

    #[inline]
    unsafe fn value_ref(storage: &Storage) -> *const T {
        unsafe {
            if Self::LOCAL {
                storage.as_local::<T>()
            } else {
                storage.remote::<T>()
            }
        }
    }

    unsafe fn copy_init(src: &Storage, dst: &mut Storage) {
        unsafe {
            if Self::LOCAL {
                let v = (*src.as_local::<T>()).clone();
                std::ptr::write(dst.as_local_mut::<T>(), v);
            } else {
                let p = src.remote::<T>();
                Arc::increment_strong_count(p);
                dst.ptr = p.cast();
            }
        }
    }

    unsafe fn destroy(storage: &mut Storage) {
        unsafe {
            if Self::LOCAL {
                std::ptr::drop_in_place(storage.as_local_mut::<T>());
            } else {
                drop(Arc::from_raw(storage.remote::<T>()));
            }
        }
    }

    unsafe fn hash(storage: &Storage) -> u64 {
        unsafe { (*Self::value_ref(storage)).hash_item() }
    }

    unsafe fn equal(a: &Storage, b: &Storage) -> bool {
        unsafe {
            if !Self::LOCAL && std::ptr::eq(a.remote::<T>(), b.remote::<T>()) {
                return true;
            }
            *Self::value_ref(a) == *Self::value_ref(b)
        }
    }

    unsafe fn make_unique(storage: &mut Storage) {
        unsafe {
            if !Self::LOCAL {
                let mut arc = Arc::from_raw(storage.remote::<T>());
                Arc::make_mut(&mut arc);
                storage.ptr = Arc::into_raw(arc).cast();
            }
        }
    }

    unsafe fn stream(storage: &Storage, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        unsafe { (*Self::value_ref(storage)).stream(f) }
    }

    unsafe fn array_len(storage: &Storage) -> usize {
        unsafe { (*Self::value_ref(storage)).item_len() }
    }

    unsafe fn proxied_type(storage: &Storage) -> Option<TypeId> {
        unsafe { (*Self::value_ref(storage)).proxied_type() }
    }
}

#[inline]
fn vtable_of<T: ValueItem>() -> &'static VTable {
    &VTableOf::<T>::VTABLE
}

// =============================================================================
// Value
// =============================================================================

/// An erased container for one value of any registered type.
pub struct Value {
    storage: Storage,
    // &'static VTable with TAG_* bits packed into the low bits.
    info: usize,
}

const _: () = assert!(std::mem::size_of::<Value>() <= 16);

// Safety: every storable type is Send + Sync (ValueItem supertraits),
// remote boxes are Arc-backed, and Value has no interior mutability.
unsafe impl Send for Value {}
unsafe impl Sync for Value {}

impl Value {
    /// The empty value, holding nothing.
    pub const fn empty() -> Value {
        Value {
            storage: Storage { bytes: [0; 8] },
            info: 0,
        }
    }

    /// Construct a value holding `v`.
    pub fn new<T: ValueItem>(v: T) -> Value {
        let vt = vtable_of::<T>();
        let mut tag = 0;
        let mut storage = Storage::zeroed();
        if vt.local {
            tag |= TAG_LOCAL;
            if vt.trivial {
                tag |= TAG_TRIVIAL;
            }
            unsafe { std::ptr::write(storage.as_local_mut::<T>(), v) };
        } else {
            storage.ptr = Arc::into_raw(Arc::new(v)).cast();
        }
        if vt.proxy {
            tag |= TAG_PROXY;
        }
        Value {
            storage,
            info: (vt as *const VTable as usize) | tag,
        }
    }

    #[inline]
    fn vtable(&self) -> Option<&'static VTable> {
        let p = self.info & !TAG_MASK;
        if p == 0 {
            None
        } else {
            Some(unsafe { &*(p as *const VTable) })
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.info == 0
    }

    /// Whether the held value lives in local storage.
    #[inline]
    pub fn is_local(&self) -> bool {
        self.info & TAG_LOCAL != 0
    }

    /// Whether the held value stands in for a deferred value.
    #[inline]
    pub fn is_proxy(&self) -> bool {
        self.info & TAG_PROXY != 0
    }

    pub fn type_id(&self) -> Option<TypeId> {
        self.vtable().map(|vt| (vt.type_id)())
    }

    pub fn type_name(&self) -> &'static str {
        self.vtable().map_or("<empty>", |vt| (vt.type_name)())
    }

    /// True if this value holds a `T`, or proxies one.
    pub fn is_holding<T: ValueItem>(&self) -> bool {
        match self.vtable() {
            None => false,
            Some(vt) => {
                let want = TypeId::of::<T>();
                if (vt.type_id)() == want {
                    return true;
                }
                if vt.proxy {
                    let proxied = unsafe { (vt.proxied_type)(&self.storage) };
                    return proxied == Some(want);
                }
                false
            }
        }
    }

    /// Borrow the held value if it is exactly a `T`.
    pub fn get<T: ValueItem>(&self) -> Option<&T> {
        let vt = self.vtable()?;
        if (vt.type_id)() != TypeId::of::<T>() {
            return None;
        }
        Some(unsafe { &*VTableOf::<T>::value_ref(&self.storage) })
    }

    /// Mutably borrow the held value, detaching shared remote storage
    /// first.
    pub fn get_mut<T: ValueItem>(&mut self) -> Option<&mut T> {
        let vt = self.vtable()?;
        if (vt.type_id)() != TypeId::of::<T>() {
            return None;
        }
        unsafe {
            (vt.make_unique)(&mut self.storage);
            if vt.local {
                Some(&mut *self.storage.as_local_mut::<T>())
            } else {
                Some(&mut *(self.storage.remote::<T>() as *mut T))
            }
        }
    }

    /// Clone out the held value, or the registered/derived default,
    /// reporting a type mismatch when the held type differs.
    pub fn get_or_default<T: ValueItem + Default>(&self) -> T {
        if let Some(v) = self.get::<T>() {
            return v.clone();
        }
        error!(
            held = self.type_name(),
            requested = std::any::type_name::<T>(),
            "type mismatch in typed get; returning default"
        );
        if let Some(fallback) = DEFAULT_REGISTRY.get(&TypeId::of::<T>()) {
            if let Some(v) = fallback.get::<T>() {
                return v.clone();
            }
        }
        T::default()
    }

    /// Move the held value out, leaving this value empty.
    pub fn take<T: ValueItem>(&mut self) -> Option<T> {
        let vt = self.vtable()?;
        if (vt.type_id)() != TypeId::of::<T>() {
            return None;
        }
        let mut out = std::mem::replace(self, Value::empty());
        unsafe {
            let v = if vt.local {
                std::ptr::read(out.storage.as_local::<T>())
            } else {
                let arc = Arc::from_raw(out.storage.remote::<T>());
                Arc::try_unwrap(arc).unwrap_or_else(|shared| (*shared).clone())
            };
            // Storage has been consumed; forget the temporary so its
            // Drop does not run the destructor again.
            out.info = 0;
            std::mem::forget(out);
            Some(v)
        }
    }

    /// Exchange the held `T` with `*other`. Returns false (and leaves
    /// both sides untouched) if this value is not holding a `T`.
    pub fn swap_typed<T: ValueItem>(&mut self, other: &mut T) -> bool {
        match self.get_mut::<T>() {
            Some(held) => {
                std::mem::swap(held, other);
                true
            }
            None => false,
        }
    }

    /// Exchange the contents of two erased values.
    pub fn swap(&mut self, other: &mut Value) {
        std::mem::swap(self, other);
    }

    /// Hash the held value. Unhashable types report a coding error and
    /// hash to 0.
    pub fn hash_value(&self) -> u64 {
        match self.vtable() {
            None => 0,
            Some(vt) => {
                if !vt.hashable {
                    error!(
                        held = self.type_name(),
                        "hash requested for unhashable value type"
                    );
                    return 0;
                }
                unsafe { (vt.hash)(&self.storage) }
            }
        }
    }

    /// Whether the held type advertises hashability.
    pub fn is_hashable(&self) -> bool {
        self.vtable().is_some_and(|vt| vt.hashable)
    }

    /// Whether the held value is array-valued.
    pub fn is_array_valued(&self) -> bool {
        self.vtable().is_some_and(|vt| vt.is_array)
    }

    /// Element count of an array-valued value; 0 otherwise.
    pub fn array_len(&self) -> usize {
        match self.vtable() {
            Some(vt) if vt.is_array => unsafe { (vt.array_len)(&self.storage) },
            _ => 0,
        }
    }

    /// Convert to `T` through the registered cast table. Identity
    /// casts clone. Yields `None` when no conversion applies.
    pub fn cast<T: ValueItem>(&self) -> Option<Value> {
        let from = self.type_id()?;
        let to = TypeId::of::<T>();
        if from == to {
            return Some(self.clone());
        }
        let f = CAST_REGISTRY.get(&(from, to))?.clone();
        f(self)
    }

    /// Convert to the type held by `other` (weaker-opinion coercion in
    /// dictionary overlays).
    pub fn cast_to_type_of(&self, other: &Value) -> Option<Value> {
        let from = self.type_id()?;
        let to = other.type_id()?;
        if from == to {
            return Some(self.clone());
        }
        let f = CAST_REGISTRY.get(&(from, to))?.clone();
        f(self)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::empty()
    }
}

impl Clone for Value {
    fn clone(&self) -> Self {
        match self.vtable() {
            None => Value::empty(),
            Some(vt) => {
                let mut storage = Storage::zeroed();
                if vt.local && vt.trivial {
                    storage = Storage {
                        bytes: unsafe { self.storage.bytes },
                    };
                } else {
                    unsafe { (vt.copy_init)(&self.storage, &mut storage) };
                }
                Value {
                    storage,
                    info: self.info,
                }
            }
        }
    }
}

impl Drop for Value {
    fn drop(&mut self) {
        if let Some(vt) = self.vtable() {
            if !vt.trivial {
                unsafe { (vt.destroy)(&mut self.storage) };
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self.vtable(), other.vtable()) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                if (a.type_id)() != (b.type_id)() {
                    return false;
                }
                unsafe { (a.equal)(&self.storage, &other.storage) }
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vtable() {
            None => f.write_str("Value(<empty>)"),
            Some(vt) => {
                write!(f, "Value<{}>(", (vt.type_name)())?;
                unsafe { (vt.stream)(&self.storage, f)? };
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vtable() {
            None => Ok(()),
            Some(vt) => unsafe { (vt.stream)(&self.storage, f) },
        }
    }
}

impl<T: ValueItem> From<T> for Value {
    fn from(v: T) -> Self {
        Value::new(v)
    }
}

// =============================================================================
// Cast and default-value registries
// =============================================================================

type CastFn = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

static CAST_REGISTRY: Lazy<DashMap<(TypeId, TypeId), CastFn>> = Lazy::new(DashMap::new);

static DEFAULT_REGISTRY: Lazy<DashMap<TypeId, Value>> = Lazy::new(DashMap::new);

/// Register a conversion from `F` to `T` for [`Value::cast`].
pub fn register_cast<F: ValueItem, T: ValueItem>(f: fn(&F) -> Option<T>) {
    let erased: CastFn = Arc::new(move |v: &Value| v.get::<F>().and_then(f).map(Value::new));
    CAST_REGISTRY.insert((TypeId::of::<F>(), TypeId::of::<T>()), erased);
}

/// Register the default value handed out by `get_or_default` on a type
/// mismatch.
pub fn register_default<T: ValueItem>(v: T) {
    DEFAULT_REGISTRY.insert(TypeId::of::<T>(), Value::new(v));
}

/// Standard numeric and string conversions, installed once.
pub fn ensure_standard_casts() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        register_cast::<i32, i64>(|v| Some(*v as i64));
        register_cast::<i64, i32>(|v| i32::try_from(*v).ok());
        register_cast::<i32, f64>(|v| Some(*v as f64));
        register_cast::<i64, f64>(|v| Some(*v as f64));
        register_cast::<f32, f64>(|v| Some(*v as f64));
        register_cast::<f64, f32>(|v| Some(*v as f32));
        register_cast::<u32, u64>(|v| Some(*v as u64));
        register_cast::<u64, u32>(|v| u32::try_from(*v).ok());
        register_cast::<bool, i32>(|v| Some(*v as i32));
        register_cast::<Token, String>(|v| Some(v.as_str().to_string()));
        register_cast::<String, Token>(|v| Some(Token::new(v)));
    });
}
