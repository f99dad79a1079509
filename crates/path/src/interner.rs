//! The Global Path Interner
//!
//! Hash-conses path nodes so that every distinct logical path has
//! exactly one node chain, process-wide. Two concurrent tables map
//! `(parent handle, discriminant)` to pool handles: one for prim-part
//! nodes, one for property-part nodes. Prim-property nodes are keyed
//! with a *null* parent so that a property element is interned once
//! per unique name regardless of which prim it hangs off; this is what
//! makes `Foo/Bar.radius` and `Baz.radius` share the `.radius` node.
//!
//! ## Find-or-create protocol
//!
//! On lookup we either insert a freshly constructed node, or find an
//! existing handle and claim a reference with `fetch_add`. A prior
//! count of zero means another thread is concurrently destroying that
//! node: we treat the slot as empty, construct a new node, and
//! overwrite. The destroyer erases its table entry only if the slot
//! still points at the dying node, so the overwritten slot is left
//! alone. The abandoned increment on the dying node is harmless; that
//! node is already past the point of no return.
//!
//! ## Lazy path strings
//!
//! A path's canonical string is built on first request and cached in a
//! side table keyed by prim node, with a short-locked inner map keyed
//! by property node. The prim node's refcount carries a has-token bit;
//! its destructor consults the bit to erase the outer entry.

use crate::node::{
    HAS_TOKEN_BIT, NodeType, PathNode, Payload, REF_COUNT_MASK,
};
use crate::path::Path;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use strata_core::{Handle, Pool, Token};

// =============================================================================
// Pools
// =============================================================================

static PRIM_POOL: Lazy<Pool> = Lazy::new(|| {
    Pool::new(
        "path-prim-part",
        std::mem::size_of::<PathNode>(),
        /*region_bits=*/ 8,
    )
});

static PROP_POOL: Lazy<Pool> = Lazy::new(|| {
    Pool::new(
        "path-prop-part",
        std::mem::size_of::<PathNode>(),
        /*region_bits=*/ 8,
    )
});

/// Resolve a prim-part handle. The node must be live.
#[inline]
pub(crate) fn prim_node(raw: u32) -> &'static PathNode {
    debug_assert!(raw != 0);
    // Safety: live handles point at constructed nodes; nodes are only
    // dropped when their refcount reaches zero.
    unsafe { &*(PRIM_POOL.get_ptr(Handle(raw)) as *const PathNode) }
}

/// Resolve a prop-part handle. The node must be live.
#[inline]
pub(crate) fn prop_node(raw: u32) -> &'static PathNode {
    debug_assert!(raw != 0);
    unsafe { &*(PROP_POOL.get_ptr(Handle(raw)) as *const PathNode) }
}

// =============================================================================
// Tables
// =============================================================================

/// Discriminants for prim-part nodes, keyed with the parent handle.
#[derive(Clone, PartialEq, Eq, Hash)]
enum PrimKey {
    Child(u32, Token),
    VariantSelection(u32, Token, Token),
}

/// Discriminants for property-part nodes. `Property` carries no parent
/// by design: the property tree is parented by null.
#[derive(Clone, PartialEq, Eq, Hash)]
enum PropKey {
    Property(Token),
    Target(u32, Path),
    Mapper(u32, Path),
    RelationalAttribute(u32, Token),
    MapperArg(u32, Token),
    Expression(u32),
}

static PRIM_TABLE: Lazy<DashMap<PrimKey, u32>> =
    Lazy::new(|| DashMap::with_capacity(32768));
static PROP_TABLE: Lazy<DashMap<PropKey, u32>> =
    Lazy::new(|| DashMap::with_capacity(32768));

// =============================================================================
// Roots
// =============================================================================

static ABSOLUTE_ROOT: Lazy<u32> = Lazy::new(|| new_root(true));
static RELATIVE_ROOT: Lazy<u32> = Lazy::new(|| new_root(false));

fn new_root(is_absolute: bool) -> u32 {
    let h = PRIM_POOL.allocate();
    let node = PathNode {
        parent: 0,
        ref_count: AtomicU32::new(1),
        element_count: 0,
        node_type: NodeType::Root,
        flags: if is_absolute {
            crate::node::FLAG_IS_ABSOLUTE
        } else {
            0
        },
        payload: Payload::None,
    };
    unsafe { std::ptr::write(PRIM_POOL.get_ptr(h) as *mut PathNode, node) };
    h.value()
}

/// The eternal '/' node.
#[inline]
pub(crate) fn absolute_root() -> u32 {
    *ABSOLUTE_ROOT
}

/// The eternal '.' node.
#[inline]
pub(crate) fn relative_root() -> u32 {
    *RELATIVE_ROOT
}

// =============================================================================
// Reference counting
// =============================================================================

#[inline]
pub(crate) fn add_ref_prim(raw: u32) {
    if raw != 0 {
        prim_node(raw).ref_count.fetch_add(1, Ordering::Relaxed);
    }
}

#[inline]
pub(crate) fn add_ref_prop(raw: u32) {
    if raw != 0 {
        prop_node(raw).ref_count.fetch_add(1, Ordering::Relaxed);
    }
}

#[inline]
pub(crate) fn release_prim(raw: u32) {
    if raw != 0 && prim_node(raw).ref_count.fetch_sub(1, Ordering::AcqRel) & REF_COUNT_MASK == 1 {
        destroy_prim(raw);
    }
}

#[inline]
pub(crate) fn release_prop(raw: u32) {
    if raw != 0 && prop_node(raw).ref_count.fetch_sub(1, Ordering::AcqRel) & REF_COUNT_MASK == 1 {
        destroy_prop(raw);
    }
}

fn destroy_prim(raw: u32) {
    let node = prim_node(raw);

    if node.ref_count.load(Ordering::Relaxed) & HAS_TOKEN_BIT != 0 {
        // Drops the inner token map after the shard lock is released.
        let _removed = PATH_TOKEN_TABLE.remove(&raw);
    }

    // Erase our table entry, but only if the slot still points at this
    // node; find-or-create may have refilled it.
    match (&node.payload, node.node_type) {
        (Payload::Name(t), NodeType::Prim) => {
            let _ = PRIM_TABLE.remove_if(&PrimKey::Child(node.parent, *t), |_, v| *v == raw);
        }
        (Payload::VariantSelection(set, var), NodeType::PrimVariantSelection) => {
            let _ = PRIM_TABLE.remove_if(
                &PrimKey::VariantSelection(node.parent, *set, *var),
                |_, v| *v == raw,
            );
        }
        _ => {}
    }

    let parent = node.parent;
    // Safety: the node is dead to all tables; nothing can find it.
    unsafe { std::ptr::drop_in_place(PRIM_POOL.get_ptr(Handle(raw)) as *mut PathNode) };
    PRIM_POOL.free(Handle(raw));
    release_prim(parent);
}

fn destroy_prop(raw: u32) {
    let node = prop_node(raw);

    match (&node.payload, node.node_type) {
        (Payload::Name(t), NodeType::PrimProperty) => {
            let _ = PROP_TABLE.remove_if(&PropKey::Property(*t), |_, v| *v == raw);
        }
        (Payload::Name(t), NodeType::RelationalAttribute) => {
            let _ = PROP_TABLE.remove_if(
                &PropKey::RelationalAttribute(node.parent, *t),
                |_, v| *v == raw,
            );
        }
        (Payload::Name(t), NodeType::MapperArg) => {
            let _ = PROP_TABLE.remove_if(&PropKey::MapperArg(node.parent, *t), |_, v| *v == raw);
        }
        (Payload::TargetPath(p), NodeType::Target) => {
            let _ = PROP_TABLE.remove_if(&PropKey::Target(node.parent, p.clone()), |_, v| {
                *v == raw
            });
        }
        (Payload::TargetPath(p), NodeType::Mapper) => {
            let _ = PROP_TABLE.remove_if(&PropKey::Mapper(node.parent, p.clone()), |_, v| {
                *v == raw
            });
        }
        (Payload::None, NodeType::Expression) => {
            let _ = PROP_TABLE.remove_if(&PropKey::Expression(node.parent), |_, v| *v == raw);
        }
        _ => {}
    }

    let parent = node.parent;
    unsafe { std::ptr::drop_in_place(PROP_POOL.get_ptr(Handle(raw)) as *mut PathNode) };
    PROP_POOL.free(Handle(raw));
    release_prop(parent);
}

// =============================================================================
// Node construction
// =============================================================================

// Construct a node with refcount 1 (the caller's reference). The
// parent gains a reference for the child's parent pointer.
fn new_node(pool: &Pool, parent: u32, parent_is_prim: bool, node_type: NodeType, payload: Payload) -> u32 {
    let (element_count, flags) = if parent != 0 {
        let p = if parent_is_prim {
            prim_node(parent)
        } else {
            prop_node(parent)
        };
        p.ref_count.fetch_add(1, Ordering::Relaxed);
        (p.element_count + 1, p.flags | node_type.intrinsic_flags())
    } else {
        (1, node_type.intrinsic_flags())
    };
    let h = pool.allocate();
    let node = PathNode {
        parent,
        ref_count: AtomicU32::new(1),
        element_count,
        node_type,
        flags,
        payload,
    };
    unsafe { std::ptr::write(pool.get_ptr(h) as *mut PathNode, node) };
    h.value()
}

fn find_or_create_prim_part(key: PrimKey, make: impl FnOnce() -> u32) -> u32 {
    match PRIM_TABLE.entry(key) {
        Entry::Occupied(mut e) => {
            let h = *e.get();
            let prior = prim_node(h).ref_count.fetch_add(1, Ordering::Relaxed);
            if prior & REF_COUNT_MASK == 0 {
                // The node is being destroyed; refill the slot.
                let fresh = make();
                *e.get_mut() = fresh;
                fresh
            } else {
                h
            }
        }
        Entry::Vacant(v) => {
            let fresh = make();
            v.insert(fresh);
            fresh
        }
    }
}

fn find_or_create_prop_part(key: PropKey, make: impl FnOnce() -> u32) -> u32 {
    match PROP_TABLE.entry(key) {
        Entry::Occupied(mut e) => {
            let h = *e.get();
            let prior = prop_node(h).ref_count.fetch_add(1, Ordering::Relaxed);
            if prior & REF_COUNT_MASK == 0 {
                let fresh = make();
                *e.get_mut() = fresh;
                fresh
            } else {
                h
            }
        }
        Entry::Vacant(v) => {
            let fresh = make();
            v.insert(fresh);
            fresh
        }
    }
}

/// Find or create a prim child node. Returns an owned reference.
pub(crate) fn find_or_create_prim(parent: u32, name: Token) -> u32 {
    find_or_create_prim_part(PrimKey::Child(parent, name), || {
        new_node(&PRIM_POOL, parent, true, NodeType::Prim, Payload::Name(name))
    })
}

/// Find or create a variant-selection node. Returns an owned reference.
pub(crate) fn find_or_create_prim_variant_selection(parent: u32, set: Token, var: Token) -> u32 {
    find_or_create_prim_part(PrimKey::VariantSelection(parent, set, var), || {
        new_node(
            &PRIM_POOL,
            parent,
            true,
            NodeType::PrimVariantSelection,
            Payload::VariantSelection(set, var),
        )
    })
}

/// Find or create a prim-property node. Parented by null so that the
/// property suffix is shared across prims. Returns an owned reference.
pub(crate) fn find_or_create_prim_property(name: Token) -> u32 {
    find_or_create_prop_part(PropKey::Property(name), || {
        new_node(&PROP_POOL, 0, false, NodeType::PrimProperty, Payload::Name(name))
    })
}

/// Find or create a target node under a property node. Returns an
/// owned reference.
pub(crate) fn find_or_create_target(parent: u32, target: Path) -> u32 {
    find_or_create_prop_part(PropKey::Target(parent, target.clone()), || {
        new_node(
            &PROP_POOL,
            parent,
            false,
            NodeType::Target,
            Payload::TargetPath(target),
        )
    })
}

/// Find or create a mapper node under a property node. Returns an
/// owned reference.
pub(crate) fn find_or_create_mapper(parent: u32, target: Path) -> u32 {
    find_or_create_prop_part(PropKey::Mapper(parent, target.clone()), || {
        new_node(
            &PROP_POOL,
            parent,
            false,
            NodeType::Mapper,
            Payload::TargetPath(target),
        )
    })
}

/// Find or create a relational-attribute node under a target node.
/// Returns an owned reference.
pub(crate) fn find_or_create_relational_attribute(parent: u32, name: Token) -> u32 {
    find_or_create_prop_part(PropKey::RelationalAttribute(parent, name), || {
        new_node(
            &PROP_POOL,
            parent,
            false,
            NodeType::RelationalAttribute,
            Payload::Name(name),
        )
    })
}

/// Find or create a mapper-arg node under a mapper node. Returns an
/// owned reference.
pub(crate) fn find_or_create_mapper_arg(parent: u32, name: Token) -> u32 {
    find_or_create_prop_part(PropKey::MapperArg(parent, name), || {
        new_node(&PROP_POOL, parent, false, NodeType::MapperArg, Payload::Name(name))
    })
}

/// Find or create an expression node under a property node. Returns an
/// owned reference.
pub(crate) fn find_or_create_expression(parent: u32) -> u32 {
    find_or_create_prop_part(PropKey::Expression(parent), || {
        new_node(&PROP_POOL, parent, false, NodeType::Expression, Payload::None)
    })
}

// =============================================================================
// Lazy path-string side table
// =============================================================================

// Outer table keyed by prim node; inner short-locked map keyed by prop
// node (0 for the prim path itself). The inner map lives behind an Arc
// so the outer shard lock can be released before building a token,
// which may re-enter here for embedded target paths.
type PropToTokenMap = Arc<Mutex<BTreeMap<u32, Token>>>;

static PATH_TOKEN_TABLE: Lazy<DashMap<u32, PropToTokenMap>> = Lazy::new(DashMap::new);

/// Fetch the cached canonical string for (prim, prop), building it
/// with `make` on first request.
pub(crate) fn get_path_token(prim: u32, prop: u32, make: impl FnOnce() -> Token) -> Token {
    // Mark the prim node; its destructor will clear the table entry.
    prim_node(prim).ref_count.fetch_or(HAS_TOKEN_BIT, Ordering::Relaxed);

    let inner: PropToTokenMap = PATH_TOKEN_TABLE
        .entry(prim)
        .or_insert_with(|| Arc::new(Mutex::new(BTreeMap::new())))
        .clone();

    {
        let map = inner.lock();
        if let Some(t) = map.get(&prop) {
            return *t;
        }
    }
    // Build outside the lock; token construction can recurse into this
    // table for embedded target paths.
    let tok = make();
    let mut map = inner.lock();
    *map.entry(prop).or_insert(tok)
}

/// Number of live entries in the two interner tables; diagnostic only.
pub fn table_sizes() -> (usize, usize) {
    (PRIM_TABLE.len(), PROP_TABLE.len())
}
