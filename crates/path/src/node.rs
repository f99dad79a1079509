//! Path Nodes
//!
//! A `PathNode` is one element of an interned path: a prim name, a
//! variant selection, a property name, an embedded target, and so on.
//! Nodes are immutable once created, reference-counted, and stored in
//! fixed-size pools so a whole path is two 32-bit handles.
//!
//! The node set used to be a class hierarchy in spirit; here it is one
//! struct with a type tag and a discriminated payload. The tag directs
//! all behavior.
//!
//! Nodes split across two prefix trees. "Prim-like" nodes (the two
//! roots, prims, variant selections) form one tree; "property-like"
//! nodes (prim properties, targets, relational attributes, mappers,
//! mapper args, expressions) form the other. There are far fewer
//! unique property nodes than prim nodes, and a property node chain is
//! parented independently of any prim, so property suffixes are shared
//! across all prims carrying the same property.

use crate::path::Path;
use std::sync::atomic::AtomicU32;
use strata_core::Token;

/// Node flag: the chain below this node is absolute (starts at '/').
pub(crate) const FLAG_IS_ABSOLUTE: u8 = 1 << 0;
/// Node flag: some ancestor (or this node) is a variant selection.
pub(crate) const FLAG_CONTAINS_VARIANT_SELECTION: u8 = 1 << 1;
/// Node flag: some ancestor (or this node) embeds a target path.
pub(crate) const FLAG_CONTAINS_TARGET_PATH: u8 = 1 << 2;

/// High bit of the refcount marks "this node's path string is cached
/// in the token table"; the destructor consults it.
pub(crate) const HAS_TOKEN_BIT: u32 = 1 << 31;
pub(crate) const REF_COUNT_MASK: u32 = !HAS_TOKEN_BIT;

/// Kinds of path node. The numeric order participates in path
/// ordering, so it is part of the on-disk contract.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeType {
    // Prim-portion node types.
    Root = 0,
    Prim = 1,
    PrimVariantSelection = 2,
    // Property-portion node types.
    PrimProperty = 3,
    Target = 4,
    Mapper = 5,
    RelationalAttribute = 6,
    MapperArg = 7,
    Expression = 8,
}

impl NodeType {
    pub(crate) fn intrinsic_flags(self) -> u8 {
        match self {
            NodeType::PrimVariantSelection => FLAG_CONTAINS_VARIANT_SELECTION,
            NodeType::Target | NodeType::Mapper => FLAG_CONTAINS_TARGET_PATH,
            _ => 0,
        }
    }

    /// Whether nodes of this type live in the prim-part tree.
    pub(crate) fn is_prim_part(self) -> bool {
        matches!(
            self,
            NodeType::Root | NodeType::Prim | NodeType::PrimVariantSelection
        )
    }
}

/// Type-specific node content.
pub(crate) enum Payload {
    /// Roots and expressions carry nothing.
    None,
    /// Prim, property, relational attribute, mapper arg: a name.
    Name(Token),
    /// Variant selection: (variant set, variant).
    VariantSelection(Token, Token),
    /// Target and mapper: a full embedded path.
    TargetPath(Path),
}

/// One interned path element. Size matters: the pools allocate
/// millions of these.
pub(crate) struct PathNode {
    /// Handle of the parent node in the same tree's pool; 0 for the
    /// roots and for prim-property nodes (which start the property
    /// tree).
    pub(crate) parent: u32,
    /// Reference count; the high bit is `HAS_TOKEN_BIT`.
    pub(crate) ref_count: AtomicU32,
    pub(crate) element_count: u16,
    pub(crate) node_type: NodeType,
    pub(crate) flags: u8,
    pub(crate) payload: Payload,
}

impl PathNode {
    #[inline]
    pub(crate) fn is_absolute(&self) -> bool {
        self.flags & FLAG_IS_ABSOLUTE != 0
    }

    #[inline]
    pub(crate) fn contains_variant_selection(&self) -> bool {
        self.flags & FLAG_CONTAINS_VARIANT_SELECTION != 0
    }

    #[inline]
    pub(crate) fn contains_target_path(&self) -> bool {
        self.flags & FLAG_CONTAINS_TARGET_PATH != 0
    }

    /// The node's name. Roots answer their sentinel spelling,
    /// expressions answer `expression`, variant selections answer the
    /// variant (or the set when the variant is empty).
    pub(crate) fn name(&self) -> Token {
        match (&self.payload, self.node_type) {
            (_, NodeType::Root) => {
                if self.is_absolute() {
                    Token::new("/")
                } else {
                    Token::new(".")
                }
            }
            (_, NodeType::Expression) => Token::new("expression"),
            (Payload::Name(t), _) => *t,
            (Payload::VariantSelection(set, var), _) => {
                if var.is_empty() {
                    *set
                } else {
                    *var
                }
            }
            _ => Token::empty(),
        }
    }

    pub(crate) fn target_path(&self) -> Option<&Path> {
        match &self.payload {
            Payload::TargetPath(p) => Some(p),
            _ => None,
        }
    }

    pub(crate) fn variant_selection(&self) -> Option<(Token, Token)> {
        match &self.payload {
            Payload::VariantSelection(set, var) => Some((*set, *var)),
            _ => None,
        }
    }

    /// Append this element's text (".name", "{set=sel}", "[path]",
    /// ...) to `out`.
    pub(crate) fn write_element(&self, out: &mut String) {
        match self.node_type {
            NodeType::Root => {}
            NodeType::Prim => {
                if let Payload::Name(t) = &self.payload {
                    out.push_str(t.as_str());
                }
            }
            NodeType::PrimProperty | NodeType::RelationalAttribute | NodeType::MapperArg => {
                if let Payload::Name(t) = &self.payload {
                    out.push('.');
                    out.push_str(t.as_str());
                }
            }
            NodeType::PrimVariantSelection => {
                if let Payload::VariantSelection(set, var) = &self.payload {
                    out.push('{');
                    out.push_str(set.as_str());
                    out.push('=');
                    out.push_str(var.as_str());
                    out.push('}');
                }
            }
            NodeType::Target => {
                if let Payload::TargetPath(p) = &self.payload {
                    out.push('[');
                    out.push_str(&p.as_string());
                    out.push(']');
                }
            }
            NodeType::Mapper => {
                if let Payload::TargetPath(p) = &self.payload {
                    out.push_str(".mapper[");
                    out.push_str(&p.as_string());
                    out.push(']');
                }
            }
            NodeType::Expression => out.push_str(".expression"),
        }
    }

    /// Equality of two nodes' discriminants. Only meaningful when both
    /// nodes share a parent.
    pub(crate) fn eq_discriminant(&self, other: &PathNode) -> bool {
        if self.node_type != other.node_type {
            return false;
        }
        match (&self.payload, &other.payload) {
            (Payload::None, Payload::None) => {
                // Two roots compare by absoluteness.
                self.node_type != NodeType::Root || self.is_absolute() == other.is_absolute()
            }
            (Payload::Name(a), Payload::Name(b)) => a == b,
            (Payload::VariantSelection(asrc, av), Payload::VariantSelection(bsrc, bv)) => {
                asrc == bsrc && av == bv
            }
            (Payload::TargetPath(a), Payload::TargetPath(b)) => a == b,
            _ => false,
        }
    }

    /// Lexicographic ordering of two nodes' discriminants, node type
    /// first. Only meaningful when both nodes share a parent.
    pub(crate) fn cmp_discriminant(&self, other: &PathNode) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match self.node_type.cmp(&other.node_type) {
            Ordering::Equal => {}
            o => return o,
        }
        match (&self.payload, &other.payload) {
            (Payload::None, Payload::None) => {
                // absolute < relative
                if self.node_type == NodeType::Root {
                    other.is_absolute().cmp(&self.is_absolute())
                } else {
                    Ordering::Equal
                }
            }
            (Payload::Name(a), Payload::Name(b)) => a.cmp(b),
            (Payload::VariantSelection(asrc, av), Payload::VariantSelection(bsrc, bv)) => {
                (asrc, av).cmp(&(bsrc, bv))
            }
            (Payload::TargetPath(a), Payload::TargetPath(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}
