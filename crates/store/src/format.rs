//! Crate File Format Constants
//!
//! The crate file is little-endian throughout:
//!
//! ```text
//! +--------------------------------------------------+
//! | header: 8-byte magic, 3-byte version, 5 reserved |
//! | sections: TOKENS STRINGS FIELDS FIELDSETS        |
//! |           PATHS SPECS VALUEREPS                  |
//! | TOC: count + (16-byte name, offset, length)      |
//! | footer: TOC offset (u64), version, 5 reserved    |
//! +--------------------------------------------------+
//! ```
//!
//! ## Value representations
//!
//! A value rep is 64 bits:
//!
//! ```text
//! bits  0..48   payload: an inline value, or a byte offset into the
//!               VALUEREPS section
//! bits 48..56   type enum
//! bit  56       array-valued
//! bit  57       inline (payload is the value itself)
//! bit  58       compressed (payload bytes are deflate-compressed)
//! ```
//!
//! Non-inline payloads in the VALUEREPS section are length-prefixed
//! (u64), so reps of unknown types can be carried through a rewrite
//! byte-for-byte.

use std::fmt;

/// File magic, first eight bytes.
pub const MAGIC: [u8; 8] = *b"STRATACR";

/// Size of the fixed header and of the footer.
pub const HEADER_SIZE: usize = 16;
pub const FOOTER_SIZE: usize = 16;

/// Section names, NUL-padded to 16 bytes in the TOC.
pub const SECTION_TOKENS: &str = "TOKENS";
pub const SECTION_STRINGS: &str = "STRINGS";
pub const SECTION_FIELDS: &str = "FIELDS";
pub const SECTION_FIELDSETS: &str = "FIELDSETS";
pub const SECTION_PATHS: &str = "PATHS";
pub const SECTION_SPECS: &str = "SPECS";
pub const SECTION_VALUEREPS: &str = "VALUEREPS";

/// Sentinel field index terminating each run in FIELDSETS.
pub const FIELD_INDEX_SENTINEL: u32 = u32::MAX;

/// Sentinel parent index for root path records.
pub const PATH_INDEX_NONE: u32 = u32::MAX;

/// Payloads at least this large are deflate-compressed.
pub const COMPRESS_THRESHOLD: usize = 256;

// =============================================================================
// Version
// =============================================================================

/// A (major, minor, patch) file version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Version {
        Version {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Default version written when no newer feature is required.
pub const VERSION_BASE: Version = Version::new(1, 0, 0);

/// First version supporting payload list-ops that cannot collapse to
/// the compact single-payload form.
pub const VERSION_PAYLOAD_LIST_OP: Version = Version::new(1, 1, 0);

/// Newest version this reader understands.
pub const VERSION_READER_MAX: Version = Version::new(1, 1, 0);

/// Files below this version may still contain relationship-target and
/// connection specs; they are elided on import.
pub const VERSION_TARGET_SPECS_ELIDED: Version = Version::new(1, 0, 0);

/// Whether a file version is readable: a known major, and within our
/// own major nothing newer than we are.
pub fn version_supported(v: Version) -> bool {
    match v.major {
        0 => true,
        1 => v <= VERSION_READER_MAX,
        _ => false,
    }
}

// =============================================================================
// Type enum
// =============================================================================

/// On-disk value types. The array flag combines with the scalar types
/// to form array reps.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeEnum {
    Invalid = 0,
    Bool = 1,
    Int = 2,
    UInt = 3,
    Int64 = 4,
    UInt64 = 5,
    Float = 6,
    Double = 7,
    String = 8,
    Token = 9,
    Path = 10,
    PathListOp = 11,
    Payload = 12,
    PayloadListOp = 13,
    TokenListOp = 14,
    Dictionary = 15,
    TimeSamples = 16,
    LayerOffset = 17,
}

impl TypeEnum {
    pub fn from_u8(v: u8) -> Option<TypeEnum> {
        Some(match v {
            1 => TypeEnum::Bool,
            2 => TypeEnum::Int,
            3 => TypeEnum::UInt,
            4 => TypeEnum::Int64,
            5 => TypeEnum::UInt64,
            6 => TypeEnum::Float,
            7 => TypeEnum::Double,
            8 => TypeEnum::String,
            9 => TypeEnum::Token,
            10 => TypeEnum::Path,
            11 => TypeEnum::PathListOp,
            12 => TypeEnum::Payload,
            13 => TypeEnum::PayloadListOp,
            14 => TypeEnum::TokenListOp,
            15 => TypeEnum::Dictionary,
            16 => TypeEnum::TimeSamples,
            17 => TypeEnum::LayerOffset,
            _ => return None,
        })
    }
}

// =============================================================================
// ValueRep
// =============================================================================

const PAYLOAD_MASK: u64 = (1 << 48) - 1;
const TYPE_SHIFT: u32 = 48;
const TYPE_MASK: u64 = 0xFF << TYPE_SHIFT;
const ARRAY_BIT: u64 = 1 << 56;
const INLINE_BIT: u64 = 1 << 57;
const COMPRESSED_BIT: u64 = 1 << 58;

/// The packed 64-bit on-disk form of a value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueRep(pub u64);

impl ValueRep {
    pub fn inline(ty: TypeEnum, payload: u64) -> ValueRep {
        debug_assert!(payload <= PAYLOAD_MASK);
        ValueRep(((ty as u64) << TYPE_SHIFT) | INLINE_BIT | (payload & PAYLOAD_MASK))
    }

    pub fn outlined(ty: TypeEnum, offset: u64, array: bool, compressed: bool) -> ValueRep {
        debug_assert!(offset <= PAYLOAD_MASK);
        let mut bits = ((ty as u64) << TYPE_SHIFT) | (offset & PAYLOAD_MASK);
        if array {
            bits |= ARRAY_BIT;
        }
        if compressed {
            bits |= COMPRESSED_BIT;
        }
        ValueRep(bits)
    }

    #[inline]
    pub fn type_byte(self) -> u8 {
        ((self.0 & TYPE_MASK) >> TYPE_SHIFT) as u8
    }

    #[inline]
    pub fn type_enum(self) -> Option<TypeEnum> {
        TypeEnum::from_u8(self.type_byte())
    }

    #[inline]
    pub fn payload(self) -> u64 {
        self.0 & PAYLOAD_MASK
    }

    #[inline]
    pub fn is_inline(self) -> bool {
        self.0 & INLINE_BIT != 0
    }

    #[inline]
    pub fn is_array(self) -> bool {
        self.0 & ARRAY_BIT != 0
    }

    #[inline]
    pub fn is_compressed(self) -> bool {
        self.0 & COMPRESSED_BIT != 0
    }

    /// The same rep relocated to a new payload offset.
    pub fn with_offset(self, offset: u64) -> ValueRep {
        debug_assert!(!self.is_inline());
        ValueRep((self.0 & !PAYLOAD_MASK) | (offset & PAYLOAD_MASK))
    }
}

impl fmt::Debug for ValueRep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ValueRep(type={}, payload={:#x}{}{}{})",
            self.type_byte(),
            self.payload(),
            if self.is_inline() { ", inline" } else { "" },
            if self.is_array() { ", array" } else { "" },
            if self.is_compressed() { ", compressed" } else { "" },
        )
    }
}

/// Pad a section name to its fixed 16-byte on-disk form.
pub fn section_name_bytes(name: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..name.len()].copy_from_slice(name.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering_and_support() {
        assert!(Version::new(0, 9, 0) < VERSION_BASE);
        assert!(VERSION_BASE < VERSION_PAYLOAD_LIST_OP);
        assert!(version_supported(Version::new(0, 8, 0)));
        assert!(version_supported(VERSION_BASE));
        assert!(version_supported(VERSION_PAYLOAD_LIST_OP));
        assert!(!version_supported(Version::new(1, 2, 0)));
        assert!(!version_supported(Version::new(2, 0, 0)));
    }

    #[test]
    fn test_inline_rep_round_trip() {
        let rep = ValueRep::inline(TypeEnum::Int, 0x1234);
        assert!(rep.is_inline());
        assert!(!rep.is_array());
        assert_eq!(rep.type_enum(), Some(TypeEnum::Int));
        assert_eq!(rep.payload(), 0x1234);
    }

    #[test]
    fn test_outlined_rep_flags() {
        let rep = ValueRep::outlined(TypeEnum::Double, 0xABCD, true, true);
        assert!(!rep.is_inline());
        assert!(rep.is_array());
        assert!(rep.is_compressed());
        assert_eq!(rep.payload(), 0xABCD);
        let moved = rep.with_offset(0x42);
        assert_eq!(moved.payload(), 0x42);
        assert_eq!(moved.type_enum(), Some(TypeEnum::Double));
        assert!(moved.is_array());
    }

    #[test]
    fn test_unknown_type_is_none() {
        assert_eq!(TypeEnum::from_u8(200), None);
        let rep = ValueRep(200u64 << 48);
        assert_eq!(rep.type_enum(), None);
        assert_eq!(rep.type_byte(), 200);
    }

    #[test]
    fn test_section_name_padding() {
        let b = section_name_bytes(SECTION_TOKENS);
        assert_eq!(&b[..6], b"TOKENS");
        assert!(b[6..].iter().all(|&x| x == 0));
    }
}
