//! Spec Types and Reserved Field Names
//!
//! Every spec carries a type tag describing what kind of scene object
//! it declares. Relationship-target and connection specs are never
//! stored; they are synthesized from their owning property's list-op
//! field, so their tags only ever appear in query results.

use once_cell::sync::Lazy;
use strata_core::Token;

/// The kind of object a spec declares. The numeric values are part of
/// the file format.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecType {
    Unknown = 0,
    PseudoRoot = 1,
    Prim = 2,
    PrimProperty = 3,
    Attribute = 4,
    Relationship = 5,
    RelationshipTarget = 6,
    Connection = 7,
    Variant = 8,
    VariantSet = 9,
    Mapper = 10,
    MapperArg = 11,
    Expression = 12,
}

impl SpecType {
    pub fn from_u32(v: u32) -> SpecType {
        match v {
            1 => SpecType::PseudoRoot,
            2 => SpecType::Prim,
            3 => SpecType::PrimProperty,
            4 => SpecType::Attribute,
            5 => SpecType::Relationship,
            6 => SpecType::RelationshipTarget,
            7 => SpecType::Connection,
            8 => SpecType::Variant,
            9 => SpecType::VariantSet,
            10 => SpecType::Mapper,
            11 => SpecType::MapperArg,
            12 => SpecType::Expression,
            _ => SpecType::Unknown,
        }
    }
}

/// Reserved field names with special storage behavior.
pub mod fields {
    use super::*;

    static TIME_SAMPLES: Lazy<Token> = Lazy::new(|| Token::new("timeSamples"));
    static TARGET_PATHS: Lazy<Token> = Lazy::new(|| Token::new("targetPaths"));
    static CONNECTION_PATHS: Lazy<Token> = Lazy::new(|| Token::new("connectionPaths"));
    static PAYLOAD: Lazy<Token> = Lazy::new(|| Token::new("payload"));
    static RELATIONSHIP_TARGET_CHILDREN: Lazy<Token> =
        Lazy::new(|| Token::new("relationshipTargetChildren"));
    static CONNECTION_CHILDREN: Lazy<Token> = Lazy::new(|| Token::new("connectionChildren"));
    static DEFAULT: Lazy<Token> = Lazy::new(|| Token::new("default"));

    /// The time-sample field; stored internally as sorted parallel
    /// vectors, exchanged publicly as an ordered map.
    pub fn time_samples() -> Token {
        *TIME_SAMPLES
    }

    /// A relationship's target list-op, the source of synthesized
    /// relationship-target specs.
    pub fn target_paths() -> Token {
        *TARGET_PATHS
    }

    /// An attribute's connection list-op, the source of synthesized
    /// connection specs.
    pub fn connection_paths() -> Token {
        *CONNECTION_PATHS
    }

    /// The payload field; exchanged as a list-op, stored compactly
    /// when the op is explicit with at most one payload.
    pub fn payload() -> Token {
        *PAYLOAD
    }

    /// Synthesized child list of a relationship; never stored.
    pub fn relationship_target_children() -> Token {
        *RELATIONSHIP_TARGET_CHILDREN
    }

    /// Synthesized child list of a connected attribute; never stored.
    pub fn connection_children() -> Token {
        *CONNECTION_CHILDREN
    }

    /// The default-value field.
    pub fn default_value() -> Token {
        *DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_type_round_trip() {
        for ty in [
            SpecType::Unknown,
            SpecType::PseudoRoot,
            SpecType::Prim,
            SpecType::Attribute,
            SpecType::Relationship,
            SpecType::RelationshipTarget,
            SpecType::Connection,
            SpecType::Expression,
        ] {
            assert_eq!(SpecType::from_u32(ty as u32), ty);
        }
        assert_eq!(SpecType::from_u32(999), SpecType::Unknown);
    }

    #[test]
    fn test_reserved_tokens_are_interned_once() {
        assert_eq!(fields::time_samples(), Token::new("timeSamples"));
        assert_eq!(fields::payload(), Token::new("payload"));
    }
}
