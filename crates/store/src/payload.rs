//! Payload Records
//!
//! A payload names an asset to compose behind a prim, deferring its
//! load. The public form of the `payload` field is a payload list-op;
//! on disk, an explicit list of zero or one payloads is collapsed to a
//! single compact record for compatibility with older files, and
//! lifted back to a list-op on read.
//!
//! A payload with an empty asset path historically meant "payload
//! explicitly none"; the conversions preserve that meaning (empty
//! payload record <-> explicitly empty list-op).

use strata_core::{LayerOffset, ListOp, Value, ValueItem};
use strata_path::Path;

/// A list-op over payload records.
pub type PayloadListOp = ListOp<Payload>;

/// A reference to composed asset content: asset path, root prim within
/// the asset, and a time offset.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Payload {
    asset_path: String,
    prim_path: Path,
    layer_offset: LayerOffset,
}

impl Payload {
    pub fn new(
        asset_path: impl Into<String>,
        prim_path: Path,
        layer_offset: LayerOffset,
    ) -> Payload {
        Payload {
            asset_path: asset_path.into(),
            prim_path,
            layer_offset,
        }
    }

    pub fn asset_path(&self) -> &str {
        &self.asset_path
    }

    pub fn prim_path(&self) -> &Path {
        &self.prim_path
    }

    pub fn layer_offset(&self) -> LayerOffset {
        self.layer_offset
    }
}

impl ValueItem for Payload {}

/// Lift a stored payload value to its public list-op form. A single
/// payload record becomes an explicit list-op: the empty record maps
/// to the explicitly empty list, anything else to an explicit
/// singleton. Other values pass through untouched.
pub(crate) fn to_payload_list_op_value(value: Value) -> Value {
    if let Some(payload) = value.get::<Payload>() {
        let mut op = PayloadListOp::new();
        if payload.asset_path().is_empty() {
            op.clear_and_make_explicit();
        } else {
            op.set_explicit_items(vec![payload.clone()]);
        }
        return Value::new(op);
    }
    value
}

/// Collapse a payload list-op to the compact single-record form when
/// its semantics allow: an explicit empty list becomes the empty
/// record, an explicit singleton (with a non-empty asset path) becomes
/// that record. Everything else passes through untouched and will
/// require a list-op-aware file version.
pub(crate) fn from_payload_list_op_value(value: Value) -> Value {
    if let Some(op) = value.get::<PayloadListOp>() {
        if op.is_explicit() {
            match op.explicit_items() {
                [] => return Value::new(Payload::default()),
                [single] if !single.asset_path().is_empty() => {
                    return Value::new(single.clone());
                }
                _ => {}
            }
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(asset: &str, prim: &str) -> Payload {
        Payload::new(
            asset,
            if prim.is_empty() {
                Path::empty()
            } else {
                Path::parse(prim).unwrap()
            },
            LayerOffset::identity(),
        )
    }

    #[test]
    fn test_single_payload_lifts_to_explicit_singleton() {
        let v = to_payload_list_op_value(Value::new(payload("asset.strata", "/B")));
        let op = v.get::<PayloadListOp>().unwrap();
        assert!(op.is_explicit());
        assert_eq!(op.explicit_items(), &[payload("asset.strata", "/B")]);
    }

    #[test]
    fn test_empty_payload_lifts_to_explicit_empty() {
        let v = to_payload_list_op_value(Value::new(Payload::default()));
        let op = v.get::<PayloadListOp>().unwrap();
        assert!(op.is_explicit());
        assert!(op.explicit_items().is_empty());
    }

    #[test]
    fn test_collapse_round_trip() {
        for original in [
            Value::new(payload("asset.strata", "/B")),
            Value::new(Payload::default()),
        ] {
            let lifted = to_payload_list_op_value(original.clone());
            let collapsed = from_payload_list_op_value(lifted);
            assert_eq!(collapsed, original);
        }
    }

    #[test]
    fn test_non_collapsible_list_op_passes_through() {
        let mut op = PayloadListOp::new();
        op.set_explicit_items(vec![payload("a.strata", "/A"), payload("b.strata", "/B")]);
        let v = Value::new(op.clone());
        let out = from_payload_list_op_value(v);
        assert_eq!(out.get::<PayloadListOp>().unwrap(), &op);

        let mut appended = PayloadListOp::new();
        appended.set_appended_items(vec![payload("c.strata", "/C")]);
        let v = Value::new(appended.clone());
        let out = from_payload_list_op_value(v);
        assert_eq!(out.get::<PayloadListOp>().unwrap(), &appended);
    }

    #[test]
    fn test_other_values_untouched() {
        let v = Value::new(5i64);
        assert_eq!(from_payload_list_op_value(v.clone()), v);
        assert_eq!(to_payload_list_op_value(v.clone()), v);
    }
}
