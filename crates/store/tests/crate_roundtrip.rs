//! End-to-end crate file tests: build a store, write it, read it
//! back, and check contents, laziness, versioning, and failure modes.

use serial_test::serial;
use strata_core::{Array, Dictionary, LayerOffset, Token, Value};
use strata_path::Path;
use strata_store::spec_type::fields;
use strata_store::{
    CrateError, PathListOp, Payload, PayloadListOp, SpecStore, SpecType, TimeSampleMap,
};

fn p(s: &str) -> Path {
    Path::parse(s).unwrap()
}

// A store exercising every value category the format carries.
fn build_test_store() -> SpecStore {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let mut store = SpecStore::new();
    store.create_spec(&Path::absolute_root_path(), SpecType::PseudoRoot);

    store.create_spec(&p("/World"), SpecType::Prim);
    store.set(&p("/World"), Token::new("documentation"), Value::new(String::from("root prim")));

    let mut custom = Dictionary::new();
    custom.insert("nested", {
        let mut inner = Dictionary::new();
        inner.insert("depth", Value::new(2i64));
        Value::new(inner)
    });
    custom.insert("flag", Value::new(true));
    store.set(&p("/World"), Token::new("customData"), Value::new(custom));

    store.create_spec(&p("/World/Char"), SpecType::Prim);
    store.set(
        &p("/World/Char"),
        Token::new("kind"),
        Value::new(Token::new("component")),
    );
    store.set(
        &p("/World/Char"),
        Token::new("proxy"),
        Value::new(p("/World/Proxy")),
    );

    let radius = p("/World/Char.radius");
    store.create_spec(&radius, SpecType::Attribute);
    store.set(&radius, fields::default_value(), Value::new(1.5f64));
    store.set(
        &radius,
        Token::new("typeName"),
        Value::new(Token::new("double")),
    );
    store.set_time_sample(&radius, 0.0, Value::new(1.0f64));
    store.set_time_sample(&radius, 1.0, Value::new(2.0f64));

    let points = p("/World/Char.points");
    store.create_spec(&points, SpecType::Attribute);
    store.set(
        &points,
        fields::default_value(),
        Value::new(Array::from_vec((0..1000).map(|i| i as f64 * 0.5).collect())),
    );

    let rel = p("/World/Char.material");
    store.create_spec(&rel, SpecType::Relationship);
    let mut targets = PathListOp::new();
    targets.set_explicit_items(vec![p("/World/Materials/Steel")]);
    store.set(&rel, fields::target_paths(), Value::new(targets));

    store
}

#[test]
fn test_export_and_reopen_preserves_content() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("scene.strata");

    let store = build_test_store();
    store.export(&file).unwrap();

    for detached in [false, true] {
        let loaded = SpecStore::open(&file, detached).unwrap();
        assert_eq!(loaded.streams_data(), !detached);
        assert_eq!(loaded.len(), store.len());

        assert_eq!(
            loaded
                .get(&p("/World"), Token::new("documentation"))
                .get::<String>()
                .unwrap(),
            "root prim"
        );
        assert_eq!(
            loaded.get(&p("/World/Char"), Token::new("kind")).get::<Token>(),
            Some(&Token::new("component"))
        );
        assert_eq!(
            loaded.get(&p("/World/Char"), Token::new("proxy")).get::<Path>(),
            Some(&p("/World/Proxy"))
        );

        let dict = loaded.get(&p("/World"), Token::new("customData"));
        let dict = dict.get::<Dictionary>().unwrap();
        assert_eq!(
            dict.get_value_at_path("nested:depth").unwrap().get::<i64>(),
            Some(&2)
        );

        let radius = p("/World/Char.radius");
        assert_eq!(loaded.spec_type(&radius), SpecType::Attribute);
        assert_eq!(
            loaded.get(&radius, fields::default_value()).get::<f64>(),
            Some(&1.5)
        );

        let points = loaded.get(&p("/World/Char.points"), fields::default_value());
        let arr = points.get::<Array<f64>>().unwrap();
        assert_eq!(arr.len(), 1000);
        assert_eq!(arr[2], 1.0);
    }
}

#[test]
fn test_time_samples_survive_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("samples.strata");
    build_test_store().export(&file).unwrap();

    let loaded = SpecStore::open(&file, false).unwrap();
    let radius = p("/World/Char.radius");
    assert_eq!(loaded.list_time_samples_for_path(&radius), vec![0.0, 1.0]);
    assert_eq!(
        loaded.query_time_sample(&radius, 1.0).unwrap().get::<f64>(),
        Some(&2.0)
    );
    assert!(loaded.query_time_sample(&radius, 0.5).is_none());

    let map = loaded.get(&radius, fields::time_samples());
    let map = map.get::<TimeSampleMap>().unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map.get(0.0).unwrap().get::<f64>(), Some(&1.0));
}

#[test]
fn test_target_specs_synthesized_after_reload() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("targets.strata");
    build_test_store().export(&file).unwrap();

    let loaded = SpecStore::open(&file, true).unwrap();
    let target = p("/World/Char.material[/World/Materials/Steel]");
    assert!(loaded.has_spec(&target));
    assert_eq!(loaded.spec_type(&target), SpecType::RelationshipTarget);

    let mut synthesized = 0;
    loaded.visit_specs(|path, ty| {
        if ty == SpecType::RelationshipTarget {
            assert_eq!(path, &target);
            synthesized += 1;
        }
        true
    });
    assert_eq!(synthesized, 1);
}

#[test]
fn test_write_read_write_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.strata");
    let second = dir.path().join("second.strata");
    let third = dir.path().join("third.strata");

    build_test_store().export(&first).unwrap();
    let loaded = SpecStore::open(&first, true).unwrap();
    loaded.export(&second).unwrap();
    let reloaded = SpecStore::open(&second, true).unwrap();
    reloaded.export(&third).unwrap();

    // An identity edit round-trips byte-for-byte once table layout has
    // settled through one rewrite.
    let b2 = std::fs::read(&second).unwrap();
    let b3 = std::fs::read(&third).unwrap();
    assert_eq!(b2, b3);
}

#[test]
fn test_save_repopulates_and_keeps_working() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("live.strata");

    let mut store = build_test_store();
    store.export(&file).unwrap();
    let mut store = SpecStore::open(&file, false).unwrap();

    store.create_spec(&p("/World/Extra"), SpecType::Prim);
    store.set(&p("/World/Extra"), Token::new("n"), Value::new(9i64));
    store.save().unwrap();

    assert!(store.has_spec(&p("/World/Extra")));
    assert_eq!(
        store.get(&p("/World/Extra"), Token::new("n")).get::<i64>(),
        Some(&9)
    );
    // And so does a fresh reader.
    let check = SpecStore::open(&file, true).unwrap();
    assert_eq!(check.get(&p("/World/Extra"), Token::new("n")).get::<i64>(), Some(&9));
}

#[test]
fn test_payload_compacts_to_base_version() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("payload.strata");

    let mut store = SpecStore::new();
    store.create_spec(&p("/A"), SpecType::Prim);
    let mut op = PayloadListOp::new();
    op.set_explicit_items(vec![Payload::new(
        "asset.strata",
        p("/B"),
        LayerOffset::identity(),
    )]);
    store.set(&p("/A"), fields::payload(), Value::new(op.clone()));
    store.export(&file).unwrap();

    // Collapsible payload stays at the base version.
    let bytes = std::fs::read(&file).unwrap();
    assert_eq!(&bytes[8..11], &[1, 0, 0]);

    // The reader lifts it back to the explicit singleton list-op.
    let loaded = SpecStore::open(&file, true).unwrap();
    let v = loaded.get(&p("/A"), fields::payload());
    assert_eq!(v.get::<PayloadListOp>().unwrap(), &op);
}

#[test]
fn test_payload_list_op_raises_file_version() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("payload2.strata");

    let mut store = SpecStore::new();
    store.create_spec(&p("/A"), SpecType::Prim);
    let mut op = PayloadListOp::new();
    op.set_appended_items(vec![Payload::new(
        "a.strata",
        p("/X"),
        LayerOffset::identity(),
    )]);
    store.set(&p("/A"), fields::payload(), Value::new(op.clone()));
    store.export(&file).unwrap();

    let bytes = std::fs::read(&file).unwrap();
    assert_eq!(&bytes[8..11], &[1, 1, 0]);

    let loaded = SpecStore::open(&file, true).unwrap();
    let v = loaded.get(&p("/A"), fields::payload());
    assert_eq!(v.get::<PayloadListOp>().unwrap(), &op);
}

#[test]
fn test_open_missing_file_is_io_error() {
    match SpecStore::open("/nonexistent/nowhere.strata", true) {
        Err(CrateError::Io(_)) => {}
        Err(other) => panic!("expected IO error, got {other}"),
        Ok(_) => panic!("expected IO error, got success"),
    }
}

#[test]
fn test_open_corrupt_file_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("corrupt.strata");
    build_test_store().export(&file).unwrap();

    // Truncate the file mid-section.
    let bytes = std::fs::read(&file).unwrap();
    std::fs::write(&file, &bytes[..bytes.len() / 2]).unwrap();
    assert!(matches!(
        SpecStore::open(&file, true),
        Err(CrateError::Corrupt(_))
    ));
}

#[test]
#[serial]
fn test_failed_save_leaves_target_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("precious.strata");
    build_test_store().export(&file).unwrap();
    let original = std::fs::read(&file).unwrap();

    // Make the directory unwritable so the temp-file write fails.
    // Root bypasses directory write-permission checks, so the failure
    // cannot be injected there; skip rather than assert a write error
    // that will not happen.
    #[cfg(unix)]
    {
        if unsafe { libc::geteuid() } == 0 {
            return;
        }
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o500)).unwrap();
        let store = build_test_store();
        assert!(matches!(store.export(&file), Err(CrateError::Io(_))));
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700)).unwrap();
    }

    assert_eq!(std::fs::read(&file).unwrap(), original);
}

#[test]
fn test_empty_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("empty.strata");
    SpecStore::new().export(&file).unwrap();
    let loaded = SpecStore::open(&file, true).unwrap();
    assert!(loaded.is_empty());
    assert!(!loaded.has_spec(&p("/Anything")));
    assert!(loaded.get(&p("/Anything"), Token::new("f")).is_empty());
}

#[test]
fn test_large_int_and_double_payloads() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("numbers.strata");

    let mut store = SpecStore::new();
    store.create_spec(&p("/N"), SpecType::Prim);
    store.set(&p("/N"), Token::new("big"), Value::new(i64::MAX));
    store.set(&p("/N"), Token::new("small"), Value::new(-7i64));
    store.set(&p("/N"), Token::new("pi"), Value::new(std::f64::consts::PI));
    store.set(&p("/N"), Token::new("half"), Value::new(0.5f64));
    store.set(&p("/N"), Token::new("neg"), Value::new(-123456789i64));
    store.export(&file).unwrap();

    let loaded = SpecStore::open(&file, true).unwrap();
    assert_eq!(loaded.get(&p("/N"), Token::new("big")).get::<i64>(), Some(&i64::MAX));
    assert_eq!(loaded.get(&p("/N"), Token::new("small")).get::<i64>(), Some(&-7));
    assert_eq!(
        loaded.get(&p("/N"), Token::new("pi")).get::<f64>(),
        Some(&std::f64::consts::PI)
    );
    assert_eq!(loaded.get(&p("/N"), Token::new("half")).get::<f64>(), Some(&0.5));
    assert_eq!(
        loaded.get(&p("/N"), Token::new("neg")).get::<i64>(),
        Some(&-123456789)
    );
}

#[test]
fn test_variant_selection_paths_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("variants.strata");

    let mut store = SpecStore::new();
    store.create_spec(&p("/Model"), SpecType::Prim);
    let vsel = p("/Model{lod=high}");
    store.create_spec(&vsel, SpecType::Variant);
    store.create_spec(&p("/Model{lod=high}Geo"), SpecType::Prim);
    store.export(&file).unwrap();

    let loaded = SpecStore::open(&file, true).unwrap();
    assert!(loaded.has_spec(&vsel));
    assert_eq!(loaded.spec_type(&vsel), SpecType::Variant);
    assert!(loaded.has_spec(&p("/Model{lod=high}Geo")));
}
