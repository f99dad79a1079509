//! Cross-thread interner behavior: identical logical paths built on
//! different threads must compare equal, hash equal, and print the
//! same canonical text.

use rand::{Rng, SeedableRng, rngs::StdRng};
use serial_test::serial;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strata_core::Token;
use strata_path::Path;

fn hash_of(p: &Path) -> u64 {
    let mut h = DefaultHasher::new();
    p.hash(&mut h);
    h.finish()
}

#[test]
fn test_find_or_create_agrees_across_threads() {
    let handles: Vec<_> = (0..8)
        .map(|_| {
            std::thread::spawn(|| {
                Path::absolute_root_path()
                    .append_child(Token::new("Shared"))
                    .append_child(Token::new("Prim"))
                    .append_property(Token::new("radius"))
            })
        })
        .collect();

    let paths: Vec<Path> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for path in &paths {
        assert_eq!(*path, paths[0]);
        assert_eq!(hash_of(path), hash_of(&paths[0]));
        assert_eq!(path.as_string(), "/Shared/Prim.radius");
    }
}

#[test]
#[serial]
fn test_concurrent_churn_converges() {
    // Threads race to create and drop overlapping path sets; every
    // build of the same string must produce an equal handle.
    let stop = Arc::new(AtomicBool::new(false));
    let names = ["churnA", "churnB", "churnC", "churnD"];

    let workers: Vec<_> = (0..4)
        .map(|seed| {
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut live: Vec<Path> = Vec::new();
                while !stop.load(Ordering::Relaxed) {
                    let a = names[rng.gen_range(0..names.len())];
                    let b = names[rng.gen_range(0..names.len())];
                    let path = Path::absolute_root_path()
                        .append_child(Token::new(a))
                        .append_child(Token::new(b))
                        .append_property(Token::new("attr"));
                    assert_eq!(path.as_string(), format!("/{a}/{b}.attr"));
                    live.push(path);
                    if live.len() > 32 {
                        live.clear();
                    }
                }
            })
        })
        .collect();

    std::thread::sleep(std::time::Duration::from_millis(200));
    stop.store(true, Ordering::Relaxed);
    for w in workers {
        w.join().unwrap();
    }

    // After the churn, a fresh build still equals a parsed build.
    let built = Path::absolute_root_path()
        .append_child(Token::new("churnA"))
        .append_child(Token::new("churnB"));
    assert_eq!(built, Path::parse("/churnA/churnB").unwrap());
}

#[test]
fn test_node_reuse_after_release() {
    // Create a uniquely named path, drop every reference, then build
    // it again; the rebuilt path must behave identically.
    let one = Path::parse("/EphemeralNode/Child.attr").unwrap();
    let text = one.as_string();
    drop(one);

    let two = Path::parse("/EphemeralNode/Child.attr").unwrap();
    assert_eq!(two.as_string(), text);
    assert_eq!(two.parent_path().as_string(), "/EphemeralNode/Child");
}

#[test]
fn test_property_parts_shared_under_concurrency() {
    let handles: Vec<_> = (0..4)
        .map(|i| {
            std::thread::spawn(move || {
                Path::parse(&format!("/Owner{i}.sharedProp")).unwrap()
            })
        })
        .collect();
    let paths: Vec<Path> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    // All carry the same interned property suffix node.
    for pair in paths.windows(2) {
        assert_ne!(pair[0], pair[1]);
        assert_eq!(pair[0].name_token(), pair[1].name_token());
    }
}

#[test]
fn test_embedded_target_paths_intern_consistently() {
    let handles: Vec<_> = (0..4)
        .map(|_| std::thread::spawn(|| Path::parse("/A.rel[/Deep/Target].x").unwrap()))
        .collect();
    let paths: Vec<Path> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for path in &paths {
        assert_eq!(*path, paths[0]);
        assert_eq!(path.target_path(), Path::parse("/Deep/Target").unwrap());
    }
}

#[test]
fn test_property_round_trip_properties() {
    let mut rng = StdRng::seed_from_u64(7);
    let segments = ["Alpha", "Beta", "Gamma", "Delta"];
    let props = ["x", "y", "render:visibility"];
    for _ in 0..200 {
        let depth = rng.gen_range(1..4);
        let mut s = String::from("/");
        for d in 0..depth {
            if d > 0 {
                s.push('/');
            }
            s.push_str(segments[rng.gen_range(0..segments.len())]);
        }
        if rng.gen_bool(0.5) {
            s.push('.');
            s.push_str(props[rng.gen_range(0..props.len())]);
        }
        let path = Path::parse(&s).unwrap();
        // Round trip and append/parent identities.
        assert_eq!(path.as_string(), s);
        let child = path.prim_path().append_child(Token::new("leaf"));
        assert_eq!(child.parent_path(), path.prim_path());
        assert_eq!(child.name(), "leaf");
        // replace_prefix identity.
        let prefix = path.get_prefixes().into_iter().next().unwrap();
        assert_eq!(path.replace_prefix(&prefix, &prefix, true), path);
    }
}
