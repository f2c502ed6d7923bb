// Keyswap Persistence and Concurrency Tests
//
// Rule blobs on disk, restart behavior, and the filter callback racing
// against rule mutations and layout rebuilds from the main context.
//
// Run with: cargo test -p keyswap-core --test persistence_and_concurrency

use std::sync::Arc;
use std::thread;

use keyswap_core::headless::{self, HeadlessTapBackend, StaticLayout, StaticTrust};
use keyswap_core::rules::{decode_rules, encode_rules, REMAP_ENABLED_KEY, RULES_KEY};
use keyswap_core::{
    Collaborators, Disposition, FileStore, KeyCode, KeyRemapper, KeySwapRule, KeyValueStore,
    KeyboardType, MemoryStore, SyntheticEvent,
};
use pretty_assertions::assert_eq;

// =========================================================================
// Test Helpers
// =========================================================================

fn file_remapper(dir: &std::path::Path) -> (KeyRemapper, HeadlessTapBackend) {
    let backend = HeadlessTapBackend::new();
    let remapper = KeyRemapper::new(Collaborators {
        layout_source: Arc::new(StaticLayout::us_ansi()),
        notifier: None,
        tap_backend: Box::new(backend.clone()),
        trust: Box::new(StaticTrust::granted()),
        storage: Arc::new(FileStore::new(dir)),
    });
    (remapper, backend)
}

// =========================================================================
// Persistence
// =========================================================================

#[test]
fn test_three_rule_round_trip() {
    let rules = vec![
        KeySwapRule::new('a', 'b', None),
        KeySwapRule::new('y', 'z', Some(KeyboardType(5))),
        KeySwapRule::new('1', '2', None).with_enabled(false),
    ];

    let bytes = encode_rules(&rules).unwrap();
    let decoded = decode_rules(&bytes).unwrap();
    assert_eq!(decoded, rules);
}

#[test]
fn test_blob_field_names() {
    let rule = KeySwapRule::new('b', 'a', Some(KeyboardType(40)));
    let bytes = encode_rules(std::slice::from_ref(&rule)).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    let entry = &value[0];
    assert_eq!(entry["id"], serde_json::json!(rule.id.to_string()));
    assert_eq!(entry["keyboardType"], serde_json::json!(40));
    assert_eq!(entry["firstKey"], serde_json::json!("a"));
    assert_eq!(entry["secondKey"], serde_json::json!("b"));
    assert_eq!(entry["isEnabled"], serde_json::json!(true));

    let unscoped = encode_rules(&[KeySwapRule::new('a', 'b', None)]).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&unscoped).unwrap();
    assert!(value[0].get("keyboardType").is_none());
}

#[test]
fn test_rules_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let added = {
        let (remapper, _) = file_remapper(dir.path());
        assert!(remapper.add_rule("q", "w", None));
        assert!(remapper.add_rule("1", "2", Some(KeyboardType(58))));
        let id = remapper.rules()[0].id;
        remapper.set_rule_enabled(id, false);
        remapper.set_remap_enabled(true);
        remapper.rules()
    };

    let (restored, backend) = file_remapper(dir.path());
    assert_eq!(restored.rules(), added);
    assert!(restored.is_remap_enabled());
    assert!(backend.is_installed());
}

#[test]
fn test_corrupt_blob_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    FileStore::new(dir.path()).set(RULES_KEY, b"{not json").unwrap();

    let (remapper, backend) = file_remapper(dir.path());
    assert!(remapper.rules().is_empty());
    assert!(!backend.is_installed());

    // The store is usable and overwrites the corrupt blob
    assert!(remapper.add_rule("a", "s", None));
    let (reloaded, _) = file_remapper(dir.path());
    assert_eq!(reloaded.rules().len(), 1);
}

#[test]
fn test_malformed_entries_dropped() {
    let storage = Arc::new(MemoryStore::new());
    let good = KeySwapRule::new('a', 's', None);
    let blob = format!(
        r#"[
            {{"id":"{}","firstKey":"a","secondKey":"s","isEnabled":true}},
            {{"id":"{}","firstKey":"x","secondKey":"x","isEnabled":true}},
            {{"id":"{}","firstKey":"!","secondKey":"d","isEnabled":true}}
        ]"#,
        good.id,
        keyswap_core::RuleId::new(),
        keyswap_core::RuleId::new()
    );
    storage.set(RULES_KEY, blob.as_bytes()).unwrap();

    let remapper = KeyRemapper::new(headless::collaborators(storage));
    assert_eq!(remapper.rules(), vec![good]);
}

#[test]
fn test_denied_restart_clears_persisted_flag() {
    let storage = Arc::new(MemoryStore::new());
    storage.set_bool(REMAP_ENABLED_KEY, true).unwrap();

    let remapper = KeyRemapper::new(Collaborators {
        layout_source: Arc::new(StaticLayout::us_ansi()),
        notifier: None,
        tap_backend: Box::new(HeadlessTapBackend::new()),
        trust: Box::new(StaticTrust::denied()),
        storage: storage.clone(),
    });
    assert!(!remapper.is_remap_enabled());
    assert!(!storage.get_bool(REMAP_ENABLED_KEY, true));
}

// =========================================================================
// Concurrency
// =========================================================================

#[test]
fn test_handle_races_rule_mutations() {
    let backend = HeadlessTapBackend::new();
    let remapper = KeyRemapper::new(Collaborators {
        layout_source: Arc::new(StaticLayout::us_ansi()),
        notifier: None,
        tap_backend: Box::new(backend.clone()),
        trust: Box::new(StaticTrust::granted()),
        storage: Arc::new(MemoryStore::new()),
    });
    // Anchor rule so the tap stays installed while others come and go
    assert!(remapper.add_rule("q", "w", None));
    assert!(remapper.set_remap_enabled(true));

    let layout = remapper.layout();
    let codes: Vec<u16> = layout.entries().iter().map(|(code, _)| code.code()).collect();
    let churn = ["as", "df", "gh", "jk", "zx", "cv", "bn", "12", "34", "56"];

    thread::scope(|scope| {
        let callback = scope.spawn(|| {
            let mut remapped = 0usize;
            for i in 0..10_000usize {
                let code = codes[i % codes.len()];
                let mut event = if i % 2 == 0 {
                    SyntheticEvent::key_down(code, 40 + (i % 3) as i64)
                } else {
                    SyntheticEvent::key_up(code, 40 + (i % 3) as i64)
                };
                match backend.deliver(&mut event) {
                    Some(Disposition::Remapped { from, to }) => {
                        assert_eq!(from, KeyCode(code));
                        assert_eq!(event.key_code, to);
                        assert!(layout.character(to).is_some());
                        remapped += 1;
                    }
                    Some(Disposition::PassThrough) => assert_eq!(event.key_code, KeyCode(code)),
                    other => panic!("unexpected disposition {:?}", other),
                }
            }
            remapped
        });

        for i in 0..100usize {
            let pair = churn[i % churn.len()];
            if i % 2 == 0 {
                remapper.add_rule_pair(pair, None);
            } else if let Some(rule) = remapper.rules().into_iter().find(|r| r.first_key != 'q') {
                remapper.remove_rule(rule.id);
            }
            if i % 10 == 0 {
                remapper.process_pending();
            }
        }

        let remapped = callback.join().unwrap();
        // q and w alone account for a share of every pass over the codes
        assert!(remapped > 0);
    });

    assert!(backend.is_installed());
    remapper.process_pending();
    assert_eq!(
        remapper.seen_keyboard_types(),
        vec![KeyboardType(40), KeyboardType(41), KeyboardType(42)]
    );
}

#[test]
fn test_handle_races_layout_rebuilds() {
    let layout_source = Arc::new(StaticLayout::from_pairs(&[(0, "a"), (1, "b")]));
    let backend = HeadlessTapBackend::new();
    let remapper = KeyRemapper::new(Collaborators {
        layout_source: layout_source.clone(),
        notifier: None,
        tap_backend: Box::new(backend.clone()),
        trust: Box::new(StaticTrust::granted()),
        storage: Arc::new(MemoryStore::new()),
    });
    assert!(remapper.add_rule("a", "b", None));
    assert!(remapper.set_remap_enabled(true));

    // Each generation maps codes 0 and 1 to a and b in some order, so a
    // consistent table always swaps the two codes and never drops one
    thread::scope(|scope| {
        let callback = scope.spawn(|| {
            for i in 0..10_000u16 {
                let code = i % 3;
                let mut event = SyntheticEvent::key_down(code, 40);
                let disposition = backend.deliver(&mut event);
                if code == 2 {
                    assert_eq!(disposition, Some(Disposition::PassThrough));
                    assert_eq!(event.key_code, KeyCode(2));
                } else {
                    let other = KeyCode(1 - code);
                    assert_eq!(
                        disposition,
                        Some(Disposition::Remapped { from: KeyCode(code), to: other })
                    );
                    assert_eq!(event.key_code, other);
                }
            }
        });

        for i in 0..100usize {
            if i % 2 == 0 {
                layout_source.replace(&[(0, "b"), (1, "a")]);
            } else {
                layout_source.replace(&[(0, "a"), (1, "b")]);
            }
            assert!(remapper.rebuild_layout());
        }

        callback.join().unwrap();
    });

    assert!(remapper.layout().generation() > 100);
    assert!(backend.is_installed());
}
