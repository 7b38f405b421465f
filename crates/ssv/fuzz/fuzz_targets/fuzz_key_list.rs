//! Fuzz target for key-list parsing.
//!
//! Feeds arbitrary bytes as the provider's key-list document. Parsing must
//! either produce a non-empty key set with unique ids or fail with
//! `SsvError`.

#![no_main]

use libfuzzer_sys::fuzz_target;

use reward_ssv::{KeyStore, parse_key_set};

fuzz_target!(|data: &[u8]| {
    let Ok(keys) = parse_key_set(data) else {
        return;
    };
    assert!(!keys.is_empty());

    let store = KeyStore::new();
    store.replace(keys);
    for key in store.snapshot().iter() {
        assert!(store.lookup(key.key_id()).is_some());
    }
});
