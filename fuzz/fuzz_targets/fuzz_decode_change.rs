#![no_main]
use libfuzzer_sys::fuzz_target;

use shield_groups::wire::{Group, GroupChange, GroupChangeActions};

/// Fuzz the wire decoders.
///
/// Arbitrary bytes must never panic, and anything that decodes must
/// re-encode and decode to the same value.
fuzz_target!(|data: &[u8]| {
    if let Ok(actions) = GroupChangeActions::decode(data) {
        if let Ok(bytes) = actions.encode() {
            let again = GroupChangeActions::decode(&bytes).expect("re-decode actions");
            assert_eq!(again, actions);
        }
    }

    if let Ok(change) = GroupChange::decode(data) {
        // Nested actions are decoded lazily and may be garbage
        let _ = change.decode_actions();
    }

    let _ = Group::decode(data);
});
