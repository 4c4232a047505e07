//! Property-based tests for process fingerprinting.
//!
//! The fingerprint is used as deduplication key and correlation id, so it
//! must be a pure function of process content.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;

use herald_core::{Action, Notify, Process, ProcessEvent, ProcessId, State};
use proptest::prelude::*;
use uuid::Uuid;

fn process_strategy() -> impl Strategy<Value = Process> {
    (
        any::<u128>(),
        "[a-z_]{1,20}",                                             // state key
        prop::collection::vec("[a-z]{1,10}", 0..5),                 // action keys
        prop::collection::btree_map("service:[a-z]{1,8}", "[ -~]{0,30}", 0..3), // instructions
        prop::collection::vec("[0-9a-f]{8}", 0..4),                 // event hashes
    )
        .prop_map(|(id, key, actions, instructions, hashes)| Process {
            id: ProcessId(Uuid::from_u128(id)),
            scenario: None,
            current: State {
                key,
                actions: actions.iter().map(|a| Action::new(a.clone(), ["service:test"])).collect(),
                instructions,
                notify: vec![Notify::new("test")],
            },
            events: hashes.into_iter().map(ProcessEvent::new).collect(),
        })
}

proptest! {
    /// Equal processes always produce equal fingerprints.
    #[test]
    fn fingerprint_is_deterministic(process in process_strategy()) {
        let copy: Process = serde_json::from_value(serde_json::to_value(&process).unwrap()).unwrap();
        prop_assert_eq!(process.fingerprint(), copy.fingerprint());
    }

    /// With an event log the fingerprint is the latest event hash.
    #[test]
    fn fingerprint_follows_event_log(process in process_strategy()) {
        match process.events.last() {
            Some(event) => prop_assert_eq!(process.fingerprint(), event.hash.clone()),
            None => {
                let fingerprint = process.fingerprint();
                prop_assert_eq!(fingerprint.len(), 64);
                prop_assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
            },
        }
    }

    /// Instructions ordering never influences the content hash.
    #[test]
    fn fingerprint_independent_of_insertion_order(
        entries in prop::collection::vec(("service:[a-z]{1,8}", "[a-z ]{0,20}"), 0..6),
    ) {
        let forward: BTreeMap<String, String> = entries.iter().cloned().collect();
        let backward: BTreeMap<String, String> = entries.iter().rev().cloned().collect();
        prop_assume!(forward == backward);

        let base = Process {
            id: ProcessId(Uuid::nil()),
            scenario: None,
            current: State { key: "s".to_string(), ..Default::default() },
            events: Vec::new(),
        };
        let mut a = base.clone();
        a.current.instructions = forward;
        let mut b = base;
        b.current.instructions = backward;

        prop_assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
