//! Property-based tests for ota-sync.
//!
//! # Properties Tested
//!
//! - Merge idempotence: re-adding a record never duplicates it
//! - Refresh non-regression: re-listing a record keeps its live state
//! - Ordering: newest build first, insertion order among equal timestamps
//! - Pruning: records missing from a manifest go offline but are kept
//! - Status machine closure: rejected transitions leave the record unchanged

#![cfg(test)]

use std::collections::HashSet;

use proptest::prelude::*;

use crate::config::CompatibilityConfig;
use crate::manifest::ManifestSnapshot;
use crate::model::{UpdateRecord, UpdateStatus};
use crate::registry::UpdateRegistry;

// =============================================================================
// Generators
// =============================================================================

/// Short ids drawn from a small alphabet so collisions actually happen.
fn arb_id() -> impl Strategy<Value = String> {
    "[a-f]{1,2}"
}

fn arb_record() -> impl Strategy<Value = UpdateRecord> {
    (arb_id(), 0i64..1_000, "[a-z0-9.]{1,8}").prop_map(|(id, ts, version)| {
        let mut record = UpdateRecord::new(id, ts);
        record.version = version;
        record.available_online = true;
        record
    })
}

fn arb_status() -> impl Strategy<Value = UpdateStatus> {
    prop::sample::select(UpdateStatus::ALL.to_vec())
}

/// A registry holding `id` after following a random walk of legal
/// transitions from AVAILABLE.
fn walked_registry(id: &str, steps: &[usize]) -> UpdateRegistry {
    let mut registry = UpdateRegistry::new();
    registry.add_update(UpdateRecord::new(id, 1));
    for step in steps {
        let current = registry.get_update(id).map(|r| r.status).unwrap_or_default();
        let legal: Vec<UpdateStatus> = UpdateStatus::ALL
            .iter()
            .copied()
            .filter(|next| current.can_transition_to(*next))
            .collect();
        if legal.is_empty() {
            break;
        }
        let next = legal[step % legal.len()];
        registry.set_status(id, next).unwrap();
    }
    registry
}

// =============================================================================
// Merge idempotence
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Adding the same record twice reports it as new only once and keeps a
    /// single entry.
    #[test]
    fn prop_add_update_idempotent(record in arb_record()) {
        let mut registry = UpdateRegistry::new();
        prop_assert!(registry.add_update(record.clone()));
        prop_assert!(!registry.add_update(record.clone()));
        prop_assert_eq!(registry.len(), 1);
    }

    /// However many records are merged, there is one entry per distinct id.
    #[test]
    fn prop_one_record_per_id(records in prop::collection::vec(arb_record(), 0..40)) {
        let mut registry = UpdateRegistry::new();
        let mut new_count = 0;
        for record in &records {
            if registry.add_update(record.clone()) {
                new_count += 1;
            }
        }

        let distinct: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        prop_assert_eq!(registry.len(), distinct.len());
        prop_assert_eq!(new_count, distinct.len());
    }
}

// =============================================================================
// Refresh non-regression
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Re-listing a record in a later manifest never changes its status or
    /// progress, whatever state it reached.
    #[test]
    fn prop_refresh_preserves_live_state(
        steps in prop::collection::vec(any::<usize>(), 0..12),
        progress in 0u8..=100,
        new_ts in 0i64..1_000,
    ) {
        let mut registry = walked_registry("u1", &steps);
        registry.set_download_progress("u1", progress);
        let before = registry.get_update("u1").cloned().unwrap();

        let mut relisted = UpdateRecord::new("u1", new_ts);
        relisted.available_online = true;
        prop_assert!(!registry.add_update(relisted));

        let after = registry.get_update("u1").unwrap();
        prop_assert_eq!(after.status, before.status);
        prop_assert_eq!(after.download_progress, before.download_progress);
        prop_assert_eq!(after.install_progress, before.install_progress);
        prop_assert_eq!(after.timestamp, new_ts);
    }

    /// Progress only moves while the record is in the matching status.
    #[test]
    fn prop_progress_follows_status(
        steps in prop::collection::vec(any::<usize>(), 0..12),
        percent in 1u8..=100,
    ) {
        let mut registry = walked_registry("u1", &steps);
        let status = registry.get_update("u1").unwrap().status;
        let downloaded = registry.set_download_progress("u1", percent);
        let installed = registry.set_install_progress("u1", percent);
        if downloaded {
            prop_assert_eq!(status, UpdateStatus::Downloading);
        }
        if installed {
            prop_assert_eq!(status, UpdateStatus::Installing);
        }
    }

    /// Progress never goes down within an attempt.
    #[test]
    fn prop_progress_monotonic(values in prop::collection::vec(any::<u8>(), 1..30)) {
        let mut registry = UpdateRegistry::new();
        registry.add_update(UpdateRecord::new("u1", 1));
        registry.set_status("u1", UpdateStatus::Starting).unwrap();
        registry.set_status("u1", UpdateStatus::Downloading).unwrap();

        let mut high = 0u8;
        for value in values {
            registry.set_download_progress("u1", value);
            if value <= 100 {
                high = high.max(value);
            }
            prop_assert_eq!(registry.get_update("u1").unwrap().download_progress, high);
        }
    }
}

// =============================================================================
// Ordering
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Snapshots are sorted by timestamp descending, equal timestamps in
    /// first-insertion order.
    #[test]
    fn prop_get_updates_ordered(records in prop::collection::vec(arb_record(), 0..40)) {
        let mut registry = UpdateRegistry::new();
        let mut first_seen: Vec<String> = Vec::new();
        for record in &records {
            if registry.add_update(record.clone()) {
                first_seen.push(record.id.clone());
            }
        }

        let updates = registry.get_updates();
        for pair in updates.windows(2) {
            prop_assert!(pair[0].timestamp >= pair[1].timestamp);
            if pair[0].timestamp == pair[1].timestamp {
                let a = first_seen.iter().position(|id| *id == pair[0].id);
                let b = first_seen.iter().position(|id| *id == pair[1].id);
                prop_assert!(a < b);
            }
        }
    }
}

// =============================================================================
// Pruning
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// After replacing the online set, exactly the listed ids are online and
    /// nothing was deleted.
    #[test]
    fn prop_prune_marks_without_deleting(
        records in prop::collection::vec(arb_record(), 1..30),
        keep in prop::collection::vec(arb_id(), 0..10),
    ) {
        let mut registry = UpdateRegistry::new();
        for record in records {
            registry.add_update(record);
        }
        let before = registry.len();

        registry.set_updates_available_online(&keep, true);

        prop_assert_eq!(registry.len(), before);
        let listed: HashSet<&str> = keep.iter().map(String::as_str).collect();
        for record in registry.get_updates() {
            prop_assert_eq!(record.available_online, listed.contains(record.id.as_str()));
        }
    }

    /// The compatibility filter never lets an old build through when
    /// downgrading is off.
    #[test]
    fn prop_compat_filter_drops_old_builds(
        entries in prop::collection::vec((arb_id(), 0i64..1_000), 0..20),
        installed in 0i64..1_000,
    ) {
        let response: Vec<serde_json::Value> = entries
            .iter()
            .map(|(id, ts)| serde_json::json!({
                "id": id,
                "filename": "rom.zip",
                "version": "1",
                "datetime": ts,
                "size": 1,
                "url": "https://example.com/rom.zip",
            }))
            .collect();
        let data = serde_json::json!({ "response": response }).to_string();
        let compat = CompatibilityConfig {
            installed_build_timestamp: Some(installed),
            ..Default::default()
        };

        let snapshot = ManifestSnapshot::parse(data.as_bytes(), &compat).unwrap();
        prop_assert!(snapshot.descriptors().iter().all(|d| d.datetime > installed));
    }
}

// =============================================================================
// Status machine closure
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Any requested status either follows an edge of the machine or is
    /// rejected with the record left as it was.
    #[test]
    fn prop_status_machine_closed(
        steps in prop::collection::vec(any::<usize>(), 0..12),
        requested in arb_status(),
    ) {
        let mut registry = walked_registry("u1", &steps);
        let before = registry.get_update("u1").cloned().unwrap();

        match registry.set_status("u1", requested) {
            Ok(Some(status)) => {
                prop_assert!(before.status.can_transition_to(requested));
                prop_assert_eq!(status, requested);
                prop_assert_eq!(registry.get_update("u1").unwrap().status, requested);
            }
            Ok(None) => prop_assert!(false, "record disappeared"),
            Err(_) => {
                prop_assert!(!before.status.can_transition_to(requested));
                prop_assert_eq!(registry.get_update("u1").unwrap(), &before);
            }
        }
    }

    /// Nothing ever transitions back to UNKNOWN.
    #[test]
    fn prop_unknown_is_never_reentered(from in arb_status()) {
        prop_assert!(!from.can_transition_to(UpdateStatus::Unknown));
    }
}
