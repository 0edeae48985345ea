// Element-level reconciliation of two element lists.
//
// Pure and deterministic: the winner for every id is picked by a total order
// (version, versionNonce, canonical JSON), so the merged content does not
// depend on which side is "local" and re-applying a merge changes nothing.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::types::Element;

/// Merge `remote` into `local`.
///
/// For an id present on both sides the higher-ranked element wins. Output
/// order is remote order first, then local-only elements in local order.
/// Elements without an `id` cannot be matched and are taken from `remote`.
pub fn reconcile_elements(local: &[Element], remote: &[Element]) -> Vec<Element> {
    let local_by_id: HashMap<&str, &Element> =
        local.iter().filter_map(|element| element.id().map(|id| (id, element))).collect();

    let mut emitted = HashSet::new();
    let mut merged = Vec::with_capacity(local.len().max(remote.len()));

    for remote_element in remote {
        let Some(id) = remote_element.id() else {
            merged.push(remote_element.clone());
            continue;
        };
        if !emitted.insert(id) {
            continue;
        }
        let winner = match local_by_id.get(id) {
            Some(local_element) if rank(local_element, remote_element) == Ordering::Greater => {
                *local_element
            }
            _ => remote_element,
        };
        merged.push(winner.clone());
    }

    for local_element in local {
        if let Some(id) = local_element.id() {
            if emitted.insert(id) {
                merged.push(local_element.clone());
            }
        }
    }

    merged
}

fn rank(left: &Element, right: &Element) -> Ordering {
    left.version()
        .cmp(&right.version())
        .then_with(|| left.version_nonce().cmp(&right.version_nonce()))
        .then_with(|| left.canonical_json().cmp(&right.canonical_json()))
}
