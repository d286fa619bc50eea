//! Reactive fragmentation: keeping the received or unsent part of a bundle
//! as a fragment after a partial transfer, and reassembly of fragments
//! delivered locally.

use super::*;
use std::collections::HashMap;

struct Reassembly {
    fragments: bundle::BundleList,
    total_length: usize,
}

#[derive(Default)]
pub(crate) struct FragmentManager {
    reassembly: HashMap<(eid::EndpointId, bundle::CreationTimestamp), Reassembly>,
}

impl FragmentManager {
    /// Creates a fragment holding `length` bytes of `bundle`'s payload from `offset`.
    pub fn create_fragment(
        table: &bundle::BundleTable,
        bundle: &bundle::Bundle,
        offset: usize,
        length: usize,
    ) -> bundle::BundleRef {
        let base = bundle.fragment.map_or(0, |f| f.offset);
        let mut builder = bundle::BundleBuilder::from_bundle(bundle)
            .payload(bundle.payload.slice(offset..offset + length))
            .fragment(Some(bundle::FragmentInfo {
                offset: base + offset,
                total_length: bundle.orig_length(),
            }));

        // A fragment of a bundle we hold custody of must have custody accepted afresh
        if bundle.local_custody() {
            builder = builder.custodian(eid::EndpointId::null());
        }
        builder.build(table)
    }

    /// Turns a partially received bundle into a fragment of the received prefix.
    pub fn convert_to_fragment(
        table: &bundle::BundleTable,
        bundle: &bundle::Bundle,
        bytes_received: usize,
    ) -> Option<bundle::BundleRef> {
        if bytes_received == 0 || bytes_received >= bundle.payload_len() {
            return None;
        }
        Some(Self::create_fragment(table, bundle, 0, bytes_received))
    }

    /// Splits off the part of `bundle` that a partial transmission did not send.
    pub fn try_to_reactively_fragment(
        table: &bundle::BundleTable,
        bundle: &bundle::Bundle,
        bytes_sent: usize,
    ) -> Option<bundle::BundleRef> {
        let len = bundle.payload_len();
        if bytes_sent == 0 || bytes_sent >= len {
            return None;
        }
        Some(Self::create_fragment(table, bundle, bytes_sent, len - bytes_sent))
    }

    /// Adds a fragment to its reassembly set.
    ///
    /// Once the fragments cover the whole payload, returns the reassembled
    /// bundle and the fragments it was built from.
    pub fn process_for_reassembly(
        &mut self,
        table: &bundle::BundleTable,
        fragment: &bundle::BundleRef,
    ) -> Option<(bundle::BundleRef, Vec<bundle::BundleRef>)> {
        let info = fragment.fragment?;
        let key = (fragment.source.clone(), fragment.creation_ts);

        let state = self.reassembly.entry(key.clone()).or_insert_with(|| Reassembly {
            fragments: bundle::BundleList::new(
                format!("reassembly {},{}", key.0, key.1),
                bundle::ListKind::Reassembly,
            ),
            total_length: info.total_length,
        });
        state.fragments.push_back(fragment);

        let mut fragments = state.fragments.snapshot();
        fragments.sort_by_key(|f| f.fragment.map_or(0, |i| i.offset));

        let mut covered = 0;
        for f in &fragments {
            let offset = f.fragment.map_or(0, |i| i.offset);
            if offset > covered {
                debug!("Reassembly of {},{} waiting for bytes from {covered}", key.0, key.1);
                return None;
            }
            covered = covered.max(offset + f.payload_len());
        }
        if covered < state.total_length {
            return None;
        }

        let mut payload = bytes::BytesMut::with_capacity(state.total_length);
        for f in &fragments {
            let offset = f.fragment.map_or(0, |i| i.offset);
            let end = offset + f.payload_len();
            if end > payload.len() {
                payload.extend_from_slice(&f.payload[payload.len() - offset..]);
            }
        }
        payload.truncate(state.total_length);

        let reassembled = bundle::BundleBuilder::from_bundle(&fragments[0])
            .custodian(eid::EndpointId::null())
            .fragment(None)
            .payload(payload.freeze())
            .build(table);

        if let Some(state) = self.reassembly.remove(&key) {
            state.fragments.clear();
        }
        info!(
            "Reassembled bundle {} from {} fragments",
            reassembled.gbof_id(),
            fragments.len()
        );
        Some((reassembled, fragments))
    }

    /// Drops `fragment` from any reassembly in progress.
    pub fn remove_fragment(&mut self, fragment: &bundle::Bundle) {
        let key = (fragment.source.clone(), fragment.creation_ts);
        if let Some(state) = self.reassembly.get(&key)
            && state.fragments.erase(fragment)
            && state.fragments.is_empty()
        {
            self.reassembly.remove(&key);
        }
    }

    pub fn in_progress(&self) -> usize {
        self.reassembly.len()
    }
}
