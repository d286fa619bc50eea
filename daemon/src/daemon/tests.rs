use super::*;
use admin::{CustodySignalReason, StatusFlag, StatusReason};
use bundle::{ForwardingAction, ForwardingState};
use link::{LinkState, LinkType};
use std::time::Duration;
use testing::{RecordingCla, RecordingRegistration};

const LOCAL: &str = "dtn://local.dtn";

fn core() -> (DaemonCore, event::EventReceiver) {
    let (events, rx) = event::channel();
    let config = config::Config {
        local_eid: LOCAL.into(),
        ..Default::default()
    };
    let storage = storage::bundle_mem::new(&storage::bundle_mem::Config::default());
    (DaemonCore::new(config, storage, events), rx)
}

/// Dispatches head events until there are none left, returning their names.
fn drain_head(core: &mut DaemonCore) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Some(mut event) = core.head.pop_front() {
        names.push(event.name());
        core.dispatch(&mut event);
    }
    names
}

fn next_event(rx: &event::EventReceiver, name: &str) -> Event {
    while let Some(event) = rx.try_recv() {
        if event.name() == name {
            return event;
        }
    }
    panic!("No {name} event was posted");
}

fn head_admin_records(core: &DaemonCore) -> Vec<admin::AdminRecord> {
    core.head
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::BundleReceived { bundle, .. } if bundle.is_admin => {
                admin::AdminRecord::decode(&bundle.payload).ok()
            }
            _ => None,
        })
        .collect()
}

fn with_cla(core: &DaemonCore) -> Arc<RecordingCla> {
    let cla = RecordingCla::new();
    core.clas
        .register(
            "test",
            cla.clone(),
            cla::Sink::new(core.events.clone(), core.bundles.clone()),
        )
        .expect("register CLA");
    cla
}

fn reported(expiration: u64, table: &bundle::BundleTable) -> bundle::BundleRef {
    bundle::BundleBuilder::new("dtn://src.dtn/app", "dtn://far.dtn/app")
        .replyto("dtn://src.dtn/reports")
        .receipts(bundle::ReceiptFlags {
            deletion: true,
            ..Default::default()
        })
        .expiration(expiration)
        .payload(&b"hello"[..])
        .build(table)
}

fn custody_bundle(table: &bundle::BundleTable) -> bundle::BundleRef {
    bundle::BundleBuilder::new("dtn://src.dtn/app", "dtn://far.dtn/app")
        .custodian("dtn://prev.dtn")
        .custody_requested(true)
        .payload(&b"precious"[..])
        .build(table)
}

#[tokio::test(start_paused = true)]
async fn explicit_delete_after_expiry_fired_reports_once() {
    let (mut core, rx) = core();
    let reports = RecordingRegistration::new(7, "dtn://src.dtn/reports", core.events.clone());
    core.registrations.add(reports.clone());

    let bundle = reported(10, &core.bundles);
    assert!(core.add_to_pending(&bundle, false));

    // The timer fires, but its event is still queued
    tokio::time::sleep(Duration::from_secs(11)).await;
    let mut expired = next_event(&rx, "BUNDLE_EXPIRED");

    assert!(core.delete_from_pending(&bundle, StatusReason::TransmissionCancelled));
    core.dispatch(&mut expired);
    assert!(expired.daemon_only);

    drain_head(&mut core);
    let deleted = reports.status_reports(StatusFlag::Deleted);
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].reason, StatusReason::TransmissionCancelled);
    assert_eq!(deleted[0].orig, bundle.gbof_id());
}

#[tokio::test(start_paused = true)]
async fn expiry_before_explicit_delete_reports_once() {
    let (mut core, rx) = core();
    let reports = RecordingRegistration::new(7, "dtn://src.dtn/reports", core.events.clone());
    core.registrations.add(reports.clone());

    let bundle = reported(10, &core.bundles);
    assert!(core.add_to_pending(&bundle, false));

    tokio::time::sleep(Duration::from_secs(11)).await;
    let mut expired = next_event(&rx, "BUNDLE_EXPIRED");
    core.dispatch(&mut expired);
    assert!(!expired.daemon_only);
    assert!(!core.pending.contains(&bundle));

    assert!(!core.delete_from_pending(&bundle, StatusReason::TransmissionCancelled));

    drain_head(&mut core);
    let deleted = reports.status_reports(StatusFlag::Deleted);
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].reason, StatusReason::LifetimeExpired);
}

#[tokio::test]
async fn expired_bundle_on_link_queue_is_tolerated() {
    let (mut core, _rx) = core();
    let link = link::Link::new("l1", "test", "peer", LinkType::OnDemand, Default::default());

    let bundle = reported(3600, &core.bundles);
    assert!(core.add_to_pending(&bundle, false));
    link.queue.push_back(&bundle);
    core.pending.erase(&bundle);

    // Still queued on a link, so routers need to see it
    assert!(!core.handle_bundle_expired(&bundle));

    let stray = bundle::BundleList::new("stray", bundle::ListKind::Other);
    stray.push_back(&bundle);
    assert!(core.handle_bundle_expired(&bundle));
}

#[tokio::test]
async fn accepting_custody_twice_is_refused() {
    let (mut core, _rx) = core();

    let bundle = custody_bundle(&core.bundles);
    assert!(core.add_to_pending(&bundle, false));

    core.accept_custody(&bundle);
    assert!(bundle.local_custody());
    assert_eq!(bundle.custodian().as_str(), LOCAL);
    assert_eq!(core.custody.len(), 1);

    core.accept_custody(&bundle);
    assert!(bundle.local_custody());
    assert_eq!(core.custody.len(), 1);

    // Only the first acceptance signals the previous custodian
    let records = head_admin_records(&core);
    assert_eq!(records.len(), 1);
    assert!(matches!(
        &records[0],
        admin::AdminRecord::CustodySignal(s) if s.succeeded && s.orig == bundle.gbof_id()
    ));
}

#[tokio::test]
async fn releasing_custody_cancels_timers() {
    let (mut core, _rx) = core();
    let link = link::Link::new("l1", "test", "peer", LinkType::OnDemand, Default::default());

    let bundle = custody_bundle(&core.bundles);
    assert!(core.add_to_pending(&bundle, false));
    core.accept_custody(&bundle);

    let timer = custody::CustodyTimer::start(
        &core.timers,
        time::OffsetDateTime::now_utc(),
        CustodyTimerSpec::default(),
        &bundle,
        &link,
        &core.events,
    );
    let handle = timer.timer.clone();
    bundle.lock().custody_timers.push(timer);

    core.release_custody(&bundle);
    assert!(handle.is_cancelled());
    assert_eq!(bundle.lock().custody_timer_count(), 0);
    assert!(!bundle.local_custody());
    assert!(bundle.custodian().is_null());
    assert!(core.custody.is_empty());

    // Nothing to release a second time
    core.release_custody(&bundle);
    assert!(core.custody.is_empty());
}

#[tokio::test]
async fn in_flight_bundles_are_not_deleted_early() {
    let (mut core, _rx) = core();
    let link = link::Link::new("l1", "test", "peer", LinkType::OnDemand, Default::default());

    let bundle = reported(3600, &core.bundles);
    assert!(core.add_to_pending(&bundle, false));
    bundle.lock().fwdlog.add_entry(
        &link,
        ForwardingAction::Forward,
        ForwardingState::InFlight,
        CustodyTimerSpec::default(),
    );

    assert!(!core.try_delete_from_pending(&bundle, StatusReason::NoAdditionalInfo));
    assert!(core.pending.contains(&bundle));

    bundle
        .lock()
        .fwdlog
        .update(&link, ForwardingState::Transmitted);
    link.queue.push_back(&bundle);
    assert!(!core.try_delete_from_pending(&bundle, StatusReason::NoAdditionalInfo));

    link.queue.erase(&bundle);
    assert!(core.try_delete_from_pending(&bundle, StatusReason::NoAdditionalInfo));
    assert!(!core.pending.contains(&bundle));
    assert!(!bundle.lock().has_expiration_timer());

    // Already gone
    assert!(!core.try_delete_from_pending(&bundle, StatusReason::NoAdditionalInfo));
}

#[tokio::test]
async fn early_deletion_can_be_disabled() {
    let (mut core, _rx) = core();
    core.config.early_deletion = false;

    let bundle = reported(3600, &core.bundles);
    assert!(core.add_to_pending(&bundle, false));
    assert!(!core.try_delete_from_pending(&bundle, StatusReason::NoAdditionalInfo));
    assert!(core.pending.contains(&bundle));
}

#[tokio::test(start_paused = true)]
async fn custody_timeout_appends_forwarding_log_entry() {
    let (mut core, rx) = core();
    let link = link::Link::new("l1", "test", "peer", LinkType::OnDemand, Default::default());
    let spec = CustodyTimerSpec {
        base: 10,
        lifetime_pct: 0,
        limit: 0,
    };

    let bundle = custody_bundle(&core.bundles);
    assert!(core.add_to_pending(&bundle, false));
    core.accept_custody(&bundle);
    bundle
        .lock()
        .fwdlog
        .add_entry(&link, ForwardingAction::Copy, ForwardingState::InFlight, spec);

    core.handle_bundle_transmitted(&bundle, &link, bundle.payload_len(), true);
    assert_eq!(bundle.lock().custody_timer_count(), 1);
    // Held in custody, so not deleted
    assert!(core.pending.contains(&bundle));

    tokio::time::sleep(Duration::from_secs(11)).await;
    let mut timeout = next_event(&rx, "CUSTODY_TIMEOUT");
    core.dispatch(&mut timeout);

    let state = bundle.lock();
    assert_eq!(state.custody_timer_count(), 0);
    assert_eq!(state.fwdlog.len(), 2);
    let latest = state.fwdlog.get_latest_entry(&link).expect("latest entry");
    assert_eq!(latest.state, ForwardingState::CustodyTimeout);
    assert_eq!(latest.action, ForwardingAction::Copy);
    assert_eq!(latest.custody_spec, spec);
}

#[tokio::test(start_paused = true)]
async fn custody_timeout_after_release_is_ignored() {
    let (mut core, rx) = core();
    let link = link::Link::new("l1", "test", "peer", LinkType::OnDemand, Default::default());
    let spec = CustodyTimerSpec {
        base: 10,
        lifetime_pct: 0,
        limit: 0,
    };

    let bundle = custody_bundle(&core.bundles);
    assert!(core.add_to_pending(&bundle, false));
    core.accept_custody(&bundle);
    bundle.lock().fwdlog.add_entry(
        &link,
        ForwardingAction::Forward,
        ForwardingState::InFlight,
        spec,
    );
    core.handle_bundle_transmitted(&bundle, &link, bundle.payload_len(), true);

    tokio::time::sleep(Duration::from_secs(11)).await;
    let mut timeout = next_event(&rx, "CUSTODY_TIMEOUT");

    // The timer already fired, so releasing loses the race
    core.release_custody(&bundle);
    core.dispatch(&mut timeout);

    let state = bundle.lock();
    assert_eq!(state.fwdlog.len(), 1);
    assert_eq!(
        state.fwdlog.get_latest_entry_state(&link),
        ForwardingState::Transmitted
    );
}

#[tokio::test]
async fn duplicate_reception_signals_redundancy() {
    let (mut core, _rx) = core();
    let creation_ts = bundle::CreationTimestamp::now();
    let builder = || {
        bundle::BundleBuilder::new("dtn://src.dtn/app", "dtn://far.dtn/app")
            .creation_ts(creation_ts)
            .custodian("dtn://prev.dtn")
            .custody_requested(true)
            .payload(&b"precious"[..])
    };

    let mut first = Event::bundle_received(builder().build(&core.bundles), event::EventSource::Peer, 8);
    core.dispatch(&mut first);
    assert!(!first.daemon_only);

    let mut second = Event::bundle_received(builder().build(&core.bundles), event::EventSource::Peer, 8);
    core.dispatch(&mut second);
    assert!(second.daemon_only);

    assert_eq!(core.pending.len(), 1);
    let stats = core.counters.snapshot(core.pending.len(), core.custody.len());
    assert_eq!(stats.received, 2);
    assert_eq!(stats.duplicate, 1);

    let records = head_admin_records(&core);
    assert_eq!(records.len(), 2);
    assert!(matches!(
        &records[1],
        admin::AdminRecord::CustodySignal(s)
            if !s.succeeded && s.reason == CustodySignalReason::RedundantReception
    ));
}

#[tokio::test]
async fn partial_reception_becomes_fragment() {
    let (mut core, _rx) = core();

    let bundle = bundle::BundleBuilder::new("dtn://src.dtn/app", "dtn://far.dtn/app")
        .payload(&b"0123456789"[..])
        .build(&core.bundles);
    let mut event = Event::bundle_received(bundle, event::EventSource::Peer, 4);
    core.dispatch(&mut event);

    let EventKind::BundleReceived { bundle, .. } = &event.kind else {
        unreachable!()
    };
    assert!(bundle.is_fragment());
    assert_eq!(&bundle.payload[..], b"0123");
    assert!(core.pending.contains(bundle));
    assert_eq!(core.pending.len(), 1);
}

#[tokio::test]
async fn fragments_are_reassembled_before_delivery() {
    let (mut core, _rx) = core();
    let app = RecordingRegistration::new(1, "dtn://local.dtn/app", core.events.clone());
    core.registrations.add(app.clone());

    let creation_ts = bundle::CreationTimestamp::now();
    for (offset, payload) in [(5, &b"world"[..]), (0, &b"hello"[..])] {
        let fragment = bundle::BundleBuilder::new("dtn://src.dtn/app", "dtn://local.dtn/app")
            .creation_ts(creation_ts)
            .fragment(Some(bundle::FragmentInfo {
                offset,
                total_length: 10,
            }))
            .payload(payload)
            .build(&core.bundles);
        let mut event = Event::bundle_received(fragment, event::EventSource::Peer, 5);
        core.dispatch(&mut event);
    }
    assert!(app.delivered().is_empty());

    let names = drain_head(&mut core);
    assert_eq!(names, ["REASSEMBLY_COMPLETED", "BUNDLE_RECEIVED"]);

    let delivered = app.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(&delivered[0].payload[..], b"helloworld");
    // Only the reassembled bundle is left
    assert_eq!(core.pending.len(), 1);
}

#[tokio::test]
async fn freed_bundles_leave_the_table_and_store() {
    let (mut core, rx) = core();

    let bundle = reported(3600, &core.bundles);
    assert!(core.add_to_pending(&bundle, true));
    assert!(bundle.lock().in_datastore);
    assert_eq!(core.bundles.len(), 1);

    assert!(core.delete_from_pending(&bundle, StatusReason::NoAdditionalInfo));
    drop(bundle);

    // Let the cancelled expiration timer drop its reference
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut free = next_event(&rx, "BUNDLE_FREE");
    core.dispatch(&mut free);
    assert!(free.daemon_only);
    assert!(core.bundles.is_empty());
}

fn copy_of(creation_ts: bundle::CreationTimestamp, table: &bundle::BundleTable) -> bundle::BundleRef {
    bundle::BundleBuilder::new("dtn://src.dtn/app", "dtn://far.dtn/app")
        .creation_ts(creation_ts)
        .expiration(3600)
        .payload(&b"again"[..])
        .build(table)
}

#[tokio::test]
async fn freeing_a_bundle_keeps_the_record_of_its_copy() {
    let (mut core, rx) = core();
    let creation_ts = bundle::CreationTimestamp::now();

    let first = copy_of(creation_ts, &core.bundles);
    assert!(core.add_to_pending(&first, true));
    assert!(core.delete_from_pending(&first, StatusReason::NoAdditionalInfo));
    drop(first);
    tokio::time::sleep(Duration::from_millis(10)).await;
    let mut free = next_event(&rx, "BUNDLE_FREE");

    // A later copy with the same GBOF id is stored before the first is freed
    let second = copy_of(creation_ts, &core.bundles);
    assert!(core.add_to_pending(&second, true));
    assert_ne!(
        storage::BundleRecord::key_of(&second),
        second.gbof_id().to_string()
    );

    core.dispatch(&mut free);
    core.actions.store().flush().await;

    let records = core.actions.store().recover().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key, second.store_key());
}

#[tokio::test]
async fn registration_expiry_waits_for_active_registrations() {
    let (mut core, _rx) = core();
    let active = RecordingRegistration::new_active(1, "dtn://local.dtn/a", core.events.clone());
    let idle = RecordingRegistration::new(2, "dtn://local.dtn/b", core.events.clone());
    core.handle_registration_added(&(active as Arc<dyn reg::Registration>));
    core.handle_registration_added(&(idle as Arc<dyn reg::Registration>));

    core.handle_registration_expired(1);
    core.handle_registration_expired(2);

    assert!(core.registrations.is_expired(1));
    assert!(core.registrations.get(1).is_some());
    assert!(core.registrations.get(2).is_none());
    assert!(!core.is_local(&"dtn://local.dtn/a".into()));
}

#[tokio::test]
async fn new_registrations_receive_pending_bundles() {
    let (mut core, _rx) = core();

    let bundle = bundle::BundleBuilder::new("dtn://src.dtn/app", "dtn://local.dtn/late")
        .payload(&b"waiting"[..])
        .build(&core.bundles);
    let mut event = Event::bundle_received(bundle, event::EventSource::Peer, 7);
    core.dispatch(&mut event);

    let app = RecordingRegistration::new(3, "dtn://local.dtn/late", core.events.clone());
    core.handle_registration_added(&(app.clone() as Arc<dyn reg::Registration>));
    assert_eq!(app.delivered().len(), 1);
}

#[tokio::test]
async fn link_state_change_requests() {
    let (mut core, _rx) = core();
    let cla = with_cla(&core);

    let link = link::Link::new("l1", "test", "peer", LinkType::OnDemand, Default::default());
    assert!(!core.handle_link_created(&link));
    assert_eq!(link.state(), LinkState::Available);
    assert!(core.handle_link_created(&link));

    let request = |core: &mut DaemonCore, state, reason| {
        let mut event = Event::link_state_change(&link, state, reason);
        core.dispatch(&mut event);
        assert!(event.daemon_only);
    };

    request(&mut core, LinkState::Unavailable, event::ContactReason::User);
    assert_eq!(link.state(), LinkState::Unavailable);
    assert_eq!(drain_head(&mut core), ["LINK_UNAVAILABLE"]);

    request(&mut core, LinkState::Available, event::ContactReason::NoInfo);
    assert_eq!(link.state(), LinkState::Available);
    assert_eq!(drain_head(&mut core), ["LINK_AVAILABLE"]);

    // Refused without a state change
    request(&mut core, LinkState::Busy, event::ContactReason::NoInfo);
    request(&mut core, LinkState::Closing, event::ContactReason::User);
    assert_eq!(link.state(), LinkState::Available);
    assert!(core.head.is_empty());

    request(&mut core, LinkState::Open, event::ContactReason::User);
    assert_eq!(link.state(), LinkState::Opening);
    let contact = link.contact().expect("contact");
    assert_eq!(cla.opened(), [("l1".to_string(), contact)]);

    assert!(!core.handle_contact_up(&link, contact));
    assert_eq!(link.state(), LinkState::Open);
    assert_eq!(link.stats().contacts, 1);
    // A second CONTACT_UP for the same contact changes nothing
    assert!(core.handle_contact_up(&link, contact));

    core.handle_link_busy(&link);
    assert_eq!(link.state(), LinkState::Busy);
    request(&mut core, LinkState::Available, event::ContactReason::Unblocked);
    assert_eq!(link.state(), LinkState::Open);
    assert_eq!(drain_head(&mut core), ["LINK_AVAILABLE"]);

    // A request made before the contact came up is stale
    let mut stale = Event::new(EventKind::LinkStateChangeRequest {
        link: link.clone(),
        state: LinkState::Closing,
        reason: event::ContactReason::Broken,
        contact: None,
    });
    core.dispatch(&mut stale);
    assert_eq!(link.state(), LinkState::Open);

    request(&mut core, LinkState::Closing, event::ContactReason::Broken);
    assert_eq!(link.state(), LinkState::Unavailable);
    assert_eq!(link.contact(), None);
    assert_eq!(cla.closed(), ["l1"]);
    assert_eq!(drain_head(&mut core), ["CONTACT_DOWN", "LINK_UNAVAILABLE"]);
    // The old contact is gone
    assert!(core.handle_contact_up(&link, contact));
    assert_eq!(link.state(), LinkState::Unavailable);
}

#[tokio::test]
async fn idle_close_leaves_link_available() {
    let (mut core, _rx) = core();
    let cla = with_cla(&core);

    let link = link::Link::new("l1", "test", "peer", LinkType::OnDemand, Default::default());
    core.handle_link_created(&link);
    assert!(core.actions.open_link(&link));
    let contact = link.contact().expect("contact");
    core.handle_contact_up(&link, contact);

    let mut event = Event::link_state_change(&link, LinkState::Closing, event::ContactReason::Idle);
    core.dispatch(&mut event);
    assert_eq!(link.state(), LinkState::Available);
    assert_eq!(drain_head(&mut core), ["CONTACT_DOWN"]);
    assert_eq!(cla.closed().len(), 1);
}

#[tokio::test]
async fn forwarding_respects_admission() {
    let (mut core, _rx) = core();
    let cla = with_cla(&core);

    let link = link::Link::new(
        "l1",
        "test",
        "peer",
        LinkType::OnDemand,
        link::LinkParams {
            mtu: 4,
            reliable: false,
        },
    );
    core.handle_link_created(&link);

    let bundle = reported(3600, &core.bundles);
    assert!(matches!(
        core.forward_bundle(&bundle, &link, ForwardingAction::Forward, None),
        Err(link::AdmissionError::NotOpen(..))
    ));

    assert!(core.actions.open_link(&link));
    let contact = link.contact().expect("contact");
    core.handle_contact_up(&link, contact);
    assert!(matches!(
        core.forward_bundle(&bundle, &link, ForwardingAction::Forward, None),
        Err(link::AdmissionError::ExceedsMtu { len: 5, mtu: 4 })
    ));
    assert_eq!(cla.sent_count(), 0);

    let small = bundle::BundleBuilder::new("dtn://src.dtn/app", "dtn://far.dtn/app")
        .payload(&b"hi"[..])
        .build(&core.bundles);
    assert!(
        core.forward_bundle(&small, &link, ForwardingAction::Forward, None)
            .is_ok()
    );
    assert!(matches!(
        core.forward_bundle(&small, &link, ForwardingAction::Forward, None),
        Err(link::AdmissionError::AlreadyInFlight(..))
    ));
    assert_eq!(cla.sent_count(), 1);
    assert_eq!(link.stats().bundles_inflight, 1);
    assert_eq!(
        small.lock().fwdlog.get_latest_entry(&link).map(|e| e.custody_spec),
        Some(core.config.custody_timer)
    );
}

#[tokio::test]
async fn links_of_unregistered_clas_refuse_bundles() {
    let (mut core, _rx) = core();
    let cla = with_cla(&core);
    let link = link::Link::new("l1", "test", "peer", LinkType::OnDemand, Default::default());
    core.handle_link_created(&link);
    assert!(core.actions.open_link(&link));
    let contact = link.contact().expect("contact");
    core.handle_contact_up(&link, contact);
    assert_eq!(link.state(), LinkState::Open);

    core.clas.unregister("test").expect("unregister CLA");

    let bundle = reported(3600, &core.bundles);
    assert!(matches!(
        core.forward_bundle(&bundle, &link, ForwardingAction::Forward, None),
        Err(link::AdmissionError::NoConvergenceLayer(..))
    ));
    assert_eq!(cla.sent_count(), 0);
    assert_eq!(link.stats().bundles_inflight, 0);
    assert!(bundle.lock().fwdlog.get_latest_entry(&link).is_none());
}

#[tokio::test]
async fn unacknowledged_reliable_transmission_fails() {
    let (mut core, _rx) = core();
    let link = link::Link::new(
        "l1",
        "test",
        "peer",
        LinkType::OnDemand,
        link::LinkParams {
            mtu: 0,
            reliable: true,
        },
    );

    let bundle = reported(3600, &core.bundles);
    assert!(core.add_to_pending(&bundle, false));
    bundle.lock().fwdlog.add_entry(
        &link,
        ForwardingAction::Forward,
        ForwardingState::InFlight,
        CustodyTimerSpec::default(),
    );

    core.handle_bundle_transmitted(&bundle, &link, bundle.payload_len(), false);
    assert_eq!(
        bundle.lock().fwdlog.get_latest_entry_state(&link),
        ForwardingState::TransmitFailed
    );
    assert!(core.pending.contains(&bundle));
    assert_eq!(link.stats().bundles_transmitted, 0);
}

#[tokio::test]
async fn partial_transmission_fragments_the_rest() {
    let (mut core, _rx) = core();
    let link = link::Link::new("l1", "test", "peer", LinkType::OnDemand, Default::default());

    let bundle = bundle::BundleBuilder::new("dtn://src.dtn/app", "dtn://far.dtn/app")
        .payload(&b"0123456789"[..])
        .build(&core.bundles);
    assert!(core.add_to_pending(&bundle, false));
    bundle.lock().fwdlog.add_entry(
        &link,
        ForwardingAction::Forward,
        ForwardingState::InFlight,
        CustodyTimerSpec::default(),
    );

    core.handle_bundle_transmitted(&bundle, &link, 6, true);
    assert_eq!(link.stats().bytes_transmitted, 6);

    let tail = match core.head.front().map(|e| &e.kind) {
        Some(EventKind::BundleReceived {
            bundle,
            source: event::EventSource::Fragmentation,
            ..
        }) => bundle.clone(),
        _ => panic!("No fragment was posted"),
    };
    assert_eq!(&tail.payload[..], b"6789");
    assert_eq!(tail.fragment.map(|f| f.offset), Some(6));
}

#[tokio::test]
async fn shutdown_closes_open_links_and_runs_hook() {
    let (mut core, _rx) = core();
    let cla = with_cla(&core);

    let link = link::Link::new("l1", "test", "peer", LinkType::OnDemand, Default::default());
    core.handle_link_created(&link);
    assert!(core.actions.open_link(&link));
    let contact = link.contact().expect("contact");
    core.handle_contact_up(&link, contact);

    let (tx, rx) = std::sync::mpsc::channel();
    core.shutdown_hook = Some(Box::new(move || {
        _ = tx.send(());
    }));

    let mut event = Event::new(EventKind::Shutdown);
    core.dispatch(&mut event);
    assert!(core.should_stop);
    assert_eq!(link.state(), LinkState::Unavailable);
    assert_eq!(cla.closed(), ["l1"]);
    assert!(rx.try_recv().is_ok());
}

#[tokio::test]
async fn cancelled_transmissions_leave_the_link() {
    let (mut core, _rx) = core();
    let cla = with_cla(&core);

    let link = link::Link::new("l1", "test", "peer", LinkType::OnDemand, Default::default());
    core.handle_link_created(&link);
    assert!(core.actions.open_link(&link));
    let contact = link.contact().expect("contact");
    core.handle_contact_up(&link, contact);

    let bundle = reported(3600, &core.bundles);
    assert!(core.add_to_pending(&bundle, false));
    assert!(
        core.forward_bundle(&bundle, &link, ForwardingAction::Forward, None)
            .is_ok()
    );

    assert!(core.actions.cancel_bundle(&bundle, &link));
    assert_eq!(
        bundle.lock().fwdlog.get_latest_entry_state(&link),
        ForwardingState::Cancelled
    );
    assert_eq!(cla.cancelled().len(), 1);
    assert_eq!(cla.sent_count(), 0);
    let stats = link.stats();
    assert_eq!(stats.bundles_inflight, 0);
    assert_eq!(stats.bundles_cancelled, 1);

    // Nothing left to cancel
    assert!(!core.actions.cancel_bundle(&bundle, &link));
}

#[tokio::test]
async fn injected_bundles_are_pending_and_stored() {
    let (mut core, _rx) = core();
    let bundle = bundle::BundleBuilder::new(LOCAL, "dtn://far.dtn/app")
        .payload(&b"injected"[..])
        .build(&core.bundles);

    assert!(core.inject_bundle(&bundle));
    assert!(core.pending.contains(&bundle));
    let state = bundle.lock();
    assert!(state.in_datastore);
    assert!(state.has_expiration_timer());
}

#[tokio::test]
async fn created_links_are_announced() {
    let (core, rx) = core();
    let link = core.actions().create_link(
        "l1",
        "test",
        "peer",
        LinkType::AlwaysOn,
        Default::default(),
    );

    match next_event(&rx, "LINK_CREATED").kind {
        EventKind::LinkCreated { link: created } => assert!(Arc::ptr_eq(&created, &link)),
        _ => unreachable!(),
    }
    assert_eq!(link.state(), LinkState::Unavailable);
}

#[tokio::test]
async fn event_loop_runs_on_a_spawned_task() {
    let config = config::Config {
        local_eid: LOCAL.into(),
        ..Default::default()
    };
    let storage = storage::bundle_mem::new(&storage::bundle_mem::Config::default());
    let daemon = Daemon::new(config, storage, Box::new(router::NullRouter::new()));

    let (handle, task) = daemon.spawn();
    assert!(handle.shutdown(Duration::from_secs(5)).await);
    task.await.expect("event loop panicked");
}
