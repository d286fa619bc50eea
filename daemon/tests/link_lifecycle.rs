use dtnd::{
    event::{ContactReason, Event},
    link::{LinkParams, LinkState, LinkType},
    storage,
    testing::{Harness, RecordingCla},
};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn always_on_links_open_and_reconnect() {
    let harness = Harness::start(Harness::config()).await;
    let link = harness
        .create_link("peer", LinkType::AlwaysOn, LinkParams::default())
        .await;
    assert_eq!(link.state(), LinkState::Open);
    assert_eq!(harness.cla.opened().len(), 1);
    assert_eq!(link.stats().contacts, 1);

    harness.cla.sink().link_closed(&link, ContactReason::Broken);
    harness.settle().await;
    assert_eq!(link.state(), LinkState::Unavailable);
    assert_eq!(harness.cla.closed(), ["peer"]);
    assert_eq!(harness.seen("CONTACT_DOWN"), 1);
    assert_eq!(harness.seen("LINK_UNAVAILABLE"), 1);

    tokio::time::sleep(Duration::from_secs(6)).await;
    harness.settle().await;
    assert_eq!(link.state(), LinkState::Open);
    assert_eq!(harness.cla.opened().len(), 2);
    assert_eq!(link.stats().contacts, 2);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn user_closed_links_stay_closed() {
    let harness = Harness::start(Harness::config()).await;
    let link = harness
        .create_link("peer", LinkType::AlwaysOn, LinkParams::default())
        .await;
    assert_eq!(link.state(), LinkState::Open);

    harness.handle.post(Event::link_state_change(
        &link,
        LinkState::Closing,
        ContactReason::User,
    ));
    harness.settle().await;
    assert_eq!(link.state(), LinkState::Unavailable);

    tokio::time::sleep(Duration::from_secs(700)).await;
    harness.settle().await;
    assert_eq!(link.state(), LinkState::Unavailable);
    assert_eq!(harness.cla.opened().len(), 1);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_reconnects_back_off() {
    let cla = RecordingCla::new();
    let harness = Harness::start_with(
        Harness::config(),
        storage::bundle_mem::new(&Default::default()),
        cla.clone(),
    )
    .await;
    let link = harness
        .create_link("peer", LinkType::OnDemand, LinkParams::default())
        .await;
    assert_eq!(link.state(), LinkState::Available);

    harness.open(&link).await;
    assert_eq!(link.state(), LinkState::Opening);
    let contact = cla.opened()[0].1;
    cla.sink().contact_up(&link, contact);
    harness.settle().await;
    assert_eq!(link.state(), LinkState::Open);

    cla.sink().link_closed(&link, ContactReason::Broken);
    harness.settle().await;
    assert_eq!(link.state(), LinkState::Unavailable);

    // First retry after the minimum interval
    tokio::time::sleep(Duration::from_secs(6)).await;
    harness.settle().await;
    assert_eq!(cla.opened().len(), 2);
    assert_eq!(link.state(), LinkState::Opening);

    // The contact never comes up
    cla.sink().link_closed(&link, ContactReason::Timeout);
    harness.settle().await;
    assert_eq!(link.state(), LinkState::Unavailable);

    tokio::time::sleep(Duration::from_secs(6)).await;
    harness.settle().await;
    assert_eq!(cla.opened().len(), 2);

    tokio::time::sleep(Duration::from_secs(5)).await;
    harness.settle().await;
    assert_eq!(cla.opened().len(), 3);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scheduled_links_wait_to_be_made_available() {
    let harness = Harness::start(Harness::config()).await;
    let link = harness
        .create_link("sched", LinkType::Scheduled, LinkParams::default())
        .await;
    assert_eq!(link.state(), LinkState::Unavailable);
    assert!(harness.cla.opened().is_empty());

    harness.handle.post(Event::link_state_change(
        &link,
        LinkState::Available,
        ContactReason::NoInfo,
    ));
    harness.settle().await;
    assert_eq!(link.state(), LinkState::Available);
    assert_eq!(harness.seen("LINK_AVAILABLE"), 1);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn idle_links_close_to_available() {
    let harness = Harness::start(Harness::config()).await;
    let link = harness
        .create_link("peer", LinkType::OnDemand, LinkParams::default())
        .await;
    harness.open(&link).await;
    assert_eq!(link.state(), LinkState::Open);

    harness.cla.sink().link_closed(&link, ContactReason::Idle);
    harness.settle().await;
    assert_eq!(link.state(), LinkState::Available);
    assert_eq!(harness.seen("LINK_UNAVAILABLE"), 0);

    tokio::time::sleep(Duration::from_secs(60)).await;
    harness.settle().await;
    assert_eq!(harness.cla.opened().len(), 1);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn queued_bundles_go_out_when_the_contact_comes_up() {
    let harness = Harness::start(Harness::config()).await;
    let link = harness
        .create_link("peer", LinkType::OnDemand, LinkParams::default())
        .await;

    harness.handle.submit(
        dtnd::bundle::BundleBuilder::new("dtn://local.dtn/app", "dtn://far.dtn/app")
            .payload(&b"waiting"[..]),
    );
    harness.settle().await;
    assert_eq!(harness.cla.sent_count(), 0);

    harness.open(&link).await;
    assert_eq!(harness.cla.sent_count(), 1);
    assert_eq!(link.stats().bundles_inflight, 1);

    harness.transmit_all(true).await;
    let stats = link.stats();
    assert_eq!(stats.bundles_inflight, 0);
    assert_eq!(stats.bundles_transmitted, 1);
    assert_eq!(harness.handle.bundle_stats().pending, 0);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_bundles_are_retried_on_the_next_contact() {
    let harness = Harness::start(Harness::config()).await;
    let link = harness
        .create_link(
            "peer",
            LinkType::OnDemand,
            LinkParams {
                mtu: 0,
                reliable: true,
            },
        )
        .await;
    harness.open(&link).await;

    harness.handle.submit(
        dtnd::bundle::BundleBuilder::new("dtn://local.dtn/app", "dtn://far.dtn/app")
            .payload(&b"fragile"[..]),
    );
    harness.settle().await;
    harness.transmit_all(false).await;
    assert_eq!(harness.handle.bundle_stats().pending, 1);
    assert_eq!(harness.handle.bundle_stats().transmitted, 0);

    harness.cla.sink().link_closed(&link, ContactReason::Idle);
    harness.settle().await;
    harness.open(&link).await;
    assert_eq!(harness.cla.sent_count(), 1);
    harness.shutdown().await;
}
