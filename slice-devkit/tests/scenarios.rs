use slice_devkit::fixtures::{self, s1_s4};
use slice_devkit::Harness;
use slice_kernel::catalog::SliceCatalog;
use slice_kernel::models::{Bandwidth, Endpoint, SwitchId};
use slice_kernel::qos::QosScope;
use slice_kernel::rules::RuleAction;
use slice_kernel::topology::TopologyEvent;
use slice_kernel::SliceError;

fn mbps(n: u64) -> Option<Bandwidth> {
    Some(Bandwidth::from_mbps(n))
}

#[tokio::test]
async fn lower_priority_slice_is_refused_when_link_is_full() {
    let h = Harness::lab();

    let report = h.engine.activate("gaming").await.unwrap();
    assert!(report.preempted_slices.is_empty());
    assert_eq!(h.engine.status().await.reserved_on("s1-s4"), mbps(60));

    let err = h.engine.activate("video").await.unwrap_err();
    match err {
        SliceError::InsufficientBandwidth { link, required, available, deficit } => {
            assert_eq!(link, s1_s4());
            assert_eq!(required, Bandwidth::from_mbps(50));
            assert_eq!(available, Bandwidth::from_mbps(40));
            assert_eq!(deficit, Bandwidth::from_mbps(10));
        }
        other => panic!("unexpected error {other:?}"),
    }

    let status = h.engine.status().await;
    assert_eq!(h.active().await, vec!["gaming"]);
    assert_eq!(status.reserved_on("s1-s4"), mbps(60));
}

#[tokio::test]
async fn higher_priority_slice_preempts() {
    let h = Harness::lab();
    h.engine.activate("gaming").await.unwrap();

    let report = h.engine.activate("emergency").await.unwrap();
    assert_eq!(report.preempted_slices, vec!["gaming"]);

    let status = h.engine.status().await;
    assert_eq!(status.active_slices.len(), 1);
    assert_eq!(status.active_slices[0].name, "emergency");
    assert_eq!(status.reserved_on("s1-s4"), mbps(50));

    // only emergency's forward, reverse and isolation rules remain
    assert_eq!(h.switch.rule_count(), 6);
    let g1 = fixtures::ip("g1");
    let gs = fixtures::ip("gs");
    assert!(h.switch.installed().iter().all(|r| r.rule_match.ipv4_src == g1 || r.rule_match.ipv4_src == gs));
}

#[tokio::test]
async fn active_slice_confines_its_hosts_to_their_peer() {
    let h = Harness::lab();
    assert!(h.pingall_failures().await.is_empty());

    h.engine.activate("gaming").await.unwrap();
    assert!(h.can_ping("h1", "gs").await);
    assert!(!h.can_ping("h1", "h2").await);
    assert!(!h.can_ping("gs", "ps").await);
    assert!(!h.can_ping("h1", "h3").await);

    let outsiders = ["h2", "g1", "h5", "h3", "h4", "g2", "ps"];
    for (i, a) in outsiders.iter().enumerate() {
        for b in &outsiders[i + 1..] {
            assert!(h.can_ping(a, b).await, "{a} <-> {b} should be unaffected");
        }
    }

    let failures = h.pingall_failures().await;
    assert!(failures.iter().all(|(a, b)| ["h1", "gs"].contains(&a.as_str()) || ["h1", "gs"].contains(&b.as_str())));

    h.engine.deactivate("gaming").await.unwrap();
    assert!(h.pingall_failures().await.is_empty());
}

#[tokio::test]
async fn no_partial_preemption_when_eviction_is_not_enough() {
    let h = Harness::lab();
    h.engine.activate("gaming").await.unwrap();
    h.engine.activate("stream").await.unwrap();
    let rules_before = h.switch.installed();
    assert_eq!(h.engine.status().await.reserved_on("s1-s4"), mbps(90));

    let err = h.engine.activate("backup").await.unwrap_err();
    match err {
        SliceError::InsufficientBandwidth { required, available, deficit, .. } => {
            assert_eq!(required, Bandwidth::from_mbps(70));
            assert_eq!(available, Bandwidth::from_mbps(40));
            assert_eq!(deficit, Bandwidth::from_mbps(30));
        }
        other => panic!("unexpected error {other:?}"),
    }

    assert_eq!(h.active().await, vec!["gaming", "stream"]);
    let status = h.engine.status().await;
    assert_eq!(status.reserved_on("s1-s4"), mbps(90));
    assert_eq!(status.reserved_on("s1-s2"), mbps(30));
    assert_eq!(h.switch.installed(), rules_before);
}

#[tokio::test]
async fn unknown_slice_changes_nothing() {
    let h = Harness::lab();
    let err = h.engine.activate("nope").await.unwrap_err();
    assert!(matches!(err, SliceError::UnknownSlice(ref n) if n == "nope"));
    assert_eq!(err.to_string(), "Slice 'nope' not found.");
    assert_eq!(h.switch.rule_count(), 0);
    assert!(h.engine.status().await.links.iter().all(|l| l.reserved == Bandwidth::ZERO));
    assert!(h.qos.calls().is_empty());
}

#[tokio::test]
async fn activating_twice_is_refused_without_side_effects() {
    let h = Harness::lab();
    h.engine.activate("gaming").await.unwrap();
    let rules = h.switch.rule_count();
    let ensures = h.qos.ensures().len();

    let err = h.engine.activate("gaming").await.unwrap_err();
    assert!(matches!(err, SliceError::AlreadyActive(_)));
    assert_eq!(h.switch.rule_count(), rules);
    assert_eq!(h.qos.ensures().len(), ensures);
    assert_eq!(h.engine.status().await.reserved_on("s1-s4"), mbps(60));
}

#[tokio::test]
async fn activate_then_deactivate_restores_previous_state() {
    let h = Harness::lab();
    h.engine.activate("gaming").await.unwrap();
    let rules_before = h.switch.installed();
    let links_before: Vec<_> = h.engine.status().await.links.iter().map(|l| (l.id.clone(), l.reserved)).collect();

    for slice in ["work", "stream"] {
        h.engine.activate(slice).await.unwrap();
        assert_ne!(h.switch.installed(), rules_before);
        h.engine.deactivate(slice).await.unwrap();

        let links_after: Vec<_> = h.engine.status().await.links.iter().map(|l| (l.id.clone(), l.reserved)).collect();
        assert_eq!(links_after, links_before, "{slice} left reservations behind");
        assert_eq!(h.switch.installed(), rules_before, "{slice} left rules behind");
    }
}

#[tokio::test]
async fn deactivating_one_slice_leaves_an_unrelated_one_alone() {
    let h = Harness::lab();
    h.engine.activate("work").await.unwrap();
    let work_rules = h.switch.installed();
    let work_reserved = h.engine.status().await.slice("work").unwrap().reserved_per_link.clone();
    assert_eq!(work_reserved.get("s2-s3").copied(), Some(Bandwidth::from_mbps(40)));

    h.engine.activate("gaming").await.unwrap();
    h.engine.deactivate("gaming").await.unwrap();

    assert_eq!(h.switch.installed(), work_rules);
    assert_eq!(h.engine.status().await.slice("work").unwrap().reserved_per_link, work_reserved);
}

#[tokio::test]
async fn deactivating_inactive_slice_is_not_active() {
    let h = Harness::lab();
    let err = h.engine.deactivate("gaming").await.unwrap_err();
    assert!(matches!(err, SliceError::NotActive(_)));
    assert_eq!(err.status_code(), axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_serializes_with_camel_case_and_mbps() {
    let h = Harness::lab();
    h.engine.activate("gaming").await.unwrap();
    let json = serde_json::to_value(h.engine.status().await).unwrap();

    let slice = &json["activeSlices"][0];
    assert_eq!(slice["name"], "gaming");
    assert_eq!(slice["reservedPerLink"]["s1-s4"], 60.0);
    assert_eq!(slice["stale"], false);
    let link = json["links"].as_array().unwrap().iter().find(|l| l["id"] == "s1-s4").unwrap();
    assert_eq!(link["capacity"], 100.0);
    assert_eq!(link["reserved"], 60.0);
}

#[tokio::test]
async fn link_failure_marks_slice_stale_and_keeps_accounting() {
    let h = Harness::lab();
    h.engine.activate("gaming").await.unwrap();

    let applied = h
        .engine
        .apply_topology(TopologyEvent::LinkDown { a: Endpoint::new(4, 1), b: Endpoint::new(1, 2) })
        .await
        .unwrap();
    assert!(applied);

    let status = h.engine.status().await;
    assert!(status.slice("gaming").unwrap().stale);
    assert_eq!(status.reserved_on("s1-s4"), mbps(60));

    let err = h.engine.activate("emergency").await.unwrap_err();
    assert!(matches!(err, SliceError::PathNotFound { .. }));

    h.engine.deactivate("gaming").await.unwrap();
    assert_eq!(h.engine.status().await.reserved_on("s1-s4"), mbps(0));
}

#[tokio::test]
async fn queues_follow_every_hop_and_shared_interfaces_survive() {
    let h = Harness::lab();

    h.engine.activate("work").await.unwrap();
    let work: Vec<String> = h.qos.ensures().iter().map(|r| r.interface.clone()).collect();
    assert_eq!(work, vec!["s3-eth1", "s2-eth3", "s3-eth1", "s2-eth3"]);
    assert!(h.qos.ensures().iter().all(|r| r.capacity_pct == 20 && r.slice == "work"));

    h.engine.activate("video").await.unwrap();
    h.engine.activate("emergency").await.unwrap();
    assert!(h.qos.shaped_interfaces().contains("s1-eth2"));

    let report = h.engine.deactivate("video").await.unwrap();
    assert!(report.warnings.iter().any(|w| w.contains("s1-eth2") && w.contains("emergency")));
    assert!(!h.qos.removals().contains(&"s1-eth2".to_string()));

    h.engine.deactivate("emergency").await.unwrap();
    assert_eq!(h.qos.removals(), vec!["s1-eth2"]);
    assert!(!h.qos.shaped_interfaces().contains("s1-eth2"));
}

#[tokio::test]
async fn preemption_evicts_several_victims_across_two_links_in_order() {
    let catalog = SliceCatalog::from_yaml(
        r#"
bulk:
  flows: [{ src: h2, dst: gs }]
  capacity_pct: 50
  priority: 10
relay:
  flows: [{ src: h5, dst: h1 }]
  capacity_pct: 50
  priority: 20
chat:
  flows: [{ src: h1, dst: gs }]
  capacity_pct: 20
  priority: 10
uplink:
  flows: [{ src: h5, dst: gs }]
  capacity_pct: 60
  priority: 90
"#,
        &fixtures::aliases(),
    )
    .unwrap();
    let h = Harness::with(fixtures::lab(), catalog, QosScope::EveryHop);
    for slice in ["bulk", "relay", "chat"] {
        h.engine.activate(slice).await.unwrap();
    }
    let status = h.engine.status().await;
    assert_eq!(status.reserved_on("s1-s2"), mbps(50));
    assert_eq!(status.reserved_on("s1-s4"), mbps(70));

    // s1-s2 needs relay gone; s1-s4 needs chat (newer) and then bulk as well
    let report = h.engine.activate("uplink").await.unwrap();
    assert_eq!(report.preempted_slices, vec!["relay", "chat", "bulk"]);
    assert_eq!(h.active().await, vec!["uplink"]);

    let status = h.engine.status().await;
    assert_eq!(status.reserved_on("s1-s2"), mbps(60));
    assert_eq!(status.reserved_on("s1-s4"), mbps(60));

    // transit switch carries forward and reverse only, no isolation
    let transit = h.switch.installed_on(SwitchId(1));
    assert_eq!(transit.len(), 2);
    assert!(transit.iter().all(|r| matches!(r.action, RuleAction::Output { .. })));
    assert_eq!(h.switch.installed_on(SwitchId(2)).len(), 3);
    assert_eq!(h.switch.installed_on(SwitchId(4)).len(), 3);
}

#[tokio::test]
async fn out_of_range_link_capacity_leaves_the_engine_running() {
    let h = Harness::lab();
    let applied = h
        .engine
        .apply_topology(TopologyEvent::LinkUp { a: Endpoint::new(7, 1), b: Endpoint::new(8, 1), capacity_mbps: u64::MAX / 10 })
        .await
        .unwrap();
    assert!(!applied);
    assert!(h.engine.is_running());
    assert_eq!(h.engine.status().await.links.len(), 4);

    h.engine.activate("gaming").await.unwrap();
    assert_eq!(h.engine.status().await.reserved_on("s1-s4"), mbps(60));
}
