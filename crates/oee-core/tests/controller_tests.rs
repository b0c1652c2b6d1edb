//! Operator action tests against a scripted server

use oee_client::{Method, TransportError};
use oee_core::{ActionOutcome, DashboardError};
use oee_store::{MachineStatus, ReconcileOutcome, View, PENDING_REASON};
use oee_test_utils::{
    downtime_json, production_json, status_json, test_config, test_dashboard, TestDashboard,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

const PRODUCTION: &str = "/lines/L1/production";
const STATUS: &str = "/lines/L1/status";

async fn logged_in() -> TestDashboard {
    let t = test_dashboard(test_config());
    t.dashboard.login("token").unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    t
}

#[tokio::test(start_paused = true)]
async fn start_confirms_and_refreshes() {
    let t = logged_in().await;
    t.transport
        .respond(Method::POST, STATUS, 200, status_json("running", None));
    t.transport.respond(
        Method::GET,
        PRODUCTION,
        200,
        production_json("L1", "running", 120, Vec::new()),
    );

    let outcome = t.dashboard.controller().start().await;
    assert_eq!(outcome, ReconcileOutcome::Confirmed);

    let snapshot = t.dashboard.snapshot();
    assert_eq!(snapshot.machine.status, MachineStatus::Running);
    assert_eq!(snapshot.machine.production.good, 120);
    assert_eq!(t.transport.count(&Method::GET, PRODUCTION), 2);

    let post = t
        .transport
        .requests()
        .into_iter()
        .find(|r| r.method == Method::POST)
        .unwrap();
    assert_eq!(post.body, Some(json!({ "status": "running" })));
}

#[tokio::test(start_paused = true)]
async fn stop_then_reason_closes_one_record() {
    let t = logged_in().await;
    let controller = t.dashboard.controller();

    t.transport.respond(
        Method::POST,
        STATUS,
        200,
        status_json("down", Some(downtime_json("dt-1", PENDING_REASON, false))),
    );
    t.transport.respond(
        Method::GET,
        PRODUCTION,
        200,
        production_json(
            "L1",
            "down",
            100,
            vec![downtime_json("dt-1", PENDING_REASON, false)],
        ),
    );

    let ActionOutcome::AwaitingReason(local_id) = controller.stop().await else {
        panic!("stop should wait for a reason");
    };
    assert_eq!(controller.awaiting_reason(), Some(local_id));

    let snapshot = t.dashboard.snapshot();
    assert_eq!(snapshot.machine.status, MachineStatus::Down);
    assert_eq!(snapshot.navigation.current, View::Downtime);
    assert_eq!(snapshot.machine.downtime_history.len(), 1);
    assert!(snapshot.machine.downtime_history[0].is_open());

    t.transport.respond(
        Method::PATCH,
        "/downtime/dt-1",
        200,
        downtime_json("dt-1", "Falta de material", true),
    );
    t.transport.respond(
        Method::GET,
        PRODUCTION,
        200,
        production_json(
            "L1",
            "down",
            100,
            vec![downtime_json("dt-1", "Falta de material", true)],
        ),
    );

    let outcome = controller
        .submit_downtime_reason("Falta de material")
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Confirmed);
    assert_eq!(controller.awaiting_reason(), None);

    let snapshot = t.dashboard.snapshot();
    assert_eq!(snapshot.navigation.current, View::Production);
    assert_eq!(snapshot.machine.downtime_history.len(), 1);
    let record = &snapshot.machine.downtime_history[0];
    assert_eq!(record.reason, "Falta de material");
    assert_eq!(record.server_id.as_deref(), Some("dt-1"));
    assert!(record.ended_at.is_some());

    let patch = t
        .transport
        .requests()
        .into_iter()
        .find(|r| r.method == Method::PATCH)
        .unwrap();
    assert!(patch.url.ends_with("/downtime/dt-1"));
    assert_eq!(patch.body, Some(json!({ "reason": "Falta de material" })));
    assert_eq!(t.transport.count(&Method::PATCH, "/downtime"), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_stop_keeps_local_record() {
    let t = logged_in().await;
    t.transport
        .respond(Method::POST, STATUS, 503, json!("maintenance"));
    let polls = t.transport.count(&Method::GET, PRODUCTION);

    let error = match t.dashboard.controller().stop().await {
        ActionOutcome::Settled(ReconcileOutcome::Recovered { error }) => error,
        other => panic!("expected a recovered outcome, got {other:?}"),
    };
    assert!(error.contains("503"));

    let snapshot = t.dashboard.snapshot();
    assert_eq!(snapshot.navigation.current, View::Production);
    assert_eq!(snapshot.machine.downtime_history.len(), 1);
    let record = &snapshot.machine.downtime_history[0];
    assert!(!record.confirmed);
    assert!(record.ended_at.is_some());
    assert_eq!(record.reason, PENDING_REASON);

    // No refresh after a failure
    assert_eq!(t.transport.count(&Method::GET, PRODUCTION), polls);
    assert_eq!(t.dashboard.controller().awaiting_reason(), None);
}

#[tokio::test(start_paused = true)]
async fn failed_reason_submission_keeps_operator_reason() {
    let t = logged_in().await;
    let controller = t.dashboard.controller();
    t.transport.respond(
        Method::POST,
        STATUS,
        200,
        status_json("paused", Some(downtime_json("dt-9", PENDING_REASON, false))),
    );
    // The refresh after the pause swaps in the server's copy of the record
    t.transport.respond(
        Method::GET,
        PRODUCTION,
        200,
        production_json(
            "L1",
            "paused",
            100,
            vec![downtime_json("dt-9", PENDING_REASON, false)],
        ),
    );
    t.transport.fail(
        Method::PATCH,
        "/downtime/dt-9",
        TransportError::Connect("connection refused".to_string()),
    );

    assert!(matches!(
        controller.pause().await,
        ActionOutcome::AwaitingReason(_)
    ));
    let outcome = controller.submit_downtime_reason("Setup").await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Recovered { .. }));

    let snapshot = t.dashboard.snapshot();
    assert_eq!(snapshot.navigation.current, View::Production);
    let record = &snapshot.machine.downtime_history[0];
    assert_eq!(record.server_id.as_deref(), Some("dt-9"));
    assert_eq!(record.reason, "Setup");
    assert!(record.ended_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn reason_without_pending_downtime_is_rejected() {
    let t = logged_in().await;
    let result = t
        .dashboard
        .controller()
        .submit_downtime_reason("Falta de material")
        .await;
    assert!(matches!(result, Err(DashboardError::NoPendingDowntime)));
    assert_eq!(t.transport.count(&Method::PATCH, "/downtime"), 0);
}

#[tokio::test(start_paused = true)]
async fn unauthorized_action_logs_out() {
    let t = logged_in().await;
    t.transport
        .respond(Method::POST, STATUS, 401, json!("expired"));

    let outcome = t.dashboard.controller().setup().await;
    assert!(matches!(outcome, ReconcileOutcome::Recovered { .. }));
    assert_eq!(t.dashboard.registry().active_intervals_count(), 0);
    assert_eq!(t.navigator.redirects(), 1);
    assert!(!t.dashboard.client().is_authenticated());
}
