//! End-to-end scenarios against the simulated controller.

use plot_common::gcode;
use plot_common::types::{JobId, JobState};
use plotd::events::{EventBus, Outbound};
use plotd::jobs::{JobManager, JobManagerConfig};
use plotd::transport::{ControllerTransport, TransportEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const THREE_STAR: &str = include_str!("fixtures/three_star.gcode");

fn fast_manager(bus: EventBus) -> (JobManager, ControllerTransport) {
    let transport = ControllerTransport::simulated_with_delay(Duration::ZERO);
    let manager = JobManager::new(
        Arc::new(transport.clone()),
        bus,
        JobManagerConfig {
            progress_interval: Duration::from_millis(20),
        },
    );
    (manager, transport)
}

async fn wait_for_state(manager: &JobManager, id: &JobId, state: JobState) {
    for _ in 0..1000 {
        if manager.get(id).await.map(|j| j.state) == Some(state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job never reached {state}");
}

/// Drain everything currently queued for a bus client into typed events.
fn drain_events(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<serde_json::Value> {
    let mut events = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let Outbound::Event(payload) = message {
            events.push(serde_json::from_str(&payload).unwrap());
        }
    }
    events
}

#[tokio::test]
async fn simulated_position_query_round_trip() {
    let transport = ControllerTransport::simulated();
    let mut events = transport.subscribe();

    let position = transport.get_position().await.unwrap();
    assert_eq!(position.x, 100.0);
    assert_eq!(position.y, 50.0);
    assert_eq!(position.z, 10.0);
    assert_eq!(position.e, 0.0);

    let mut position_events = 0;
    while let Ok(event) = events.try_recv() {
        if let TransportEvent::Position(p) = event {
            assert_eq!(p.x, 100.0);
            position_events += 1;
        }
    }
    assert_eq!(position_events, 1);
}

#[tokio::test]
async fn three_star_pattern_parses_and_completes() {
    let plan = gcode::parse(THREE_STAR);
    assert_eq!(plan.layers.len(), 1);
    assert_eq!(plan.layers[0].name, "Main");
    assert_eq!(plan.stats.shapes, 3);
    // 28 movement commands, within the pattern's expected envelope.
    assert_eq!(plan.stats.movement_commands, 28);
    assert_eq!(plan.stats.rapid_count, 10);
    assert_eq!(plan.stats.linear_count, 18);

    let bus = EventBus::new();
    let (manager, _) = fast_manager(bus);
    let job = manager.submit(plan).await;
    manager.start(&job.id).await.unwrap();
    wait_for_state(&manager, &job.id, JobState::Completed).await;

    let done = manager.get(&job.id).await.unwrap();
    assert_eq!(done.progress.percentage, 100);
    assert_eq!(done.progress.current_line, done.progress.total_lines);
}

#[tokio::test]
async fn pause_resume_a_thousand_line_job() {
    let bus = EventBus::new();
    // A per-command delay slow enough to observe the halfway crossing.
    let transport = ControllerTransport::simulated_with_delay(Duration::from_millis(1));
    let manager = JobManager::new(
        Arc::new(transport),
        bus.clone(),
        JobManagerConfig {
            progress_interval: Duration::from_millis(20),
        },
    );
    let (client, mut rx) = bus.register().await;

    let content: String = (0..1000)
        .map(|i| format!("G1 X{} Y0 F3000\n", i % 200))
        .collect();
    let job = manager.submit_gcode(&content).await;
    bus.subscribe(&client, job.id).await;
    manager.start(&job.id).await.unwrap();

    // Let at least half the job through before pausing.
    loop {
        tokio::time::sleep(Duration::from_millis(2)).await;
        let line = manager.get(&job.id).await.unwrap().progress.current_line;
        if line >= 500 {
            break;
        }
    }
    manager.pause(&job.id).await.unwrap();
    wait_for_state(&manager, &job.id, JobState::Paused).await;

    let paused = manager.get(&job.id).await.unwrap();
    assert!(paused.progress.current_line >= 500);
    assert!(paused.progress.current_line <= 1000);

    manager.resume(&job.id).await.unwrap();
    wait_for_state(&manager, &job.id, JobState::Completed).await;

    let done = manager.get(&job.id).await.unwrap();
    assert_eq!(done.progress.current_line, 1000);
    assert_eq!(done.progress.percentage, 100);

    // The event stream shows the pause/resume bracket.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let kinds: Vec<String> = drain_events(&mut rx)
        .into_iter()
        .map(|e| e["type"].as_str().unwrap().to_string())
        .collect();
    assert!(kinds.contains(&"job:paused".to_string()));
    assert!(kinds.contains(&"job:resumed".to_string()));
    assert!(kinds.contains(&"job:completed".to_string()));
}

#[tokio::test]
async fn cancel_mid_run_emits_no_completion() {
    let bus = EventBus::new();
    // A visible per-command delay so cancellation lands mid-run.
    let transport = ControllerTransport::simulated_with_delay(Duration::from_millis(2));
    let manager = JobManager::new(
        Arc::new(transport),
        bus.clone(),
        JobManagerConfig::default(),
    );
    let (client, mut rx) = bus.register().await;

    let content: String = (0..500).map(|i| format!("G1 X{i} Y0\n")).collect();
    let job = manager.submit_gcode(&content).await;
    bus.subscribe(&client, job.id).await;
    manager.start(&job.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    manager.cancel(&job.id).await.unwrap();
    wait_for_state(&manager, &job.id, JobState::Cancelled).await;

    let cancelled = manager.get(&job.id).await.unwrap();
    assert!(cancelled.progress.current_line < 500);

    // Give any stray executor activity a moment, then assert silence.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let after_cancel = drain_events(&mut rx);
    assert!(
        after_cancel
            .iter()
            .all(|e| e["type"] != "job:completed"),
        "no completion event may follow a cancel"
    );

    // And no progress arrives once the job is cancelled.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(drain_events(&mut rx).is_empty());
}

#[tokio::test]
async fn layer_markers_emit_exactly_one_layer_change() {
    let bus = EventBus::new();
    let (manager, _) = fast_manager(bus.clone());
    let (client, mut rx) = bus.register().await;

    let content = ";LAYER:0\nG1 X1 Y0\nG1 X2 Y0\n;LAYER:1\nG1 X3 Y0\nG1 X4 Y0\n";
    let job = manager.submit_gcode(content).await;
    assert_eq!(job.plan.layers.len(), 2);
    bus.subscribe(&client, job.id).await;
    manager.start(&job.id).await.unwrap();
    wait_for_state(&manager, &job.id, JobState::Completed).await;

    let events = drain_events(&mut rx);
    let layer_changes: Vec<&serde_json::Value> = events
        .iter()
        .filter(|e| e["type"] == "job:layer-change")
        .collect();
    assert_eq!(layer_changes.len(), 1);
    assert_eq!(layer_changes[0]["data"]["layer"], 1);

    let done = manager.get(&job.id).await.unwrap();
    assert_eq!(done.progress.current_layer, 1);
}

#[tokio::test]
async fn per_job_event_ordering_holds() {
    let bus = EventBus::new();
    let (manager, _) = fast_manager(bus.clone());
    let (client, mut rx) = bus.register().await;

    let job = manager
        .submit_gcode(&(0..50).map(|i| format!("G1 X{i}\n")).collect::<String>())
        .await;
    bus.subscribe(&client, job.id).await;
    manager.start(&job.id).await.unwrap();
    wait_for_state(&manager, &job.id, JobState::Completed).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let kinds: Vec<String> = drain_events(&mut rx)
        .into_iter()
        .map(|e| e["type"].as_str().unwrap().to_string())
        .collect();

    let created = kinds.iter().position(|k| k == "job:created").unwrap();
    let started = kinds.iter().position(|k| k == "job:started").unwrap();
    let completed = kinds.iter().position(|k| k == "job:completed").unwrap();
    assert!(created < started);
    assert!(started < completed);
    for (i, kind) in kinds.iter().enumerate() {
        if kind == "job:progress" {
            assert!(i > started);
            assert!(i < completed);
        }
    }
}

#[tokio::test]
async fn upload_and_run_a_stored_program() {
    let transport = ControllerTransport::simulated_with_delay(Duration::ZERO);
    transport
        .upload_file("STARS~1.GCO", THREE_STAR)
        .await
        .unwrap();
    transport.run_file("STARS~1.GCO").await.unwrap();
    let files = transport.list_files().await.unwrap();
    assert!(!files.is_empty());
}
