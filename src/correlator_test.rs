use std::sync::{Arc, Mutex};

use frames::{Args, EventKind};
use serde_json::json;

use super::*;

fn correlator() -> (Correlator, Arc<Diagnostics>) {
    let diagnostics = Arc::new(Diagnostics::default());
    (Correlator::new(Arc::clone(&diagnostics)), diagnostics)
}

fn progress(id: u64, value: f64) -> Inbound {
    let mut data = Args::new();
    data.insert("progress".to_owned(), json!(value));
    Inbound::Event(Event::new(id, EventKind::Progress, data))
}

fn recording_sink() -> (Box<dyn EventSink>, Arc<Mutex<Vec<f64>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);
    let sink = move |event: &Event| {
        sink_seen
            .lock()
            .expect("lock")
            .push(event.progress().unwrap_or(-1.0));
    };
    (Box::new(sink), seen)
}

// =============================================================================
// register / retire
// =============================================================================

#[test]
fn register_rejects_duplicate_id() {
    let (correlator, _) = correlator();
    let _first = correlator.register(1).expect("first");
    let err = correlator.register(1).expect_err("duplicate");
    assert!(matches!(err, ClientError::DuplicateId(1)));
    assert_eq!(correlator.pending_count(), 1);
}

#[test]
fn retire_removes_entry_once() {
    let (correlator, _) = correlator();
    let _rx = correlator.register(3).expect("register");
    assert!(correlator.retire(3));
    assert!(!correlator.retire(3));
    assert_eq!(correlator.pending_count(), 0);
}

#[test]
fn id_can_be_registered_again_after_retire() {
    let (correlator, _) = correlator();
    let _rx = correlator.register(4).expect("register");
    correlator.retire(4);
    assert!(correlator.register(4).is_ok());
}

// =============================================================================
// route: responses
// =============================================================================

#[test]
fn response_settles_only_its_own_id() {
    let (correlator, diagnostics) = correlator();
    let mut one = correlator.register(1).expect("register");
    let mut two = correlator.register(2).expect("register");

    correlator.route(Inbound::Response(Response::ok(2, json!("second"))));

    let settled = two.try_recv().expect("settled").expect("ok");
    assert_eq!(settled.result, Some(json!("second")));
    assert!(one.try_recv().is_err());
    // Retirement is the waiter's job.
    assert_eq!(correlator.pending_count(), 2);
    assert_eq!(diagnostics.snapshot().responses_routed, 1);
}

#[test]
fn unknown_response_is_discarded_and_counted() {
    let (correlator, diagnostics) = correlator();
    let mut rx = correlator.register(1).expect("register");

    correlator.route(Inbound::Response(Response::ok(99, json!(null))));

    assert!(rx.try_recv().is_err());
    assert_eq!(diagnostics.snapshot().unknown_responses, 1);
}

#[test]
fn second_response_for_same_id_is_counted_as_duplicate() {
    let (correlator, diagnostics) = correlator();
    let mut rx = correlator.register(1).expect("register");

    correlator.route(Inbound::Response(Response::ok(1, json!("first"))));
    correlator.route(Inbound::Response(Response::ok(1, json!("second"))));

    let settled = rx.try_recv().expect("settled").expect("ok");
    assert_eq!(settled.result, Some(json!("first")));
    let snapshot = diagnostics.snapshot();
    assert_eq!(snapshot.responses_routed, 1);
    assert_eq!(snapshot.duplicate_responses, 1);
    assert_eq!(snapshot.unknown_responses, 0);
}

#[test]
fn response_after_retire_is_discarded() {
    let (correlator, diagnostics) = correlator();
    let _rx = correlator.register(1).expect("register");
    correlator.retire(1);

    correlator.route(Inbound::Response(Response::ok(1, json!("late"))));
    let snapshot = diagnostics.snapshot();
    assert_eq!(snapshot.unknown_responses, 1);
    assert_eq!(snapshot.duplicate_responses, 0);
}

// =============================================================================
// route: events
// =============================================================================

#[test]
fn events_reach_sink_in_arrival_order() {
    let (correlator, diagnostics) = correlator();
    let _rx = correlator.register(1).expect("register");
    let (sink, seen) = recording_sink();
    assert!(correlator.register_event_sink(1, sink));

    correlator.route(progress(1, 0.3));
    correlator.route(progress(1, 0.6));
    correlator.route(progress(1, 1.0));

    assert_eq!(*seen.lock().expect("lock"), vec![0.3, 0.6, 1.0]);
    assert_eq!(diagnostics.snapshot().events_delivered, 3);
}

#[test]
fn event_without_sink_is_discarded() {
    let (correlator, diagnostics) = correlator();
    let _rx = correlator.register(1).expect("register");

    correlator.route(progress(1, 0.5));
    correlator.route(progress(42, 0.5));

    assert_eq!(diagnostics.snapshot().orphan_events, 2);
}

#[test]
fn sink_registration_after_retire_is_a_noop() {
    let (correlator, _) = correlator();
    let _rx = correlator.register(1).expect("register");
    correlator.retire(1);

    let (sink, seen) = recording_sink();
    assert!(!correlator.register_event_sink(1, sink));
    correlator.route(progress(1, 0.5));
    assert!(seen.lock().expect("lock").is_empty());
}

#[test]
fn panicking_sink_does_not_stop_routing() {
    let (correlator, diagnostics) = correlator();
    let _bad_rx = correlator.register(1).expect("register");
    let mut good_rx = correlator.register(2).expect("register");
    let bad: Box<dyn EventSink> = Box::new(|event: &Event| {
        if event.id == 1 {
            panic!("sink failure");
        }
    });
    correlator.register_event_sink(1, bad);
    let (good, seen) = recording_sink();
    correlator.register_event_sink(2, good);

    correlator.route(progress(1, 0.1));
    correlator.route(progress(1, 0.2));
    correlator.route(progress(2, 0.9));
    correlator.route(Inbound::Response(Response::ok(2, json!("done"))));

    assert_eq!(*seen.lock().expect("lock"), vec![0.9]);
    assert!(good_rx.try_recv().expect("settled").is_ok());
    assert_eq!(diagnostics.snapshot().sink_panics, 2);
}

#[tokio::test]
async fn channel_sink_forwards_events() {
    let (correlator, _) = correlator();
    let _rx = correlator.register(5).expect("register");
    let (tx, mut events) = mpsc::unbounded_channel();
    correlator.register_event_sink(5, Box::new(channel_sink(tx)));

    correlator.route(progress(5, 0.25));

    let event = events.recv().await.expect("event");
    assert_eq!(event.id, 5);
    assert_eq!(event.progress(), Some(0.25));
}

// =============================================================================
// fail_all
// =============================================================================

#[test]
fn fail_all_settles_every_pending_slot_once() {
    let (correlator, _) = correlator();
    let mut one = correlator.register(1).expect("register");
    let mut two = correlator.register(2).expect("register");
    let mut three = correlator.register(3).expect("register");
    correlator.route(Inbound::Response(Response::ok(3, json!("early"))));

    assert_eq!(correlator.fail_all(), 2);
    assert_eq!(correlator.fail_all(), 0);

    for rx in [&mut one, &mut two] {
        let err = rx.try_recv().expect("settled").expect_err("lost");
        assert!(matches!(err, ClientError::ConnectionLost));
    }
    assert!(three.try_recv().expect("settled").is_ok());
}

#[test]
fn register_after_fail_all_reports_connection_lost() {
    let (correlator, _) = correlator();
    correlator.fail_all();
    assert!(correlator.is_closed());
    assert!(matches!(
        correlator.register(1),
        Err(ClientError::ConnectionLost)
    ));
}
