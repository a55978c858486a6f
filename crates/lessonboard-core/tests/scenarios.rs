//! End-to-end behavior of a board session against scripted transports.

use kurbo::{Point, Rect, Vec2};
use lessonboard_core::conflict::ConflictResolver;
use lessonboard_core::dirty::DirtyRegionTracker;
use lessonboard_core::protocol::{ClientMessage, ServerMessage, StateResponse, WireOperation};
use lessonboard_core::reconciler::{Delivery, SequenceReconciler};
use lessonboard_core::scene::SceneStore;
use lessonboard_core::shapes::{BoardColor, stroke_id};
use lessonboard_core::transport::{FetchError, StateSource, StatusIndicator, Transport, TransportError, TransportEvent};
use lessonboard_core::{
    BoardConfig, BoardEvent, BoardSession, CANVAS_EXTENT, ConflictStrategy, NoticeLevel, Operation, Origin, Role,
    RoleDirectory, SessionContext,
};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Transport whose connection outcomes are scripted per dial.
#[derive(Default)]
struct ScriptedTransport {
    open: bool,
    /// `true` opens, `false` fails; an empty script opens.
    outcomes: VecDeque<bool>,
    inbox: VecDeque<TransportEvent>,
    sent: Vec<ClientMessage>,
    dials: usize,
}

impl ScriptedTransport {
    fn with_outcomes(outcomes: &[bool]) -> Self {
        Self {
            outcomes: outcomes.iter().copied().collect(),
            ..Self::default()
        }
    }

    fn drop_connection(&mut self) {
        self.open = false;
        self.inbox.push_back(TransportEvent::Closed);
    }

    fn deliver(&mut self, message: ServerMessage) {
        self.inbox.push_back(TransportEvent::Message(message));
    }

    fn batches(&self) -> Vec<&ClientMessage> {
        self.sent
            .iter()
            .filter(|m| matches!(m, ClientMessage::Batch { .. }))
            .collect()
    }

    /// Play the server: stamp sent batch operations and echo them back.
    fn relay(&mut self, next_seq: &mut u64) {
        for message in std::mem::take(&mut self.sent) {
            if let ClientMessage::Batch { operations, .. } = message {
                for mut wire in operations {
                    *next_seq += 1;
                    wire.sequence_number = *next_seq;
                    self.deliver(ServerMessage::for_operation(wire));
                }
            }
        }
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self, _url: &str) -> Result<(), TransportError> {
        self.dials += 1;
        if self.outcomes.pop_front().unwrap_or(true) {
            self.open = true;
            self.inbox.push_back(TransportEvent::Opened);
        } else {
            self.inbox.push_back(TransportEvent::Failed("connection refused".into()));
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.open = false;
    }

    fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        self.sent.push(message.clone());
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        self.inbox.drain(..).collect()
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[derive(Default)]
struct FakeStateSource {
    requests: usize,
    in_flight: bool,
    response: Option<StateResponse>,
}

impl StateSource for FakeStateSource {
    fn request_state(&mut self, _lesson_id: &str) {
        self.requests += 1;
        self.in_flight = true;
    }

    fn poll_state(&mut self) -> Option<Result<StateResponse, FetchError>> {
        if !self.in_flight {
            return None;
        }
        self.in_flight = false;
        Some(self.response.clone().ok_or(FetchError::Status(503)))
    }

    fn in_flight(&self) -> bool {
        self.in_flight
    }
}

fn session_with(config: BoardConfig) -> BoardSession {
    let _ = env_logger::builder().is_test(true).try_init();
    let ctx = SessionContext::new("lesson-1", "teacher-1", "Grace", Role::Teacher, config).with_client_id("client-a");
    BoardSession::new(ctx)
}

fn peer() -> Origin {
    Origin::new("client-b", "student-1", "Alan")
}

fn peer_op(op: Operation, seq: u64) -> Operation {
    op.with_origin(peer()).with_sequence(seq)
}

fn at(t0: Instant, ms: u64) -> Instant {
    t0 + Duration::from_millis(ms)
}

fn indicators(events: &[BoardEvent]) -> Vec<StatusIndicator> {
    let mut out: Vec<StatusIndicator> = Vec::new();
    for event in events {
        if let BoardEvent::StatusChanged { indicator, .. } = event {
            if out.last() != Some(indicator) {
                out.push(*indicator);
            }
        }
    }
    out
}

#[test]
fn test_scenario_a_local_stroke_round_trip() {
    let mut session = session_with(BoardConfig::default());
    let mut transport = ScriptedTransport::default();
    let mut state = FakeStateSource::default();
    let t0 = Instant::now();
    let red = BoardColor::from_hex("#ff0000").unwrap();

    session.start(&mut transport, &mut state, t0);
    session.tick(t0, &mut transport, &mut state);

    session.submit(Operation::start(Point::new(10.0, 10.0)).with_style(red, 3.0)).unwrap();
    session.submit(Operation::draw(Point::new(20.0, 20.0)).with_style(red, 3.0)).unwrap();
    session.submit(Operation::end().with_style(red, 3.0)).unwrap();
    session.tick(at(t0, 20), &mut transport, &mut state);
    assert_eq!(transport.batches().len(), 1);

    let mut seq = 0;
    transport.relay(&mut seq);
    session.tick(at(t0, 40), &mut transport, &mut state);

    let scene = session.scene();
    assert_eq!(scene.len(), 1);
    let stroke = scene.iter().next().and_then(|o| o.as_stroke()).unwrap();
    assert_eq!(stroke.points(), &[Point::new(10.0, 10.0), Point::new(20.0, 20.0)]);
    assert_eq!(stroke.color, red);
    assert_eq!(session.predictive().pending_len(), 0);
    assert!(session.batcher().is_idle());
    assert_eq!(session.last_applied_sequence(), 3);
}

#[test]
fn test_scenario_b_intelligent_merge_keeps_both() {
    let run = || {
        let mut session = session_with(BoardConfig::default());
        let local = Operation::draw(Point::new(100.0, 100.0))
            .with_style(BoardColor::black(), 5.0)
            .with_timestamp(1_000);
        session.submit(local).unwrap();
        let remote = peer_op(
            Operation::draw(Point::new(101.0, 101.0))
                .with_style(BoardColor::black(), 5.0)
                .with_timestamp(1_200),
            1,
        );
        session.ingest(vec![remote], Delivery::Push);

        assert_eq!(session.view().len(), 2, "both strokes stay visible");
        assert_eq!(session.stats().conflicts_resolved, 1);
        let theirs = session.scene().iter().next().and_then(|o| o.as_stroke()).unwrap();
        theirs.points().to_vec()
    };
    let first = run();
    // The later stroke moves by the merge offset, away from the local one.
    assert_eq!(first, vec![Point::new(104.0, 104.0)]);
    assert_eq!(first, run());
}

#[test]
fn test_scenario_c_out_of_order_snapshot() {
    let mut session = session_with(BoardConfig::default());
    let ops: Vec<WireOperation> = [5, 3, 7]
        .into_iter()
        .map(|seq| {
            let p = Point::new(seq as f64 * 10.0, 50.0);
            let op = peer_op(Operation::complete_stroke(vec![p, p + Vec2::new(5.0, 5.0)]), seq);
            WireOperation::from(&op)
        })
        .collect();
    session.handle_server_message(ServerMessage::BoardState {
        operations: ops,
        total_operations: 3,
        connected_users: 2,
    });

    let expected: Vec<_> = [3, 5, 7].into_iter().map(|seq| stroke_id("client-b", seq)).collect();
    assert_eq!(session.scene().ids(), expected.as_slice());
    assert_eq!(session.last_applied_sequence(), 7);
}

#[test]
fn test_scenario_d_clear_collapses_dirty_regions() {
    let mut session = session_with(BoardConfig::default());
    for i in 0..10u64 {
        let p = Point::new(i as f64 * 1_000.0 + 10.0, 10.0);
        session.ingest(
            vec![peer_op(Operation::complete_stroke(vec![p, p + Vec2::new(5.0, 0.0)]), i + 1)],
            Delivery::Push,
        );
    }
    assert_eq!(session.dirty().len(), 10);

    session.ingest(vec![peer_op(Operation::clear(), 11)], Delivery::Push);
    assert!(session.dirty().is_full());
    assert!(session.scene().is_empty());

    let pass = session.next_frame().unwrap();
    assert!(pass.is_full());
    drop(pass);
    assert!(session.next_frame().is_none(), "redrawn exactly once");
    assert!(session.dirty().is_empty());
    assert!(
        session
            .drain_events()
            .iter()
            .any(|e| matches!(e, BoardEvent::BoardCleared { by } if by == "Alan"))
    );
}

#[test]
fn test_scenario_e_reconnect_without_losing_batches() {
    let mut session = session_with(BoardConfig::default());
    // Initial connect, one refused reconnect, then success.
    let mut transport = ScriptedTransport::with_outcomes(&[true, false, true]);
    let mut state = FakeStateSource::default();
    let t0 = Instant::now();

    session.start(&mut transport, &mut state, t0);
    session.tick(t0, &mut transport, &mut state);

    session.submit(Operation::start(Point::new(1.0, 1.0))).unwrap();
    session.submit(Operation::draw(Point::new(9.0, 9.0))).unwrap();
    session.submit(Operation::end()).unwrap();
    transport.drop_connection();

    for step in 1..=40 {
        session.tick(at(t0, step * 100), &mut transport, &mut state);
    }

    let events = session.drain_events();
    assert_eq!(
        indicators(&events),
        vec![
            StatusIndicator::Connecting,
            StatusIndicator::Connected,
            StatusIndicator::Disconnected,
            StatusIndicator::Connecting,
            StatusIndicator::Disconnected,
            StatusIndicator::Connecting,
            StatusIndicator::Connected,
        ]
    );
    assert_eq!(transport.dials, 3);
    assert_eq!(session.stats().batches_discarded, 0);

    let batches = transport.batches();
    assert_eq!(batches.len(), 1);
    assert!(matches!(batches[0], ClientMessage::Batch { operations, .. } if operations.len() == 3));

    let mut seq = 0;
    transport.relay(&mut seq);
    session.tick(at(t0, 4_100), &mut transport, &mut state);
    assert_eq!(session.scene().len(), 1);
    assert!(session.batcher().is_idle());
}

#[test]
fn test_queued_batches_survive_a_long_outage() {
    let mut session = session_with(BoardConfig::default());
    // Two refused reconnects: the channel is back only after about 7 s.
    let mut transport = ScriptedTransport::with_outcomes(&[true, false, false, true]);
    let mut state = FakeStateSource::default();
    let t0 = Instant::now();

    session.start(&mut transport, &mut state, t0);
    session.tick(t0, &mut transport, &mut state);
    transport.sent.clear();

    session.submit(Operation::start(Point::new(1.0, 1.0))).unwrap();
    session.submit(Operation::draw(Point::new(9.0, 9.0))).unwrap();
    session.submit(Operation::end()).unwrap();
    transport.drop_connection();

    for step in 1..=120 {
        session.tick(at(t0, step * 100), &mut transport, &mut state);
    }

    assert_eq!(transport.dials, 4);
    assert!(session.status().is_connected());
    assert_eq!(session.stats().batches_discarded, 0);
    assert_eq!(session.predictive().pending_len(), 3);
    let batches = transport.batches();
    assert_eq!(batches.len(), 1);
    assert!(matches!(batches[0], ClientMessage::Batch { operations, .. } if operations.len() == 3));

    let mut seq = 0;
    transport.relay(&mut seq);
    session.tick(at(t0, 12_100), &mut transport, &mut state);
    assert_eq!(session.scene().len(), 1);
    assert!(session.batcher().is_idle());
}

#[test]
fn test_malformed_entry_in_snapshot_keeps_the_rest() {
    let mut session = session_with(BoardConfig::default());
    let p = Point::new(10.0, 10.0);
    let good = serde_json::to_value(WireOperation::from(&peer_op(
        Operation::complete_stroke(vec![p, p + Vec2::new(5.0, 5.0)]),
        1,
    )))
    .unwrap();
    let text = serde_json::json!({
        "type": "board_state",
        "operations": [
            good,
            {"operationType": "draw", "x": 20, "y": 20, "brushSize": "3", "sequenceNumber": 2},
            {"operationType": "draw", "x": 30, "y": 30, "userId": 42, "sequenceNumber": 3},
        ],
        "totalOperations": 3,
        "connectedUsers": 2,
    })
    .to_string();
    session.handle_server_message(ServerMessage::from_json(&text).unwrap());
    assert_eq!(session.scene().len(), 1);
    assert_eq!(session.stats().malformed_dropped, 2);

    // Same over REST.
    let mut session = session_with(BoardConfig::default());
    let body = serde_json::json!({
        "success": true,
        "totalOperations": 2,
        "operations": [good, {"operationType": "erase", "x": 1, "y": 1, "timestamp": "soon"}],
    })
    .to_string();
    let response: StateResponse = serde_json::from_str(&body).unwrap();
    let mut state = FakeStateSource {
        response: Some(response),
        ..FakeStateSource::default()
    };
    let mut transport = ScriptedTransport::default();
    session.start(&mut transport, &mut state, Instant::now());
    session.tick(Instant::now(), &mut transport, &mut state);
    assert_eq!(session.scene().len(), 1);
    assert_eq!(session.stats().malformed_dropped, 1);
}

#[test]
fn test_discarded_batch_warns_and_withdraws() {
    let mut config = BoardConfig::default();
    config.reconnect.max_attempts = 2;
    config.reconnect.base_delay_ms = 100;
    let mut session = session_with(config);
    let mut transport = ScriptedTransport::with_outcomes(&[false; 8]);
    let mut state = FakeStateSource::default();
    let t0 = Instant::now();

    session.start(&mut transport, &mut state, t0);
    session.submit(Operation::erase(Point::new(5.0, 5.0))).unwrap();
    for step in 0..=50 {
        session.tick(at(t0, step * 100), &mut transport, &mut state);
    }

    assert_eq!(session.stats().batches_discarded, 1);
    assert_eq!(session.predictive().pending_len(), 0);
    assert!(session.drain_events().iter().any(|e| matches!(
        e,
        BoardEvent::Notice {
            level: NoticeLevel::Warning,
            ..
        }
    )));
}

#[test]
fn test_fallback_polling_after_reconnects_exhausted() {
    let mut config = BoardConfig::default();
    config.reconnect.max_attempts = 2;
    config.reconnect.base_delay_ms = 100;
    config.fallback_poll_ms = 1_000;
    let mut session = session_with(config);
    let mut transport = ScriptedTransport::with_outcomes(&[false; 8]);
    let p = Point::new(3.0, 4.0);
    let mut state = FakeStateSource {
        response: Some(StateResponse {
            success: true,
            total_operations: 1,
            operations: vec![WireOperation::from(&peer_op(Operation::complete_stroke(vec![p, p + Vec2::new(1.0, 1.0)]), 1))],
            message: None,
        }),
        ..FakeStateSource::default()
    };
    let t0 = Instant::now();

    session.start(&mut transport, &mut state, t0);
    assert_eq!(state.requests, 1, "page load pulls state right away");
    for step in 0..=40 {
        session.tick(at(t0, step * 100), &mut transport, &mut state);
    }

    assert_eq!(session.status().indicator(), StatusIndicator::Disconnected);
    assert!(state.requests >= 3, "polled {} times", state.requests);
    assert_eq!(session.scene().len(), 1);
    assert_eq!(session.last_applied_sequence(), 1);
}

#[test]
fn test_gap_resync_rebuilds_from_board_state() {
    let mut session = session_with(BoardConfig::default());
    let mut transport = ScriptedTransport::default();
    let mut state = FakeStateSource::default();
    let t0 = Instant::now();
    session.start(&mut transport, &mut state, t0);
    session.tick(t0, &mut transport, &mut state);
    transport.sent.clear();

    let p = Point::new(10.0, 10.0);
    transport.deliver(ServerMessage::for_operation(WireOperation::from(&peer_op(
        Operation::complete_stroke(vec![p, p + Vec2::new(1.0, 0.0)]),
        20,
    ))));
    session.tick(at(t0, 10), &mut transport, &mut state);
    assert!(session.scene().is_empty());
    assert!(
        transport
            .sent
            .iter()
            .any(|m| matches!(m, ClientMessage::RequestState { .. }))
    );

    let log: Vec<WireOperation> = (1..=20)
        .map(|seq| {
            let p = Point::new(seq as f64 * 20.0, 10.0);
            WireOperation::from(&peer_op(Operation::complete_stroke(vec![p, p + Vec2::new(1.0, 0.0)]), seq))
        })
        .collect();
    transport.deliver(ServerMessage::BoardState {
        operations: log,
        total_operations: 20,
        connected_users: 2,
    });
    session.tick(at(t0, 20), &mut transport, &mut state);
    assert_eq!(session.scene().len(), 20);
    assert_eq!(session.last_applied_sequence(), 20);
    assert_eq!(session.stats().resyncs, 1);
}

#[test]
fn test_malformed_operations_never_reach_scene() {
    let mut session = session_with(BoardConfig::default());
    let mut bad = WireOperation::from(&peer_op(Operation::draw(Point::new(1.0, 1.0)), 1));
    bad.x = serde_json::json!("left");
    let mut out_of_range = WireOperation::from(&peer_op(Operation::draw(Point::new(1.0, 1.0)), 2));
    out_of_range.y = serde_json::json!(CANVAS_EXTENT + 1.0);
    let good = WireOperation::from(&peer_op(Operation::draw(Point::new(2.0, 2.0)), 3));
    session.handle_server_message(ServerMessage::BoardState {
        operations: vec![bad, out_of_range, good],
        total_operations: 3,
        connected_users: 1,
    });
    assert_eq!(session.stats().malformed_dropped, 2);
    assert_eq!(session.scene().len(), 1);
}

#[test]
fn test_property_idempotent_replay() {
    let log: Vec<Operation> = vec![
        peer_op(Operation::start(Point::new(1.0, 1.0)), 1),
        peer_op(Operation::draw(Point::new(2.0, 3.0)), 2),
        peer_op(Operation::end(), 3),
        peer_op(Operation::complete_stroke(vec![Point::new(50.0, 50.0), Point::new(60.0, 60.0)]), 4),
        peer_op(Operation::erase(Point::new(55.0, 55.0)), 5),
        peer_op(Operation::start(Point::new(7.0, 7.0)), 6),
        peer_op(Operation::draw(Point::new(8.0, 8.0)), 7),
    ];
    let build = || {
        let mut scene = SceneStore::new(CANVAS_EXTENT);
        scene.rebuild(log.iter());
        scene
    };
    let (a, b) = (build(), build());
    assert_eq!(a.ids(), b.ids());
    assert_eq!(a.len(), 2);

    // Replaying through the reconciler a second time changes nothing.
    let mut scene = SceneStore::new(CANVAS_EXTENT);
    let mut reconciler = SequenceReconciler::new(3);
    reconciler.reconcile(log.clone(), Delivery::Snapshot, &mut scene);
    let report = reconciler.reconcile(log.clone(), Delivery::Push, &mut scene);
    assert_eq!(report.applied, 0);
    assert_eq!(report.duplicates, log.len());
    assert_eq!(scene.ids(), a.ids());
}

#[test]
fn test_property_sequence_monotonicity() {
    let mut scene = SceneStore::new(CANVAS_EXTENT);
    let mut reconciler = SequenceReconciler::new(3);
    let mk = |seq: u64| peer_op(Operation::complete_stroke(vec![Point::new(seq as f64, 1.0)]), seq);
    reconciler.reconcile(vec![mk(2), mk(1)], Delivery::Push, &mut scene);
    assert_eq!(scene.ids(), &[stroke_id("client-b", 1), stroke_id("client-b", 2)]);
    let report = reconciler.reconcile(vec![mk(2), mk(3)], Delivery::Push, &mut scene);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.applied, 1);
    assert_eq!(reconciler.last_applied(), 3);
}

#[test]
fn test_property_conflict_determinism() {
    let incoming = peer_op(Operation::draw(Point::new(10.0, 10.0)).with_style(BoardColor::black(), 6.0), 9)
        .with_timestamp(5_000);
    let local = Operation::draw(Point::new(11.0, 10.0))
        .with_style(BoardColor::black(), 6.0)
        .with_origin(Origin::new("client-a", "teacher-1", "Grace"))
        .with_sequence(4)
        .with_timestamp(5_000);
    let mut roles = RoleDirectory::new();
    roles.set("teacher-1", Role::Teacher);
    for strategy in [
        ConflictStrategy::LastWriterWins,
        ConflictStrategy::TimestampPriority,
        ConflictStrategy::UserPriority,
        ConflictStrategy::IntelligentMerge,
    ] {
        let outcomes: Vec<_> = (0..5)
            .map(|_| {
                let mut resolver = ConflictResolver::new(strategy, 1_000, 3.0, CANVAS_EXTENT);
                resolver.resolve(&incoming, &local, &roles)
            })
            .collect();
        assert!(outcomes.windows(2).all(|w| w[0] == w[1]), "{strategy} is not deterministic");
    }
}

#[test]
fn test_property_dirty_region_coverage() {
    let mut scene = SceneStore::new(CANVAS_EXTENT);
    let ops = vec![
        peer_op(Operation::start(Point::new(100.0, 100.0)).with_style(BoardColor::black(), 8.0), 1),
        peer_op(Operation::draw(Point::new(300.0, 120.0)).with_style(BoardColor::black(), 8.0), 2),
        peer_op(Operation::draw(Point::new(310.0, 400.0)).with_style(BoardColor::black(), 8.0), 3),
        peer_op(Operation::end(), 4),
        peer_op(Operation::complete_stroke(vec![Point::new(5.0, 5.0), Point::new(9.0, 2.0)]), 5),
        peer_op(Operation::erase(Point::new(6.0, 4.0)).with_style(BoardColor::black(), 20.0), 6),
    ];
    for op in &ops {
        let before: Vec<Rect> = scene.iter().map(|o| o.bounds()).collect();
        let change = scene.apply_operation(op);
        let mut tracker = DirtyRegionTracker::new(50);
        for rect in &change.dirty {
            tracker.invalidate(*rect);
        }
        let regions = tracker.take();
        for id in &change.touched {
            let bounds = scene.get(id).map(|o| o.bounds()).unwrap();
            assert!(regions.covers(bounds), "op #{} left {bounds:?} uncovered", op.sequence_number);
        }
        if !change.removed.is_empty() {
            for bounds in before.iter().filter(|b| !scene.iter().any(|o| o.bounds() == **b)) {
                assert!(regions.covers(*bounds));
            }
        }
    }
}

#[test]
fn test_property_boundary_coordinates() {
    let accepts = |x: f64, y: f64| Operation::draw(Point::new(x, y)).validate(CANVAS_EXTENT).is_ok();
    assert!(accepts(0.0, 0.0));
    assert!(accepts(CANVAS_EXTENT, CANVAS_EXTENT));
    assert!(!accepts(-1.0, 0.0));
    assert!(!accepts(CANVAS_EXTENT + 1.0, 0.0));

    let mut wire = WireOperation::from(&peer_op(Operation::draw(Point::new(1.0, 1.0)), 1));
    wire.x = serde_json::json!("20000");
    assert!(wire.clone().into_operation(CANVAS_EXTENT).is_ok());
    wire.x = serde_json::json!(-1);
    assert!(wire.into_operation(CANVAS_EXTENT).is_err());
}
