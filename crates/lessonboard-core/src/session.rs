//! The board session: one lesson, one local user, every component wired in
//! dependency order.
//!
//! All effects happen inside explicit calls. Local input goes through
//! [`BoardSession::pointer`] or [`BoardSession::submit`], network effects
//! through [`BoardSession::tick`], and drawing through
//! [`BoardSession::next_frame`]. Each mutation invalidates the regions it
//! touched and schedules a frame.

use crate::batcher::{BatchEvent, BatcherSettings, OperationBatcher};
use crate::camera::Camera;
use crate::config::BoardConfig;
use crate::conflict::{ConflictResolver, MergeTarget, Resolution, Role, RoleDirectory};
use crate::dirty::{DirtyRegionTracker, DirtyRegions};
use crate::events::{BoardEvent, EventBus, NoticeLevel};
use crate::frame::FrameScheduler;
use crate::operation::{Operation, OperationError, OperationKind, Origin, now_millis};
use crate::predictive::{PredictiveApplier, SceneView};
use crate::protocol::{ClientMessage, ServerMessage, StateResponse, WireOperation, decode_operations};
use crate::reconciler::{Delivery, ReconcileReport, ReconcileTarget, SequenceReconciler};
use crate::scene::{SceneChange, SceneStore};
use crate::shapes::SceneObject;
use crate::tools::{ToolController, ToolEvent, ToolKind};
use crate::transport::{
    ConnectionManager, ConnectionStatus, FetchError, ReconnectPolicy, StateSource, Transport, TransportEvent,
    lesson_url,
};
use crate::viewport::ViewportCuller;
use kurbo::{Point, Size, Vec2};
use std::time::Instant;
use uuid::Uuid;

/// Who is drawing, in which lesson, with which settings.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub lesson_id: String,
    pub user_id: String,
    pub user_name: String,
    pub role: Role,
    /// Random per connection, so two tabs of one user stay distinct.
    pub client_id: String,
    pub config: BoardConfig,
}

impl SessionContext {
    pub fn new(
        lesson_id: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        role: Role,
        config: BoardConfig,
    ) -> Self {
        Self {
            lesson_id: lesson_id.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            role,
            client_id: Uuid::new_v4().to_string(),
            config,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn origin(&self) -> Origin {
        Origin::new(&self.client_id, &self.user_id, &self.user_name)
    }
}

/// Running counters, mostly for diagnostics and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub operations_applied: u64,
    pub duplicates_dropped: u64,
    pub deferred_dropped: u64,
    pub malformed_dropped: u64,
    pub conflicts_resolved: u64,
    pub batches_sent: u64,
    pub batches_discarded: u64,
    pub resyncs: u64,
    pub state_fetch_failures: u64,
}

/// Everything a renderer needs for one pass.
pub struct RenderPass<'a> {
    pub view: SceneView<'a>,
    pub regions: DirtyRegions,
    pub culler: &'a ViewportCuller,
    pub camera: Camera,
    pub viewport: Size,
    /// Local-only figure being dragged.
    pub preview: Option<&'a SceneObject>,
}

impl RenderPass<'_> {
    pub fn is_full(&self) -> bool {
        self.regions.is_full()
    }
}

pub struct BoardSession {
    ctx: SessionContext,
    scene: SceneStore,
    predictive: PredictiveApplier,
    batcher: OperationBatcher,
    reconciler: SequenceReconciler,
    resolver: ConflictResolver,
    roles: RoleDirectory,
    dirty: DirtyRegionTracker,
    culler: ViewportCuller,
    camera: Camera,
    viewport: Size,
    frames: FrameScheduler,
    connection: ConnectionManager,
    tools: ToolController,
    preview: Option<SceneObject>,
    events: EventBus,
    stats: SessionStats,
    pending_cursor: Option<Point>,
    resync_wanted: bool,
    last_fallback_poll: Option<Instant>,
    lesson_ended: bool,
}

impl BoardSession {
    pub fn new(ctx: SessionContext) -> Self {
        let config = &ctx.config;
        let extent = config.canvas_extent;
        let mut roles = RoleDirectory::new();
        roles.set(ctx.user_id.clone(), ctx.role);
        Self {
            scene: SceneStore::new(extent),
            predictive: PredictiveApplier::new(extent),
            batcher: OperationBatcher::new(BatcherSettings::from(config)),
            reconciler: SequenceReconciler::new(config.gap_tolerance),
            resolver: ConflictResolver::new(
                config.conflict_strategy,
                config.conflict_window_ms,
                config.merge_offset,
                extent,
            ),
            roles,
            dirty: DirtyRegionTracker::new(config.dirty_region_ceiling),
            culler: ViewportCuller::new(config.cull_margin),
            camera: Camera::new(),
            viewport: Size::new(1280.0, 720.0),
            frames: FrameScheduler::new(),
            connection: ConnectionManager::new(
                lesson_url(&config.realtime_url, &ctx.lesson_id),
                ReconnectPolicy::from(&config.reconnect),
            ),
            tools: ToolController::new(extent),
            preview: None,
            events: EventBus::new(),
            stats: SessionStats::default(),
            pending_cursor: None,
            resync_wanted: false,
            last_fallback_poll: None,
            lesson_ended: false,
            ctx,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Confirmed board state, in server order.
    pub fn scene(&self) -> &SceneStore {
        &self.scene
    }

    pub fn predictive(&self) -> &PredictiveApplier {
        &self.predictive
    }

    /// What the user sees: confirmed state plus pending local edits.
    pub fn view(&self) -> SceneView<'_> {
        SceneView::new(&self.scene, &self.predictive)
    }

    pub fn batcher(&self) -> &OperationBatcher {
        &self.batcher
    }

    pub fn last_applied_sequence(&self) -> u64 {
        self.reconciler.last_applied()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn dirty(&self) -> &DirtyRegionTracker {
        &self.dirty
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn roles(&self) -> &RoleDirectory {
        &self.roles
    }

    pub fn tools(&self) -> &ToolController {
        &self.tools
    }

    pub fn tools_mut(&mut self) -> &mut ToolController {
        &mut self.tools
    }

    pub fn frame_pending(&self) -> bool {
        self.frames.is_pending()
    }

    pub fn drain_events(&mut self) -> Vec<BoardEvent> {
        self.events.drain()
    }

    fn publish_status(&mut self, changed: Option<ConnectionStatus>) {
        if let Some(status) = changed {
            self.events.publish(BoardEvent::StatusChanged {
                status,
                indicator: status.indicator(),
            });
        }
    }

    /// Pull the board over REST and open the realtime channel.
    pub fn start<T, S>(&mut self, transport: &mut T, state_source: &mut S, now: Instant)
    where
        T: Transport + ?Sized,
        S: StateSource + ?Sized,
    {
        state_source.request_state(&self.ctx.lesson_id);
        let changed = self.connection.start(transport, now);
        self.publish_status(changed);
    }

    /// Send `leave` and close the channel for good.
    pub fn leave<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        if self.connection.status().is_connected() {
            let leave = ClientMessage::Leave {
                user_id: self.ctx.user_id.clone(),
                user_name: self.ctx.user_name.clone(),
                timestamp: now_millis(),
            };
            if let Err(e) = transport.send(&leave) {
                log::debug!("leave not delivered: {e}");
            }
        }
        let changed = self.connection.shutdown(transport);
        self.publish_status(changed);
    }

    /// Stamp, apply locally and queue a local operation. Returns its
    /// client sequence.
    pub fn submit(&mut self, op: Operation) -> Result<u64, OperationError> {
        op.validate(self.ctx.config.canvas_extent)?;
        let seq = self.batcher.next_sequence(self.reconciler.last_applied());
        let op = op.with_origin(self.ctx.origin()).with_sequence(seq);
        let change = self.predictive.apply_local(op.clone(), &self.scene);
        self.invalidate(change);
        if self.batcher.add_operation(op) {
            log::debug!("batch full at sequence {seq}");
        }
        Ok(seq)
    }

    pub fn clear_board(&mut self) -> Result<u64, OperationError> {
        self.submit(Operation::clear())
    }

    pub fn set_tool(&mut self, tool: ToolKind) {
        let output = self.tools.set_tool(tool);
        for op in output.operations {
            self.submit_from_tool(op);
        }
        self.set_preview(None);
    }

    /// Feed a pointer event in screen coordinates to the current tool.
    pub fn pointer(&mut self, event: ToolEvent) {
        let camera = self.camera;
        let event = event.map(|p| camera.screen_to_world(p));
        let view = SceneView::new(&self.scene, &self.predictive);
        let output = self.tools.apply_tool(event, &view);
        for op in output.operations {
            self.submit_from_tool(op);
        }
        self.set_preview(output.preview);
        if output.cursor.is_some() {
            self.pending_cursor = output.cursor;
        }
    }

    fn submit_from_tool(&mut self, op: Operation) {
        if let Err(e) = self.submit(op) {
            log::warn!("dropping local operation: {e}");
            self.stats.malformed_dropped += 1;
        }
    }

    fn set_preview(&mut self, preview: Option<SceneObject>) {
        if self.preview.is_none() && preview.is_none() {
            return;
        }
        if let Some(old) = &self.preview {
            self.dirty.invalidate(old.bounds());
        }
        if let Some(new) = &preview {
            self.dirty.invalidate(new.bounds());
        }
        self.preview = preview;
        self.frames.request();
    }

    pub fn pan(&mut self, delta: Vec2) {
        self.camera.pan(delta);
        self.invalidate_view();
    }

    pub fn zoom_at(&mut self, screen_point: Point, factor: f64) {
        if self.camera.zoom_at(screen_point, factor) {
            self.invalidate_view();
        }
    }

    pub fn resize(&mut self, viewport: Size) {
        if viewport != self.viewport {
            self.viewport = viewport;
            self.invalidate_view();
        }
    }

    /// Frame all visible content.
    pub fn fit_to_content(&mut self, padding: f64) {
        let bounds = self.view().bounds();
        if let Some(bounds) = bounds {
            self.camera.fit_to_bounds(bounds, self.viewport, padding);
            self.invalidate_view();
        }
    }

    fn invalidate_view(&mut self) {
        self.dirty.invalidate_all();
        self.frames.request_full();
    }

    /// Record a scene change: dirty regions, culling set, next frame.
    fn invalidate(&mut self, change: SceneChange) {
        if change.is_empty() {
            return;
        }
        if change.full {
            self.dirty.invalidate_all();
            self.culler.invalidate();
            self.frames.request_full();
            return;
        }
        for rect in &change.dirty {
            self.dirty.invalidate(*rect);
        }
        let view = SceneView::new(&self.scene, &self.predictive);
        for id in change.touched.iter().chain(&change.removed) {
            match view.get(id) {
                Some(obj) => self.culler.note_object(*id, obj.bounds()),
                None => self.culler.forget(id),
            }
        }
        self.frames.request();
    }

    /// Claim the pending frame, if any. Dirty regions are consumed.
    pub fn next_frame(&mut self) -> Option<RenderPass<'_>> {
        let request = self.frames.take()?;
        let regions = self.dirty.take();
        let regions = if request.full { DirtyRegions::Full } else { regions };
        let view = SceneView::new(&self.scene, &self.predictive);
        self.culler.update(
            &self.camera,
            self.viewport,
            view.iter().map(|obj| (obj.id(), obj.bounds())),
        );
        Some(RenderPass {
            view,
            regions,
            culler: &self.culler,
            camera: self.camera,
            viewport: self.viewport,
            preview: self.preview.as_ref(),
        })
    }

    /// One turn of the network loop: transport events, reconnects,
    /// batch flushes, REST fallback.
    pub fn tick<T, S>(&mut self, now: Instant, transport: &mut T, state_source: &mut S)
    where
        T: Transport + ?Sized,
        S: StateSource + ?Sized,
    {
        for event in transport.poll_events() {
            self.handle_transport_event(event, now, transport);
        }

        if self.lesson_ended {
            if self.connection.status() != ConnectionStatus::Disconnected {
                let changed = self.connection.shutdown(transport);
                self.publish_status(changed);
            }
            return;
        }

        let changed = self.connection.tick(transport, now);
        self.publish_status(changed);
        let connected = self.connection.status().is_connected();

        if connected {
            if let Some(p) = self.pending_cursor.take() {
                let cursor = ClientMessage::Cursor {
                    user_id: self.ctx.user_id.clone(),
                    user_name: self.ctx.user_name.clone(),
                    x: p.x,
                    y: p.y,
                };
                if let Err(e) = transport.send(&cursor) {
                    log::debug!("cursor not delivered: {e}");
                }
            }
        } else {
            self.pending_cursor = None;
        }

        if self.connection.is_exhausted() {
            // The channel gave up; queued work will never be delivered.
            let events = self.batcher.discard_queued(now);
            self.handle_batch_events(events);
        } else if self.batcher.should_flush(now) {
            if connected {
                let events = self.batcher.flush(now, transport);
                self.handle_batch_events(events);
            } else {
                // Sends would fail without reaching anyone; keep the retries.
                self.batcher.hold(now);
            }
        }

        if let Some(result) = state_source.poll_state() {
            self.handle_state_response(result);
        }

        if self.resync_wanted {
            self.resync_wanted = false;
            if connected {
                self.send_request_state(transport);
            } else {
                state_source.request_state(&self.ctx.lesson_id);
            }
        }

        if self.connection.is_exhausted() && !state_source.in_flight() {
            let interval = self.ctx.config.fallback_poll_interval();
            let due = self
                .last_fallback_poll
                .is_none_or(|last| now.duration_since(last) >= interval);
            if due {
                log::debug!("polling board state while disconnected");
                self.last_fallback_poll = Some(now);
                state_source.request_state(&self.ctx.lesson_id);
            }
        }
    }

    fn send_request_state<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        let request = ClientMessage::RequestState {
            user_id: self.ctx.user_id.clone(),
            user_name: self.ctx.user_name.clone(),
            timestamp: now_millis(),
        };
        if let Err(e) = transport.send(&request) {
            log::warn!("failed to request board state: {e}");
            self.resync_wanted = true;
        }
    }

    fn handle_transport_event<T: Transport + ?Sized>(&mut self, event: TransportEvent, now: Instant, transport: &mut T) {
        let changed = self.connection.handle_event(&event, now);
        self.publish_status(changed);
        match event {
            TransportEvent::Opened => {
                let join = ClientMessage::Join {
                    user_id: self.ctx.user_id.clone(),
                    user_name: self.ctx.user_name.clone(),
                    client_id: self.ctx.client_id.clone(),
                    role: Some(self.ctx.role),
                    timestamp: now_millis(),
                };
                if let Err(e) = transport.send(&join) {
                    log::warn!("failed to join lesson {}: {e}", self.ctx.lesson_id);
                }
                self.send_request_state(transport);
                self.batcher.resume(now);
            }
            TransportEvent::Closed | TransportEvent::Failed(_) => {
                self.batcher.requeue_in_flight(now);
            }
            TransportEvent::Message(message) => self.handle_server_message(message),
        }
    }

    fn handle_batch_events(&mut self, events: Vec<BatchEvent>) {
        for event in events {
            match event {
                BatchEvent::Sent { .. } => self.stats.batches_sent += 1,
                BatchEvent::Retrying { .. } => {}
                BatchEvent::Discarded { operations, .. } => {
                    self.stats.batches_discarded += 1;
                    for op in &operations {
                        let change = self.predictive.cancel(op.client_sequence, &self.scene);
                        self.invalidate(change);
                    }
                    self.events.notice(
                        NoticeLevel::Warning,
                        format!("{} drawing operations could not be saved", operations.len()),
                    );
                }
            }
        }
    }

    /// React to one message from the lesson channel.
    pub fn handle_server_message(&mut self, message: ServerMessage) {
        log::debug!("received {message:?}");
        match message {
            ServerMessage::UserJoined {
                user_id,
                user_name,
                role,
                ..
            } => {
                let role = role.unwrap_or_default();
                self.roles.set(user_id.clone(), role);
                if user_id != self.ctx.user_id {
                    self.events.publish(BoardEvent::PeerJoined {
                        user_id,
                        user_name,
                        role,
                    });
                }
            }
            ServerMessage::UserLeft { user_id, user_name, .. } => {
                self.roles.remove(&user_id);
                self.events.publish(BoardEvent::PeerLeft { user_id, user_name });
            }
            ServerMessage::DrawOperation { operation }
            | ServerMessage::CompleteDrawing { operation }
            | ServerMessage::BoardUpdate { operation }
            | ServerMessage::BoardCleared { operation } => {
                self.ingest_wire(vec![operation], Delivery::Push);
            }
            ServerMessage::LessonEnded { message } => {
                log::info!("lesson {} ended", self.ctx.lesson_id);
                self.lesson_ended = true;
                self.events.publish(BoardEvent::LessonEnded { message });
            }
            ServerMessage::CursorPosition { user_id, user_name, x, y } => {
                if user_id != self.ctx.user_id {
                    self.events.publish(BoardEvent::CursorMoved {
                        user_id,
                        user_name,
                        position: Point::new(x, y),
                    });
                }
            }
            ServerMessage::BoardState { operations, .. } => {
                self.ingest_wire(operations, Delivery::Snapshot);
                let changed = self.connection.mark_synchronized();
                self.publish_status(changed);
            }
            ServerMessage::Error { message } => {
                log::warn!("server error: {message}");
                self.events.notice(NoticeLevel::Warning, message);
            }
        }
    }

    fn handle_state_response(&mut self, result: Result<StateResponse, FetchError>) {
        match result {
            Ok(response) => {
                log::debug!("fetched {} operations over REST", response.operations.len());
                self.ingest_wire(response.operations, Delivery::Snapshot);
            }
            Err(e) => {
                log::warn!("board state fetch failed: {e}");
                self.stats.state_fetch_failures += 1;
                if self.reconciler.is_resync_pending() && !self.connection.status().is_connected() {
                    // Try again on the next poll.
                    self.last_fallback_poll = None;
                }
            }
        }
    }

    fn ingest_wire(&mut self, wire: Vec<WireOperation>, delivery: Delivery) -> ReconcileReport {
        let (ops, dropped) = decode_operations(wire, self.ctx.config.canvas_extent);
        self.stats.malformed_dropped += dropped as u64;
        self.ingest(ops, delivery)
    }

    /// Reconcile delivered operations into the confirmed scene.
    pub fn ingest(&mut self, operations: Vec<Operation>, delivery: Delivery) -> ReconcileReport {
        let mut target = Ingest {
            client_id: &self.ctx.client_id,
            delivery,
            scene: &mut self.scene,
            predictive: &mut self.predictive,
            batcher: &mut self.batcher,
            resolver: &mut self.resolver,
            roles: &self.roles,
            events: &mut self.events,
            stats: &mut self.stats,
            change: SceneChange::default(),
        };
        let report = self.reconciler.reconcile(operations, delivery, &mut target);
        let change = target.change;

        self.stats.operations_applied += report.applied as u64;
        self.stats.duplicates_dropped += report.duplicates as u64;
        self.stats.deferred_dropped += report.deferred as u64;
        self.invalidate(change);
        if report.rebuilt {
            self.culler.invalidate();
            self.invalidate_view();
        }
        if let Some(gap) = report.gap {
            self.stats.resyncs += 1;
            self.resync_wanted = true;
            self.events.publish(BoardEvent::ResyncRequested {
                expected: gap.expected,
                received: gap.received,
            });
        }
        report
    }
}

/// Applies reconciled operations: echoes confirm local work, remote
/// draws go through conflict resolution first.
struct Ingest<'s> {
    client_id: &'s str,
    delivery: Delivery,
    scene: &'s mut SceneStore,
    predictive: &'s mut PredictiveApplier,
    batcher: &'s mut OperationBatcher,
    resolver: &'s mut ConflictResolver,
    roles: &'s RoleDirectory,
    events: &'s mut EventBus,
    stats: &'s mut SessionStats,
    change: SceneChange,
}

impl Ingest<'_> {
    fn confirm_own(&mut self, op: &Operation) {
        self.change.merge(self.scene.apply_operation(op));
        if let Some(change) = self.predictive.confirm(op.client_sequence) {
            self.change.merge(change);
        }
        self.batcher.confirm_operation(op.client_sequence);
    }

    fn apply_remote(&mut self, op: &Operation) {
        let mut incoming = op.clone();
        let conflicts: Vec<Operation> = self
            .resolver
            .find_conflicts(op, self.predictive.pending())
            .into_iter()
            .cloned()
            .collect();

        for local in conflicts {
            let resolution = self.resolver.resolve(&incoming, &local, self.roles);
            self.stats.conflicts_resolved += 1;
            self.events.publish(BoardEvent::ConflictResolved {
                strategy: self.resolver.strategy(),
                remote_user: incoming.origin.user_name.clone(),
                local_sequence: local.client_sequence,
            });
            match resolution {
                Resolution::ApplyIncoming { cancel_local } => {
                    if cancel_local {
                        self.cancel_local(&local);
                    }
                }
                Resolution::DropIncoming => {
                    log::debug!("keeping local #{} over remote #{}", local.client_sequence, incoming.sequence_number);
                    return;
                }
                Resolution::Merge {
                    target: MergeTarget::Incoming,
                    delta,
                } => incoming = self.resolver.nudge(&incoming, delta),
                Resolution::Merge {
                    target: MergeTarget::Local,
                    delta,
                } => {
                    let nudged = self.resolver.nudge(&local, delta);
                    if self.batcher.replace_unsent(nudged.clone()) {
                        self.change.merge(self.predictive.replace(nudged));
                    } else {
                        log::debug!("local #{} already sent; not nudged", local.client_sequence);
                    }
                }
            }
        }

        if incoming.kind == OperationKind::Clear && self.delivery == Delivery::Push {
            self.events.publish(BoardEvent::BoardCleared {
                by: incoming.origin.user_name.clone(),
            });
        }
        self.change.merge(self.scene.apply_operation(&incoming));
    }

    /// Withdraw a losing local operation. Once sent it cannot be recalled;
    /// the server order then decides.
    fn cancel_local(&mut self, local: &Operation) {
        if self.batcher.cancel_operation(local.client_sequence) {
            let change = self.predictive.cancel(local.client_sequence, &*self.scene);
            self.change.merge(change);
        } else {
            log::debug!("local #{} already sent; not cancelled", local.client_sequence);
        }
    }
}

impl ReconcileTarget for Ingest<'_> {
    fn reset(&mut self) {
        self.scene.clear();
        self.change.full = true;
    }

    fn apply(&mut self, op: &Operation) {
        if op.is_from(self.client_id) {
            self.confirm_own(op);
        } else {
            self.apply_remote(op);
        }
    }
}
