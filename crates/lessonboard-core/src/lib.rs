//! LessonBoard Core Library
//!
//! Realtime sync engine and scene model for the shared lesson whiteboard.
//! Operations flow from tools through the predictive shadow and the
//! batcher to the lesson channel; echoes and peer operations come back
//! through the sequence reconciler into the confirmed scene.

pub mod batcher;
pub mod camera;
pub mod config;
pub mod conflict;
pub mod dirty;
pub mod events;
pub mod frame;
pub mod operation;
pub mod predictive;
pub mod protocol;
pub mod reconciler;
pub mod scene;
pub mod session;
pub mod shapes;
pub mod tools;
pub mod transport;
pub mod viewport;

pub use batcher::{BatchEvent, BatchId, BatcherSettings, OperationBatcher, OperationSink};
pub use camera::Camera;
pub use config::{BoardConfig, ConfigError, ReconnectConfig};
pub use conflict::{ConflictResolver, ConflictStrategy, Resolution, Role, RoleDirectory};
pub use dirty::{DirtyRegionTracker, DirtyRegions};
pub use events::{BoardEvent, EventBus, NoticeLevel};
pub use frame::{FrameRequest, FrameScheduler};
pub use operation::{CANVAS_EXTENT, Operation, OperationError, OperationKind, Origin};
pub use predictive::{PredictiveApplier, SceneView};
pub use protocol::{ClientMessage, ServerMessage, StateResponse, WireOperation};
pub use reconciler::{Delivery, ReconcileReport, ReconcileTarget, SequenceReconciler};
pub use scene::{SceneChange, SceneStore};
pub use session::{BoardSession, RenderPass, SessionContext, SessionStats};
pub use shapes::{BoardColor, ObjectId, ObjectKind, SceneObject};
pub use tools::{ToolController, ToolEvent, ToolKind, ToolOutput};
pub use transport::{ConnectionStatus, StateSource, StatusIndicator, Transport, TransportError, TransportEvent};
pub use viewport::ViewportCuller;
