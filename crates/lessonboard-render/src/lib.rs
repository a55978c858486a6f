//! LessonBoard Render Library
//!
//! Draws the shared board. Hosts with an accelerated pipeline get point
//! and line vertex batches; everything else gets a 2D path command list.
//! Only dirty, on-screen objects are drawn each frame.

pub mod accelerated;
pub mod capability;
pub mod path;
pub mod pipeline;
mod renderer;
pub mod vertex;

#[cfg(feature = "vello-renderer")]
mod vello_impl;

pub use accelerated::{ImageOverlay, TextOverlay, VertexBatch, VertexBatchRenderer};
pub use capability::{Capabilities, CapabilityProbe, StaticProbe, detect, detect_with};
pub use path::{PathCommand, PathRenderer};
pub use pipeline::DualModeRenderer;
pub use renderer::{BackendKind, DrawRegion, FrameStats, RenderContext, RenderResult, Renderer, RendererError};
pub use vertex::{LineVertex, PointVertex};

#[cfg(feature = "vello-renderer")]
pub use vello_impl::VelloEncoder;
