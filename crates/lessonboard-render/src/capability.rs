//! Backend capability detection.

use crate::renderer::BackendKind;

/// Set to `fallback` (or `path`) to force the path backend.
pub const ENV_RENDERER: &str = "LESSONBOARD_RENDERER";

/// Smallest vertex budget worth batching with; one stroke segment plus caps.
pub const MIN_BATCH_VERTICES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub accelerated: bool,
    /// Vertex budget of one draw call.
    pub max_vertices: usize,
}

impl Capabilities {
    pub const FALLBACK: Self = Self {
        accelerated: false,
        max_vertices: 0,
    };

    pub fn accelerated(max_vertices: usize) -> Self {
        Self {
            accelerated: true,
            max_vertices,
        }
    }

    pub fn backend(&self) -> BackendKind {
        if self.accelerated && self.max_vertices >= MIN_BATCH_VERTICES {
            BackendKind::Accelerated
        } else {
            BackendKind::Path
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::FALLBACK
    }
}

/// What the host's graphics stack reports.
pub trait CapabilityProbe {
    fn supports_accelerated(&self) -> bool;
    fn max_vertices(&self) -> usize;
}

/// Fixed answers, for hosts that know their limits up front.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticProbe {
    pub accelerated: bool,
    pub max_vertices: usize,
}

impl CapabilityProbe for StaticProbe {
    fn supports_accelerated(&self) -> bool {
        self.accelerated
    }

    fn max_vertices(&self) -> usize {
        self.max_vertices
    }
}

/// Probe the host, honoring [`ENV_RENDERER`].
pub fn detect(probe: &dyn CapabilityProbe) -> Capabilities {
    let forced = std::env::var(ENV_RENDERER).ok();
    detect_with(probe, forced.as_deref())
}

/// Probe the host with an explicit override.
pub fn detect_with(probe: &dyn CapabilityProbe, forced: Option<&str>) -> Capabilities {
    match forced.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("fallback" | "path") => {
            log::info!("renderer forced to path backend");
            return Capabilities::FALLBACK;
        }
        Some("" | "auto" | "accelerated") | None => {}
        Some(other) => log::warn!("ignoring unknown {ENV_RENDERER} value {other:?}"),
    }
    if !probe.supports_accelerated() {
        log::info!("accelerated rendering unavailable; using path backend");
        return Capabilities::FALLBACK;
    }
    let caps = Capabilities::accelerated(probe.max_vertices());
    if caps.backend() == BackendKind::Path {
        log::warn!("vertex budget {} too small; using path backend", caps.max_vertices);
        return Capabilities::FALLBACK;
    }
    caps
}
