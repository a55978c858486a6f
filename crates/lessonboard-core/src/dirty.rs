//! Dirty-region tracking for incremental redraw.

use kurbo::Rect;

/// Whether two rectangles overlap or touch.
pub fn rects_overlap(a: Rect, b: Rect) -> bool {
    a.x0 <= b.x1 && b.x0 <= a.x1 && a.y0 <= b.y1 && b.y0 <= a.y1
}

/// Whether `outer` fully contains `inner`.
pub fn rect_contains(outer: Rect, inner: Rect) -> bool {
    outer.x0 <= inner.x0 && outer.y0 <= inner.y0 && outer.x1 >= inner.x1 && outer.y1 >= inner.y1
}

/// Regions handed to a render pass.
#[derive(Debug, Clone, PartialEq)]
pub enum DirtyRegions {
    /// Nothing to redraw.
    Clean,
    /// Redraw only inside these rectangles (pairwise disjoint).
    Partial(Vec<Rect>),
    /// Redraw everything.
    Full,
}

impl DirtyRegions {
    pub fn is_clean(&self) -> bool {
        matches!(self, DirtyRegions::Clean)
    }

    pub fn is_full(&self) -> bool {
        matches!(self, DirtyRegions::Full)
    }

    /// Whether an object with these bounds must be redrawn.
    pub fn intersects(&self, bounds: Rect) -> bool {
        match self {
            DirtyRegions::Clean => false,
            DirtyRegions::Partial(regions) => regions.iter().any(|r| rects_overlap(*r, bounds)),
            DirtyRegions::Full => true,
        }
    }

    /// Whether `bounds` lies entirely inside one region.
    pub fn covers(&self, bounds: Rect) -> bool {
        match self {
            DirtyRegions::Clean => false,
            DirtyRegions::Partial(regions) => regions.iter().any(|r| rect_contains(*r, bounds)),
            DirtyRegions::Full => true,
        }
    }

    pub fn regions(&self) -> &[Rect] {
        match self {
            DirtyRegions::Partial(regions) => regions,
            _ => &[],
        }
    }
}

/// Accumulates invalidated rectangles between render passes.
///
/// Overlapping rectangles are merged on insert. Once more than `ceiling`
/// disjoint regions are tracked the tracker collapses to a single
/// full-canvas region.
#[derive(Debug, Clone)]
pub struct DirtyRegionTracker {
    regions: Vec<Rect>,
    full: bool,
    ceiling: usize,
}

impl DirtyRegionTracker {
    pub fn new(ceiling: usize) -> Self {
        Self {
            regions: Vec::new(),
            full: false,
            ceiling: ceiling.max(1),
        }
    }

    /// Add a rectangle, merging it with every region it touches.
    pub fn invalidate(&mut self, region: Rect) {
        if self.full {
            return;
        }
        if !(region.x0.is_finite() && region.y0.is_finite() && region.x1.is_finite() && region.y1.is_finite()) {
            log::warn!("ignoring non-finite dirty region {region:?}");
            return;
        }
        let mut merged = region.abs();
        // Merging can create new overlaps, so repeat until stable.
        loop {
            let before = self.regions.len();
            self.regions.retain(|r| {
                if rects_overlap(*r, merged) {
                    merged = merged.union(*r);
                    false
                } else {
                    true
                }
            });
            if self.regions.len() == before {
                break;
            }
        }
        self.regions.push(merged);
        if self.regions.len() > self.ceiling {
            log::debug!("{} dirty regions exceed ceiling {}, collapsing", self.regions.len(), self.ceiling);
            self.invalidate_all();
        }
    }

    /// Mark the whole canvas dirty.
    pub fn invalidate_all(&mut self) {
        self.full = true;
        self.regions.clear();
    }

    /// Hand the accumulated regions to a render pass and reset.
    pub fn take(&mut self) -> DirtyRegions {
        if self.full {
            self.full = false;
            self.regions.clear();
            return DirtyRegions::Full;
        }
        if self.regions.is_empty() {
            return DirtyRegions::Clean;
        }
        DirtyRegions::Partial(std::mem::take(&mut self.regions))
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.regions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Number of tracked disjoint regions (0 when full).
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn regions(&self) -> &[Rect] {
        &self.regions
    }
}
