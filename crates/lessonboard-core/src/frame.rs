//! Coalescing "next frame" scheduling.

/// What the next render pass must do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameRequest {
    /// Ignore dirty regions and redraw everything visible.
    pub full: bool,
}

/// At most one frame request is ever in flight; any number of
/// invalidations between frames fold into it.
#[derive(Debug, Clone, Default)]
pub struct FrameScheduler {
    pending: Option<FrameRequest>,
    coalesced: u64,
    frames: u64,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a frame. Returns `true` only when this call created the
    /// request, i.e. when the host must actually schedule a callback.
    pub fn request(&mut self) -> bool {
        match self.pending {
            Some(_) => {
                self.coalesced += 1;
                false
            }
            None => {
                self.pending = Some(FrameRequest::default());
                true
            }
        }
    }

    /// Ask for a frame that bypasses dirty-region restriction.
    pub fn request_full(&mut self) -> bool {
        let created = self.request();
        if let Some(request) = self.pending.as_mut() {
            request.full = true;
        }
        created
    }

    /// Claim the pending request at the start of a render pass.
    pub fn take(&mut self) -> Option<FrameRequest> {
        let request = self.pending.take()?;
        self.frames += 1;
        Some(request)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Requests folded into an already pending frame.
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }

    /// Frames handed out so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }
}
