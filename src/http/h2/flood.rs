//! Frame flood detection
//!
//! Counts cheap-to-send frames that cost the receiver work: control frames,
//! resets of streams the peer just opened (rapid reset), empty frames and
//! long CONTINUATION chains. Any limit exceeded is a connection error of
//! type ENHANCE_YOUR_CALM.

use super::config::FloodLimits;
use super::error::{Error, ErrorCode, Result};
use std::time::Instant;
use tracing::warn;

/// Per-connection flood counters
#[derive(Debug)]
pub struct FloodGuard {
    limits: FloodLimits,
    window_start: Instant,
    control_frames: u32,
    resets: u32,
    empty_frames: u32,
    /// CONTINUATION frames in the header block being assembled
    continuations: u32,
}

impl FloodGuard {
    /// Create a guard with the given limits
    pub fn new(limits: FloodLimits) -> Self {
        FloodGuard {
            limits,
            window_start: Instant::now(),
            control_frames: 0,
            resets: 0,
            empty_frames: 0,
            continuations: 0,
        }
    }

    fn roll_window(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= self.limits.interval {
            self.window_start = now;
            self.control_frames = 0;
            self.resets = 0;
            self.empty_frames = 0;
        }
    }

    fn exceeded(what: &str, count: u32, limit: u32) -> Error {
        warn!(count, limit, kind = what, "frame flood detected");
        Error::connection(
            ErrorCode::EnhanceYourCalm,
            format!("{} limit exceeded: {} (limit {})", what, count, limit),
        )
    }

    /// Count a PING, SETTINGS, PRIORITY or RST_STREAM frame
    pub fn on_control_frame(&mut self) -> Result<()> {
        self.roll_window();
        self.control_frames += 1;
        if self.control_frames > self.limits.max_control_frames {
            return Err(Self::exceeded(
                "control frame",
                self.control_frames,
                self.limits.max_control_frames,
            ));
        }
        Ok(())
    }

    /// Count a RST_STREAM the peer sent for a stream it opened
    pub fn on_peer_reset(&mut self) -> Result<()> {
        self.roll_window();
        self.resets += 1;
        if self.resets > self.limits.max_resets {
            return Err(Self::exceeded("RST_STREAM", self.resets, self.limits.max_resets));
        }
        Ok(())
    }

    /// Count an empty DATA frame without END_STREAM or an empty CONTINUATION
    pub fn on_empty_frame(&mut self) -> Result<()> {
        self.roll_window();
        self.empty_frames += 1;
        if self.empty_frames > self.limits.max_empty_frames {
            return Err(Self::exceeded(
                "empty frame",
                self.empty_frames,
                self.limits.max_empty_frames,
            ));
        }
        Ok(())
    }

    /// Count a CONTINUATION frame of the current header block
    pub fn on_continuation(&mut self) -> Result<()> {
        self.continuations += 1;
        if self.continuations > self.limits.max_continuations {
            return Err(Self::exceeded(
                "CONTINUATION",
                self.continuations,
                self.limits.max_continuations,
            ));
        }
        Ok(())
    }

    /// Reset the per-block CONTINUATION count
    pub fn end_header_block(&mut self) {
        self.continuations = 0;
    }
}
