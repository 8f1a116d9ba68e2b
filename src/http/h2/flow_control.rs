//! HTTP/2 flow control
//!
//! This module implements flow control as defined in RFC 7540 Section 5.2.
//!
//! HTTP/2 uses flow control to prevent senders from overwhelming receivers
//! with data. Flow control is applied at both the connection and stream level.
//! Windows are kept in signed 64-bit accumulators so that overflow past
//! 2^31-1 is detected before it happens, and so that a window driven
//! negative by a SETTINGS change is representable.

use super::error::{Error, ErrorCode, Result};
use super::{DEFAULT_INITIAL_WINDOW_SIZE, MAX_STREAM_ID};
use tracing::trace;

/// Largest legal window (2^31 - 1)
pub const MAX_WINDOW_SIZE: i64 = MAX_STREAM_ID as i64;

/// When to return receive credit to the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowUpdatePolicy {
    /// Send WINDOW_UPDATE for every DATA frame consumed
    Immediate,
    /// Send WINDOW_UPDATE once half the window is outstanding
    #[default]
    Coalesce,
}

/// Flow control window
///
/// Tracks the available window size for one direction of one scope.
#[derive(Debug, Clone)]
pub struct FlowControlWindow {
    /// Initial window size
    initial_size: u32,
    /// Current window size (can be negative if over-committed)
    current_size: i64,
}

impl FlowControlWindow {
    /// Create a new flow control window with default size
    pub fn new() -> Self {
        Self::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    /// Create a new flow control window with specified initial size
    pub fn with_initial_size(initial_size: u32) -> Self {
        FlowControlWindow {
            initial_size,
            current_size: initial_size as i64,
        }
    }

    /// Get current window size
    pub fn size(&self) -> i64 {
        self.current_size
    }

    /// Get initial window size
    pub fn initial_size(&self) -> u32 {
        self.initial_size
    }

    /// Bytes that may be sent right now (0 when the window is negative)
    pub fn available(&self) -> usize {
        self.current_size.max(0) as usize
    }

    /// Check if window can carry the specified amount
    pub fn can_send(&self, amount: usize) -> bool {
        self.current_size >= amount as i64
    }

    /// Take up to `amount` bytes of capacity, returning what was taken
    pub fn consume(&mut self, amount: usize) -> usize {
        let taken = (amount as i64).min(self.current_size.max(0));
        self.current_size -= taken;
        taken as usize
    }

    /// Increase window size, failing if the result would exceed 2^31-1
    ///
    /// The window is left unchanged on failure.
    pub fn increase(&mut self, increment: u32) -> std::result::Result<i64, i64> {
        let new_size = self.current_size + increment as i64;
        if new_size > MAX_WINDOW_SIZE {
            return Err(new_size);
        }
        self.current_size = new_size;
        Ok(new_size)
    }

    /// Decrease window size unconditionally
    pub fn decrease(&mut self, amount: usize) {
        self.current_size -= amount as i64;
    }

    /// Update initial window size from SETTINGS
    ///
    /// Shifts the current size by the difference; the result may be
    /// negative. Fails if the result would exceed 2^31-1.
    pub fn update_initial_size(&mut self, new_initial_size: u32) -> std::result::Result<(), i64> {
        let diff = new_initial_size as i64 - self.initial_size as i64;
        let new_current = self.current_size + diff;
        if new_current > MAX_WINDOW_SIZE {
            return Err(new_current);
        }
        self.initial_size = new_initial_size;
        self.current_size = new_current;
        Ok(())
    }
}

impl Default for FlowControlWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive-side accounting for one scope
///
/// `window` is what the peer may still send; `unacked` is credit consumed
/// by received DATA that has not yet been returned with WINDOW_UPDATE.
#[derive(Debug, Clone)]
pub struct RecvWindow {
    window: FlowControlWindow,
    /// Window size we aim to keep available to the peer
    target: u32,
    unacked: u32,
}

impl RecvWindow {
    /// Create a receive window
    pub fn new(initial_size: u32) -> Self {
        RecvWindow {
            window: FlowControlWindow::with_initial_size(initial_size),
            target: initial_size,
            unacked: 0,
        }
    }

    /// Current window
    pub fn size(&self) -> i64 {
        self.window.size()
    }

    /// Target window size
    pub fn target(&self) -> u32 {
        self.target
    }

    /// Raise the target, returning the credit to announce immediately
    pub fn set_target(&mut self, target: u32) -> u32 {
        let increment = target.saturating_sub(self.target);
        self.target = target;
        if increment > 0 {
            self.window.current_size += increment as i64;
        }
        increment
    }

    /// Charge received flow-controlled bytes, failing if they exceed the window
    pub fn receive(&mut self, amount: usize) -> std::result::Result<(), i64> {
        if amount as i64 > self.window.size() {
            return Err(self.window.size());
        }
        self.window.decrease(amount);
        self.unacked = self.unacked.saturating_add(amount as u32);
        Ok(())
    }

    /// Apply a change of our INITIAL_WINDOW_SIZE to this stream window
    pub fn update_initial_size(&mut self, new_initial_size: u32) -> std::result::Result<(), i64> {
        self.window.update_initial_size(new_initial_size)?;
        self.target = new_initial_size;
        Ok(())
    }

    /// Credit to return now under `policy`, if any; the credit is applied
    /// to the window as if the WINDOW_UPDATE had been sent
    pub fn take_update(&mut self, policy: WindowUpdatePolicy) -> Option<u32> {
        if self.unacked == 0 {
            return None;
        }
        let due = match policy {
            WindowUpdatePolicy::Immediate => true,
            WindowUpdatePolicy::Coalesce => self.unacked >= self.target / 2,
        };
        if !due {
            return None;
        }
        let increment = self.unacked;
        self.unacked = 0;
        // cannot overflow: the window only ever returns to its target
        self.window.current_size += increment as i64;
        trace!(increment, window = self.window.size(), "returning receive credit");
        Some(increment)
    }
}

/// Connection-level flow control
///
/// Manages flow control for the entire connection. The connection window
/// always starts at 65535 regardless of SETTINGS_INITIAL_WINDOW_SIZE.
#[derive(Debug)]
pub struct ConnectionFlowControl {
    /// Send window (outbound data)
    send_window: FlowControlWindow,
    /// Receive window (inbound data)
    recv_window: RecvWindow,
}

impl ConnectionFlowControl {
    /// Create new connection-level flow control
    pub fn new() -> Self {
        ConnectionFlowControl {
            send_window: FlowControlWindow::new(),
            recv_window: RecvWindow::new(DEFAULT_INITIAL_WINDOW_SIZE),
        }
    }

    /// Get send window
    pub fn send_window(&self) -> &FlowControlWindow {
        &self.send_window
    }

    /// Get mutable send window
    pub fn send_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.send_window
    }

    /// Get receive window
    pub fn recv_window(&self) -> &RecvWindow {
        &self.recv_window
    }

    /// Get mutable receive window
    pub fn recv_window_mut(&mut self) -> &mut RecvWindow {
        &mut self.recv_window
    }

    /// Apply a WINDOW_UPDATE received on stream 0
    pub fn increase_send_window(&mut self, increment: u32) -> Result<i64> {
        if increment == 0 {
            return Err(Error::protocol("WINDOW_UPDATE with zero increment on connection"));
        }
        self.send_window.increase(increment).map_err(|size| {
            Error::connection(
                ErrorCode::FlowControlError,
                format!("Connection window size {} exceeds maximum (2^31-1)", size),
            )
        })
    }

    /// Charge received DATA against the connection window
    pub fn consume_recv_window(&mut self, amount: usize) -> Result<()> {
        self.recv_window.receive(amount).map_err(|available| {
            Error::connection(
                ErrorCode::FlowControlError,
                format!("DATA of {} bytes exceeds connection window {}", amount, available),
            )
        })
    }
}

impl Default for ConnectionFlowControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream-level flow control
///
/// Manages flow control for an individual stream
#[derive(Debug)]
pub struct StreamFlowControl {
    /// Stream ID
    stream_id: u32,
    /// Send window (outbound data)
    send_window: FlowControlWindow,
    /// Receive window (inbound data)
    recv_window: RecvWindow,
}

impl StreamFlowControl {
    /// Create with specified initial window sizes
    pub fn with_initial_sizes(stream_id: u32, send_size: u32, recv_size: u32) -> Self {
        StreamFlowControl {
            stream_id,
            send_window: FlowControlWindow::with_initial_size(send_size),
            recv_window: RecvWindow::new(recv_size),
        }
    }

    /// Get stream ID
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Get send window
    pub fn send_window(&self) -> &FlowControlWindow {
        &self.send_window
    }

    /// Get mutable send window
    pub fn send_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.send_window
    }

    /// Get receive window
    pub fn recv_window(&self) -> &RecvWindow {
        &self.recv_window
    }

    /// Get mutable receive window
    pub fn recv_window_mut(&mut self) -> &mut RecvWindow {
        &mut self.recv_window
    }

    /// Apply a WINDOW_UPDATE received on this stream
    pub fn increase_send_window(&mut self, increment: u32) -> Result<i64> {
        let stream_id = self.stream_id;
        if increment == 0 {
            return Err(Error::stream(
                stream_id,
                ErrorCode::ProtocolError,
                "WINDOW_UPDATE with zero increment",
            ));
        }
        self.send_window.increase(increment).map_err(|size| {
            Error::stream(
                stream_id,
                ErrorCode::FlowControlError,
                format!("Stream window size {} exceeds maximum (2^31-1)", size),
            )
        })
    }

    /// Shift the send window after the peer changed INITIAL_WINDOW_SIZE
    pub fn update_send_initial_size(&mut self, new_initial_size: u32) -> Result<()> {
        self.send_window
            .update_initial_size(new_initial_size)
            .map_err(|size| {
                Error::connection(
                    ErrorCode::FlowControlError,
                    format!(
                        "INITIAL_WINDOW_SIZE change pushes stream {} window to {}",
                        self.stream_id, size
                    ),
                )
            })
    }

    /// Charge received DATA against the stream window
    pub fn consume_recv_window(&mut self, amount: usize) -> Result<()> {
        let stream_id = self.stream_id;
        self.recv_window.receive(amount).map_err(|available| {
            Error::stream(
                stream_id,
                ErrorCode::FlowControlError,
                format!("DATA of {} bytes exceeds stream window {}", amount, available),
            )
        })
    }
}
