//! Message-size accounting for endpoint transports.

use crate::config::Configuration;
use crate::error::{Result, TransportErrorKind, WireError};

/// Tracks how many bytes of the current message may still be consumed.
///
/// Every read counts against `remaining`; a read (or a pre-allocation check)
/// that would exceed it fails with `END_OF_FILE` before any buffer is grown.
#[derive(Debug, Clone)]
pub struct MessageBudget {
    max: u64,
    known: u64,
    remaining: u64,
}

impl MessageBudget {
    pub fn new(config: &Configuration) -> Self {
        let max = config.max_message_size as u64;
        Self {
            max,
            known: max,
            remaining: max,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn known(&self) -> u64 {
        self.known
    }

    /// Restore the full budget for a new message.
    pub fn reset(&mut self) {
        self.known = self.max;
        self.remaining = self.max;
    }

    /// Restart accounting with a known message size.
    pub fn reset_to(&mut self, size: u64) -> Result<()> {
        if size > self.known {
            return Err(max_reached());
        }
        self.known = size;
        self.remaining = size;
        Ok(())
    }

    /// Narrow (or, with `0`, reset) the budget, keeping what was already consumed.
    pub fn update_known(&mut self, size: u64) -> Result<()> {
        let consumed = self.known - self.remaining;
        if size == 0 {
            self.reset();
        } else {
            self.reset_to(size)?;
        }
        self.count_consumed(consumed)
    }

    /// Clamp the known size without failing; used when a whole message is
    /// already in memory.
    pub fn limit_to(&mut self, size: u64) {
        self.reset();
        if size < self.max {
            self.known = size;
            self.remaining = size;
        }
    }

    /// Count bytes handed out through a direct buffer view. The caller
    /// already checked availability, so this saturates instead of failing.
    pub fn consume_saturating(&mut self, num_bytes: u64) {
        self.remaining = self.remaining.saturating_sub(num_bytes);
    }

    pub fn check_available(&self, num_bytes: u64) -> Result<()> {
        if self.remaining < num_bytes {
            return Err(max_reached());
        }
        Ok(())
    }

    pub fn count_consumed(&mut self, num_bytes: u64) -> Result<()> {
        if self.remaining >= num_bytes {
            self.remaining -= num_bytes;
            Ok(())
        } else {
            self.remaining = 0;
            Err(max_reached())
        }
    }
}

fn max_reached() -> WireError {
    WireError::transport(TransportErrorKind::EndOfFile, "MaxMessageSize reached")
}
