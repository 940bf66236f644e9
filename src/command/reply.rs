//! Caller-supplied reply buffer.

use crate::error::{Result, VolcoordError};
use tracing::error;

/// Reply buffer with a known capacity that handlers may grow.
///
/// Writes follow `snprintf` rules: text longer than the capacity is cut to
/// `capacity - 1` bytes. When growing fails the buffer becomes unavailable
/// and later writes are ignored.
#[derive(Debug, Default)]
pub struct ReplyBuffer {
    data: Option<Vec<u8>>,
    capacity: usize,
    len: usize,
}

impl ReplyBuffer {
    /// Allocate a buffer of `capacity` bytes; on allocation failure the
    /// buffer starts out unavailable.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut buffer = Self::default();
        if let Err(e) = buffer.grow(capacity) {
            error!(error = %e, "reply buffer allocation failed");
        }
        buffer
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_available(&self) -> bool {
        self.data.is_some()
    }

    /// Make room for at least `capacity` bytes.
    pub fn grow(&mut self, capacity: usize) -> Result<()> {
        if self.data.is_some() && capacity <= self.capacity {
            return Ok(());
        }
        let mut data = self.data.take().unwrap_or_default();
        let additional = capacity.saturating_sub(data.len());
        if let Err(e) = data.try_reserve_exact(additional) {
            self.capacity = 0;
            self.len = 0;
            return Err(VolcoordError::ResourceExhaustion(format!(
                "cannot grow reply buffer to {} bytes: {}",
                capacity, e
            )));
        }
        self.data = Some(data);
        self.capacity = capacity;
        Ok(())
    }

    /// Replace the contents with `text`; returns the reply length
    /// (written bytes plus the terminator), or 0 when unavailable.
    pub fn write_str(&mut self, text: &str) -> usize {
        let Some(data) = self.data.as_mut() else {
            return 0;
        };
        if self.capacity == 0 {
            return 0;
        }
        let mut end = text.len().min(self.capacity - 1);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        data.clear();
        data.extend_from_slice(&text.as_bytes()[..end]);
        self.len = end;
        self.retlen()
    }

    /// Length of the reply including its terminator.
    pub fn retlen(&self) -> usize {
        if self.data.is_some() && self.capacity > 0 {
            self.len + 1
        } else {
            0
        }
    }

    pub fn text(&self) -> Option<&str> {
        let data = self.data.as_ref()?;
        std::str::from_utf8(&data[..self.len]).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        if let Some(data) = self.data.as_mut() {
            data.clear();
        }
        self.len = 0;
    }
}
