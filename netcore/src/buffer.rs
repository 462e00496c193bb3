//! Growable outbound write buffer.
//!
//! Thin wrapper over `bytes::BytesMut`, the amortized-growth container this
//! crate already depends on, rather than hand-rolling `Vec` doubling.

use bytes::{BufMut, BytesMut};

/// A reusable outbound write buffer drawn from and returned to a [`crate::pool::Pool`].
#[derive(Debug, Default)]
pub struct Buffer {
    inner: BytesMut,
}

impl Buffer {
    /// Creates an empty buffer with no pre-allocated capacity.
    pub fn new() -> Self {
        Self {
            inner: BytesMut::new(),
        }
    }

    /// Appends `data`, growing the backing allocation as needed.
    pub fn write(&mut self, data: &[u8]) {
        self.inner.put_slice(data);
    }

    /// Appends a big-endian `u32`.
    pub fn write_u32_be(&mut self, v: u32) {
        self.inner.put_u32(v);
    }

    /// The buffered bytes, valid until the next [`Buffer::reset`].
    pub fn bytes(&self) -> &[u8] {
        &self.inner
    }

    /// Zeros the logical length; retains the backing allocation for reuse.
    pub fn reset(&mut self) {
        self.inner.clear();
    }

    /// Number of bytes currently buffered.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
