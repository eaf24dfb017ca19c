//! Batching of console characters into publishable chunks

/// Default capacity, a quarter of the protocol engine's 4 KiB packet buffer
pub const DEFAULT_CAPACITY: usize = 1024;

/// Bounded byte batch with a dirty flag.
///
/// Filling the buffer to capacity hands the batch back for publishing right
/// away; anything short of that waits for [`OutputBuffer::take_pending`].
#[derive(Debug)]
pub struct OutputBuffer {
    data: Vec<u8>,
    capacity: usize,
    dirty: bool,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl OutputBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            dirty: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Appends one byte. Returns the full batch once capacity is reached.
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        self.dirty = true;
        self.data.push(byte);

        if self.data.len() >= self.capacity {
            self.dirty = false;
            return Some(self.drain());
        }
        None
    }

    /// Hands back whatever is buffered and clears the dirty flag, even when
    /// there was nothing to hand back.
    pub fn take_pending(&mut self) -> Option<Vec<u8>> {
        self.dirty = false;
        if self.data.is_empty() {
            None
        } else {
            Some(self.drain())
        }
    }

    fn drain(&mut self) -> Vec<u8> {
        std::mem::replace(&mut self.data, Vec::with_capacity(self.capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaching_capacity_flushes_once_in_order() {
        let mut buffer = OutputBuffer::with_capacity(16);

        for byte in 0..15u8 {
            assert_eq!(buffer.push(byte), None);
        }
        assert_eq!(buffer.len(), 15);
        assert!(buffer.is_dirty());

        let batch = buffer.push(15).expect("16th byte flushes");
        assert_eq!(batch, (0..16u8).collect::<Vec<_>>());
        assert_eq!(buffer.len(), 0);
        assert!(!buffer.is_dirty());
    }

    #[test]
    fn take_pending_always_clears_dirty() {
        let mut buffer = OutputBuffer::with_capacity(8);
        assert_eq!(buffer.take_pending(), None);
        assert!(!buffer.is_dirty());

        buffer.push(b'h');
        buffer.push(b'i');
        assert_eq!(buffer.take_pending(), Some(b"hi".to_vec()));
        assert!(!buffer.is_dirty());
        assert!(buffer.is_empty());

        // idle tick
        assert_eq!(buffer.take_pending(), None);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut buffer = OutputBuffer::with_capacity(0);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.push(b'x'), Some(vec![b'x']));
    }
}
