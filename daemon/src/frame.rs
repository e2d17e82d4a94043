//! Frame buffer transfer
//!
//! A [`Frame`] is an owned copy of one encoded access unit plus the
//! producer's timestamp. The producer keeps its own buffer; the frame is
//! moved into the pipeline on push and released once the engine is done
//! with it.

/// One encoded access unit ready to be queued into the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Producer timestamp in microseconds (zero when unknown)
    timestamp: u64,

    /// Annex-B bytes of the access unit
    data: Vec<u8>,
}

impl Frame {
    /// Wrap an already owned buffer
    pub fn new(timestamp: u64, data: Vec<u8>) -> Self {
        Self { timestamp, data }
    }

    /// Copy a borrowed byte range into a new frame
    pub fn copy_from(timestamp: u64, bytes: &[u8]) -> Self {
        Self::new(timestamp, bytes.to_vec())
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[allow(dead_code)] // Read back by tests
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Split into timestamp and payload, handing the allocation to the engine
    pub fn into_parts(self) -> (u64, Vec<u8>) {
        (self.timestamp, self.data)
    }
}
