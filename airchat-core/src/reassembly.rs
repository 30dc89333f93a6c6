//! Frame reassembler: turns capture records (packet headers + raw frame chunks) into whole payloads.

use std::net::SocketAddr;

/// Frame offset where the UDP payload starts: 40-byte IPv6 header + 8-byte UDP header.
pub const PAYLOAD_OFFSET: usize = 0x30;

/// One record from the capture source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureRecord {
    /// Start of a packet from `source` whose application payload is `length` bytes.
    Header { source: SocketAddr, length: usize },
    /// Raw frame bytes starting at frame offset `offset`.
    Chunk { offset: usize, bytes: Vec<u8> },
}

/// A fully reassembled application payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub source: SocketAddr,
    pub bytes: Vec<u8>,
}

/// In-flight packet: where it came from, how long it claims to be, what we have so far.
struct Pending {
    source: SocketAddr,
    expected: usize,
    buffer: Vec<u8>,
}

/// Reassembles one packet at a time, in capture order.
pub struct Reassembler {
    payload_offset: usize,
    pending: Option<Pending>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::with_payload_offset(PAYLOAD_OFFSET)
    }

    /// Use a different link + transport header size (e.g. 0x1c for IPv4/UDP).
    pub fn with_payload_offset(payload_offset: usize) -> Self {
        Self {
            payload_offset,
            pending: None,
        }
    }

    /// Feed one record. Returns `Ok(Some(payload))` exactly when the current packet becomes complete.
    pub fn push(&mut self, record: CaptureRecord) -> Result<Option<Payload>, ReassemblyError> {
        match record {
            CaptureRecord::Header { source, length } => {
                if let Some(stale) = self.pending.take() {
                    log::debug!(
                        "dropping incomplete packet from {} ({} of {} bytes)",
                        stale.source,
                        stale.buffer.len(),
                        stale.expected
                    );
                }
                self.pending = Some(Pending {
                    source,
                    expected: length,
                    buffer: Vec::with_capacity(length),
                });
                if length == 0 {
                    return Ok(self.take_complete());
                }
                Ok(None)
            }
            CaptureRecord::Chunk { offset, bytes } => {
                let Some(pending) = self.pending.as_mut() else {
                    return Ok(None);
                };
                let end = offset.saturating_add(bytes.len());
                if end <= self.payload_offset {
                    return Ok(None);
                }
                let skip = self.payload_offset.saturating_sub(offset);
                pending.buffer.extend_from_slice(&bytes[skip..]);
                let actual = pending.buffer.len();
                let expected = pending.expected;
                if actual > expected {
                    self.pending = None;
                    return Err(ReassemblyError::Overrun { expected, actual });
                }
                if actual == expected {
                    return Ok(self.take_complete());
                }
                Ok(None)
            }
        }
    }

    /// Bytes accumulated for the packet in flight.
    pub fn buffered(&self) -> usize {
        self.pending.as_ref().map_or(0, |p| p.buffer.len())
    }

    fn take_complete(&mut self) -> Option<Payload> {
        self.pending.take().map(|p| Payload {
            source: p.source,
            bytes: p.buffer,
        })
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Capture data inconsistent with the declared packet length.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("expected {expected} payload bytes but got {actual}")]
    Overrun { expected: usize, actual: usize },
}
