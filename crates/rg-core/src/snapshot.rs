//! Fixed-size state snapshot codec
//!
//! A snapshot blob is always exactly [`STATE_MEM_SIZE`] bytes. Blobs written
//! by this build carry a 16-byte header followed by the guest payload and
//! zero padding:
//!
//! | offset | size | field                              |
//! |--------|------|------------------------------------|
//! | 0      | 4    | magic `RGBA`                       |
//! | 4      | 2    | format version (LE)                |
//! | 6      | 2    | flags (LE, currently 0)            |
//! | 8      | 4    | payload length (LE)                |
//! | 12     | 4    | reserved                           |
//!
//! A blob that does not start with the magic is a legacy raw blob: the whole
//! buffer is handed to the guest as-is. Restoring a legacy blob produced by
//! a different engine build is undefined.

use crate::error::SnapshotError;
use bytemuck::{Pod, Zeroable};

/// Size of every snapshot blob
pub const STATE_MEM_SIZE: usize = 416 * 1024;

/// Envelope magic
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"RGBA";

/// Envelope format version written by this build
pub const SNAPSHOT_VERSION: u16 = 1;

/// Envelope header size
pub const HEADER_SIZE: usize = std::mem::size_of::<SnapshotHeader>();

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SnapshotHeader {
    magic: [u8; 4],
    version: u16,
    flags: u16,
    payload_len: u32,
    reserved: u32,
}

/// Layout detected in a snapshot blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    /// Header + payload
    Versioned { version: u16, payload_len: usize },
    /// Headerless guest state filling the whole blob
    LegacyRaw,
}

/// State that can be captured into and replaced from a snapshot payload
pub trait Snapshottable {
    /// Write the full state into `out`, returning the number of bytes used
    fn save_state(&self, out: &mut [u8]) -> Result<usize, SnapshotError>;

    /// Replace the full state from `data`.
    ///
    /// Implementations must validate `data` completely before mutating
    /// anything, so that a failed load leaves the state untouched.
    fn load_state(&mut self, data: &[u8]) -> Result<(), SnapshotError>;
}

/// Serializer/deserializer for fixed-size snapshot blobs
#[derive(Debug, Clone, Copy)]
pub struct SnapshotCodec {
    size: usize,
}

impl SnapshotCodec {
    /// Create a codec for blobs of `size` bytes
    pub fn new(size: usize) -> Self {
        assert!(size > HEADER_SIZE, "snapshot size must exceed the header");
        Self { size }
    }

    /// Fixed length of a valid blob
    pub fn size(&self) -> usize {
        self.size
    }

    /// Largest payload a versioned blob can carry
    pub fn payload_capacity(&self) -> usize {
        self.size - HEADER_SIZE
    }

    fn check_len(&self, actual: usize) -> Result<(), SnapshotError> {
        if actual != self.size {
            return Err(SnapshotError::LengthMismatch {
                expected: self.size,
                actual,
            });
        }
        Ok(())
    }

    /// Capture `source` into `buffer`.
    ///
    /// `buffer` is only written once the payload has been produced
    /// successfully; it is then zero-filled and fully overwritten.
    pub fn serialize<S: Snapshottable + ?Sized>(
        &self,
        source: &S,
        buffer: &mut [u8],
    ) -> Result<(), SnapshotError> {
        self.check_len(buffer.len())?;

        let mut payload = vec![0u8; self.payload_capacity()];
        let used = source.save_state(&mut payload)?;
        if used > payload.len() {
            return Err(SnapshotError::PayloadTooLarge(used));
        }

        let header = SnapshotHeader {
            magic: SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION.to_le(),
            flags: 0,
            payload_len: (used as u32).to_le(),
            reserved: 0,
        };

        buffer.fill(0);
        buffer[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
        buffer[HEADER_SIZE..HEADER_SIZE + used].copy_from_slice(&payload[..used]);

        tracing::debug!("Serialized snapshot ({} payload bytes)", used);
        Ok(())
    }

    /// Identify the layout of `buffer` without touching any state
    pub fn inspect(&self, buffer: &[u8]) -> Result<SnapshotFormat, SnapshotError> {
        self.check_len(buffer.len())?;

        if buffer[..4] != SNAPSHOT_MAGIC {
            return Ok(SnapshotFormat::LegacyRaw);
        }

        let header: SnapshotHeader = bytemuck::pod_read_unaligned(&buffer[..HEADER_SIZE]);
        let version = u16::from_le(header.version);
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: version,
            });
        }

        let payload_len = u32::from_le(header.payload_len) as usize;
        if payload_len > self.payload_capacity() {
            return Err(SnapshotError::Corrupt(format!(
                "payload length {} exceeds capacity {}",
                payload_len,
                self.payload_capacity()
            )));
        }

        Ok(SnapshotFormat::Versioned {
            version,
            payload_len,
        })
    }

    /// Replace the state of `target` from `buffer`
    pub fn restore<S: Snapshottable + ?Sized>(
        &self,
        target: &mut S,
        buffer: &[u8],
    ) -> Result<SnapshotFormat, SnapshotError> {
        let format = self.inspect(buffer)?;

        match format {
            SnapshotFormat::Versioned { payload_len, .. } => {
                target.load_state(&buffer[HEADER_SIZE..HEADER_SIZE + payload_len])?;
            }
            SnapshotFormat::LegacyRaw => {
                tracing::warn!("Restoring headerless legacy snapshot");
                target.load_state(buffer)?;
            }
        }

        tracing::debug!("Restored snapshot ({:?})", format);
        Ok(format)
    }
}

impl Default for SnapshotCodec {
    fn default() -> Self {
        Self::new(STATE_MEM_SIZE)
    }
}

/// Little-endian cursor for writing a state payload
pub struct StateWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> StateWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), SnapshotError> {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(SnapshotError::PayloadTooLarge(end));
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    pub fn put_u8(&mut self, value: u8) -> Result<(), SnapshotError> {
        self.put_bytes(&[value])
    }

    pub fn put_u16(&mut self, value: u16) -> Result<(), SnapshotError> {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_u32(&mut self, value: u32) -> Result<(), SnapshotError> {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_u64(&mut self, value: u64) -> Result<(), SnapshotError> {
        self.put_bytes(&value.to_le_bytes())
    }
}

/// Little-endian cursor for reading a state payload
pub struct StateReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> StateReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn get_bytes(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        let end = self.pos + len;
        if end > self.buf.len() {
            return Err(SnapshotError::Corrupt(format!(
                "truncated payload: need {} bytes at offset {}, have {}",
                len,
                self.pos,
                self.buf.len()
            )));
        }
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn get_array<const N: usize>(&mut self) -> Result<[u8; N], SnapshotError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.get_bytes(N)?);
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.get_array::<1>()?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, SnapshotError> {
        Ok(u16::from_le_bytes(self.get_array()?))
    }

    pub fn get_u32(&mut self) -> Result<u32, SnapshotError> {
        Ok(u32::from_le_bytes(self.get_array()?))
    }

    pub fn get_u64(&mut self) -> Result<u64, SnapshotError> {
        Ok(u64::from_le_bytes(self.get_array()?))
    }
}
