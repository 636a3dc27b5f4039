//! Byte-stream bridge for engine images.
//!
//! Engines serialize themselves through the two callback traits below rather than
//! through `std::io` directly, so the same image can land in a file, a `Vec<u8>`,
//! or a buffer owned by a foreign caller. Both traits count **bytes**.
//!
//! Framed sections are laid out as: `[length: u64][crc32: u32][payload]`, little-endian.

use crate::error::{AdapterError, Result};
use std::io::{self, Read, Write};

/// Sink side of the engine's binary I/O protocol.
pub trait IoWriter {
    /// Write every byte of `buf`, returning the number of bytes written.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// Source side of the engine's binary I/O protocol.
pub trait IoReader {
    /// Fill `buf` from the stream, returning the number of bytes read.
    /// Fewer than `buf.len()` bytes means end of stream was reached.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Adapts any `std::io::Write` into an [`IoWriter`].
pub struct StreamWriter<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    /// Total bytes pushed through this writer.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Flush and return the underlying stream.
    pub fn into_inner(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> IoWriter for StreamWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write_all(buf)?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }
}

/// Adapts any `std::io::Read` into an [`IoReader`].
pub struct StreamReader<R: Read> {
    inner: R,
    read: u64,
}

impl<R: Read> StreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, read: 0 }
    }

    /// Total bytes pulled through this reader.
    pub fn bytes_read(&self) -> u64 {
        self.read
    }
}

impl<R: Read> IoReader for StreamReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.read += filled as u64;
        Ok(filled)
    }
}

/// Write all of `bytes`, failing if the sink reports a short write.
pub fn write_all(writer: &mut dyn IoWriter, bytes: &[u8]) -> Result<()> {
    let n = writer.write(bytes)?;
    if n != bytes.len() {
        return Err(AdapterError::IoError(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short write: {} of {} bytes", n, bytes.len()),
        )));
    }
    Ok(())
}

/// Read exactly `buf.len()` bytes; a short read means the image is truncated.
pub fn read_exact(reader: &mut dyn IoReader, buf: &mut [u8]) -> Result<()> {
    let n = reader.read(buf)?;
    if n != buf.len() {
        return Err(AdapterError::CorruptImage(format!(
            "truncated stream: wanted {} bytes, got {}",
            buf.len(),
            n
        )));
    }
    Ok(())
}

/// Write one checksummed frame.
pub fn write_frame(writer: &mut dyn IoWriter, payload: &[u8]) -> Result<()> {
    let crc = crc32fast::hash(payload);
    write_all(writer, &(payload.len() as u64).to_le_bytes())?;
    write_all(writer, &crc.to_le_bytes())?;
    write_all(writer, payload)
}

const READ_CHUNK: usize = 1 << 20;

/// Read one checksummed frame, rejecting frames longer than `max_len`.
pub fn read_frame(reader: &mut dyn IoReader, max_len: u64) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 8];
    read_exact(reader, &mut len_buf)?;
    let len = u64::from_le_bytes(len_buf);
    if len > max_len {
        return Err(AdapterError::CorruptImage(format!(
            "frame length {len} exceeds limit {max_len}"
        )));
    }

    let mut crc_buf = [0u8; 4];
    read_exact(reader, &mut crc_buf)?;
    let expected_crc = u32::from_le_bytes(crc_buf);

    // Grow the payload chunk by chunk so a bogus length fails on the
    // first short read rather than on allocation.
    let len = usize::try_from(len)
        .map_err(|_| AdapterError::CorruptImage(format!("frame length {len} too large")))?;
    let mut payload = Vec::with_capacity(len.min(READ_CHUNK));
    while payload.len() < len {
        let start = payload.len();
        let step = (len - start).min(READ_CHUNK);
        payload.resize(start + step, 0);
        read_exact(reader, &mut payload[start..])?;
    }

    let actual_crc = crc32fast::hash(&payload);
    if actual_crc != expected_crc {
        return Err(AdapterError::CorruptImage(format!(
            "checksum mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"
        )));
    }
    Ok(payload)
}

/// Encode a value with bincode into a single frame.
pub fn write_bincode_frame<T: serde::Serialize>(
    writer: &mut dyn IoWriter,
    value: &T,
) -> Result<()> {
    let payload =
        bincode::serialize(value).map_err(|e| AdapterError::SerializationError(e.to_string()))?;
    write_frame(writer, &payload)
}

/// Decode a value from a single bincode frame.
pub fn read_bincode_frame<T: serde::de::DeserializeOwned>(
    reader: &mut dyn IoReader,
    max_len: u64,
) -> Result<T> {
    let payload = read_frame(reader, max_len)?;
    bincode::deserialize(&payload).map_err(|e| AdapterError::SerializationError(e.to_string()))
}
