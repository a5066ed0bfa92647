//! CRC-64-ISO footers for artifact files

use std::io::{self, Write};

use crc::{Crc, CRC_64_GO_ISO};

/// CRC-64-ISO algorithm
pub static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

/// Compute CRC-64 checksum for a byte slice
pub fn checksum(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

/// Writer that checksums and counts every byte passed through it
pub struct ChecksumWriter<W: Write> {
    inner: W,
    digest: crc::Digest<'static, u64>,
    position: u64,
}

impl<W: Write> ChecksumWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            digest: CRC64.digest(),
            position: 0,
        }
    }

    /// Bytes written so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Write zero bytes until the position is a multiple of `align`
    pub fn pad_to(&mut self, align: u64) -> io::Result<()> {
        let rem = self.position % align;
        if rem != 0 {
            let zeros = [0u8; 8];
            self.write_all(&zeros[..(align - rem) as usize])?;
        }
        Ok(())
    }

    /// Return the inner writer and the checksum of everything written
    pub fn finish(self) -> (W, u64) {
        (self.inner, self.digest.finalize())
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.digest.update(&buf[..n]);
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
