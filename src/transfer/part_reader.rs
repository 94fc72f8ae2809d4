use std::io::{self, Read, Seek, SeekFrom};

use super::PartWindow;

const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Read-only view over at most `part_length` bytes of an underlying stream.
///
/// Never seeks or closes the source after construction; the counter only moves forward.
#[derive(Debug)]
pub struct PartReader<R> {
    inner: R,
    part_length: u64,
    consumed: u64,
}

impl<R: Read> PartReader<R> {
    pub fn new(inner: R, part_length: u64) -> Self {
        Self {
            inner,
            part_length,
            consumed: 0,
        }
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn remaining(&self) -> u64 {
        self.part_length - self.consumed
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Reads the rest of the window into memory, failing if the source ends early.
    pub fn read_part(&mut self) -> io::Result<Vec<u8>> {
        let expected = self.remaining();
        let mut buf = Vec::with_capacity(usize::try_from(expected.min(MAX_PREALLOC)).unwrap_or(0));
        self.read_to_end(&mut buf)?;
        if (buf.len() as u64) < expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "source ended {} bytes before the end of the part",
                    expected - buf.len() as u64
                ),
            ));
        }
        Ok(buf)
    }
}

impl<R: Read + Seek> PartReader<R> {
    /// Positions `source` at the window start and bounds reads to the window length.
    pub fn window(mut source: R, window: &PartWindow) -> io::Result<Self> {
        source.seek(SeekFrom::Start(window.offset))?;
        Ok(Self::new(source, window.length))
    }
}

impl<R: Read> Read for PartReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining();
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let limit = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let n = self.inner.read(&mut buf[..limit])?;
        self.consumed += n as u64;
        Ok(n)
    }
}
