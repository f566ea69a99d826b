use std::io::{self, Read};

use crate::error::WireError;

/// Bytes pulled from the underlying stream per refill.
const CHUNK: usize = 64 * 1024;

/// Blocking exact-count reads over a byte-oriented stream.
///
/// Maintains one growing buffer with a consume cursor; `read_exact` blocks
/// until the requested count is buffered and returns a slice valid until the
/// next call. Fails with [`WireError::ConnectionClosed`] when the peer closes
/// before enough bytes arrive. No timeouts at this layer.
pub struct BufferedStream<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
}

impl<R: Read> BufferedStream<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, buf: Vec::new(), pos: 0 }
    }

    /// Blocks until `count` bytes are available and returns them.
    pub fn read_exact(&mut self, count: usize) -> Result<&[u8], WireError> {
        while self.buf.len() - self.pos < count {
            self.fill()?;
        }
        let start = self.pos;
        self.pos += count;
        Ok(&self.buf[start..start + count])
    }

    fn fill(&mut self) -> Result<(), WireError> {
        // Drop consumed bytes before growing further.
        if self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        } else if self.pos >= CHUNK {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }

        let used = self.buf.len();
        self.buf.resize(used + CHUNK, 0);
        let got = loop {
            match self.inner.read(&mut self.buf[used..]) {
                Ok(n) => break n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.buf.truncate(used);
                    return Err(WireError::Io(e));
                }
            }
        };
        self.buf.truncate(used + got);
        if got == 0 { Err(WireError::ConnectionClosed) } else { Ok(()) }
    }
}
