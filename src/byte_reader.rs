//! Buffered byte source for the deflate decoder.
//!
//! The decoder consumes its input strictly forward, one byte at a time for
//! bit refills and in bulk for stored blocks. `ByteReader` wraps any `Read`
//! with a fixed internal buffer and counts every byte handed out, so the
//! gzip framer can measure header length and the extract path can position
//! a fresh reader anywhere in the file.

use std::io::{self, Read};

const BUF_SIZE: usize = 8192;

#[derive(Debug)]
pub struct ByteReader<R> {
    inner: R,
    buf: Box<[u8]>,
    pos: usize,
    cap: usize,
    offset: u64,
}

impl<R: Read> ByteReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: vec![0u8; BUF_SIZE].into_boxed_slice(),
            pos: 0,
            cap: 0,
            offset: 0,
        }
    }

    /// Bytes handed out so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read one byte. End of input is reported as `UnexpectedEof`: the
    /// decoder only asks for a byte when the stream promises one.
    pub fn read_byte(&mut self) -> io::Result<u8> {
        if self.pos == self.cap {
            self.fill()?;
            if self.cap == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected end of input",
                ));
            }
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        self.offset += 1;
        Ok(b)
    }

    /// Fill `out` completely, draining buffered bytes first.
    pub fn read_full(&mut self, out: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < out.len() {
            if self.pos == self.cap {
                self.fill()?;
                if self.cap == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "unexpected end of input",
                    ));
                }
            }
            let n = (out.len() - filled).min(self.cap - self.pos);
            out[filled..filled + n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            filled += n;
            self.offset += n as u64;
        }
        Ok(())
    }

    fn fill(&mut self) -> io::Result<()> {
        self.pos = 0;
        self.cap = 0;
        loop {
            match self.inner.read(&mut self.buf) {
                Ok(n) => {
                    self.cap = n;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
