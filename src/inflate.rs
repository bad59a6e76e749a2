//! Resumable DEFLATE (RFC 1951) decoder.
//!
//! Unlike a streaming-only inflater, every piece of decoder state lives in
//! named fields rather than local variables: the bit accumulator, both
//! Huffman tables, the 32 KiB history ring with its flush watermarks, and
//! an in-progress back-reference. The next continuation to run is a `Step`
//! value, so the decoder can be suspended after any flush, deep-copied, and
//! later rebuilt over a reader positioned at the matching input offset.
//!
//! The decoder suspends whenever it flushes output: `flush` records the
//! pending `hist` range in `to_read`, and `read`/`read_block` only run the
//! next step once that range is drained. Errors are sticky; normal end of
//! stream is the sticky `Eof` status.

use std::io::Read;
use std::ops::Range;

use crate::byte_reader::ByteReader;
use crate::error::{GzseekError, GzseekResult};
use crate::huffman::{
    fixed_literal_table, reverse_bits, HuffmanTable, HUFFMAN_CHUNK_BITS, HUFFMAN_COUNT_MASK,
    HUFFMAN_NUM_CHUNKS, HUFFMAN_VALUE_SHIFT,
};

// =============================================================================
// Constants (RFC 1951 §3.2.7)
// =============================================================================

/// History window size.
pub const MAX_HIST: usize = 32768;
/// Number of literal/length codes.
pub const MAX_LIT: usize = 286;
/// Number of distance codes.
pub const MAX_DIST: usize = 32;
/// Number of codes in the code-length meta-code.
pub const NUM_CODES: usize = 19;

/// Order in which code-length code lengths appear in a dynamic block header.
const CODE_ORDER: [usize; NUM_CODES] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// The continuation to run when the decoder resumes. Stored as data rather
/// than control flow so a snapshot can carry it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Read the next 3-bit block header.
    NextBlock,
    /// Continue decoding symbols in a compressed block.
    HuffmanBlock,
    /// Finish an interrupted history copy, then continue the block.
    CopyHuff,
    /// Continue copying a stored block's raw bytes.
    CopyData,
}

/// Which table the decoder is currently decoding against. Selectors are
/// resolved against the decoder's own fields (or the fixed static) at every
/// lookup, so copying a selector into a snapshot keeps it pointing at the
/// snapshot's tables rather than at a detached clone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableRef {
    /// No table selected (fixed-block distances use 5 raw bits).
    None,
    /// The decoder's own literal/length table `h1`.
    Lit,
    /// The decoder's own distance table `h2`.
    Dist,
    /// The static fixed literal/length table.
    Fixed,
}

// =============================================================================
// Decoder state
// =============================================================================

#[derive(Debug)]
pub struct FlateDecoder<R> {
    pub(crate) r: ByteReader<R>,
    /// Compressed bytes consumed. Restored from a snapshot on resume, not
    /// derived from the fresh reader.
    pub(crate) r_offset: u64,
    /// Uncompressed bytes flushed.
    pub(crate) w_offset: u64,

    // Input bits, low-order first.
    pub(crate) bit_buf: u32,
    pub(crate) nb: u32,

    // Huffman tables for literal/length and distance codes.
    pub(crate) h1: HuffmanTable,
    pub(crate) h2: HuffmanTable,

    // Code-length scratch arrays reused across dynamic blocks.
    pub(crate) bits: Box<[u32; MAX_LIT + MAX_DIST]>,
    pub(crate) codebits: [u32; NUM_CODES],

    // Output history ring.
    pub(crate) hist: Box<[u8; MAX_HIST]>,
    /// Current write position in `hist`.
    pub(crate) hp: usize,
    /// `hist[..hw]` has already been flushed.
    pub(crate) hw: usize,
    /// The ring has wrapped at least once.
    pub(crate) hfull: bool,

    /// Stored-block length scratch.
    pub(crate) buf: [u8; 4],

    pub(crate) step: Step,
    /// The current block carried the final-block bit.
    pub(crate) final_block: bool,
    /// Sticky terminal status; `Eof` for a normal end.
    pub(crate) err: Option<GzseekError>,
    /// Flushed bytes in `hist` not yet delivered to the consumer.
    pub(crate) to_read: Range<usize>,

    pub(crate) hl: TableRef,
    pub(crate) hd: TableRef,

    // In-progress back-reference or stored copy.
    pub(crate) copy_len: usize,
    pub(crate) copy_dist: usize,
}

impl<R: Read> FlateDecoder<R> {
    pub fn new(r: ByteReader<R>) -> Self {
        Self {
            r,
            r_offset: 0,
            w_offset: 0,
            bit_buf: 0,
            nb: 0,
            h1: HuffmanTable::new(),
            h2: HuffmanTable::new(),
            bits: Box::new([0; MAX_LIT + MAX_DIST]),
            codebits: [0; NUM_CODES],
            hist: Box::new([0; MAX_HIST]),
            hp: 0,
            hw: 0,
            hfull: false,
            buf: [0; 4],
            step: Step::NextBlock,
            final_block: false,
            err: None,
            to_read: 0..0,
            hl: TableRef::None,
            hd: TableRef::None,
            copy_len: 0,
            copy_dist: 0,
        }
    }

    /// Copy uncompressed bytes into `out`. Runs decoder steps until some
    /// flushed output is available, then returns however much fits.
    pub fn read(&mut self, out: &mut [u8]) -> GzseekResult<usize> {
        loop {
            if self.to_read.start < self.to_read.end {
                let n = out.len().min(self.to_read.end - self.to_read.start);
                out[..n].copy_from_slice(&self.hist[self.to_read.start..self.to_read.start + n]);
                self.to_read.start += n;
                return Ok(n);
            }
            if let Some(err) = &self.err {
                return Err(err.clone());
            }
            self.advance();
        }
    }

    /// Return one whole flushed span of output. The index pass uses this so
    /// every span boundary it sees is a decoder suspension point.
    pub fn read_block(&mut self) -> GzseekResult<Vec<u8>> {
        loop {
            if self.to_read.start < self.to_read.end {
                let block = self.hist[self.to_read.start..self.to_read.end].to_vec();
                self.to_read.start = self.to_read.end;
                return Ok(block);
            }
            if let Some(err) = &self.err {
                return Err(err.clone());
            }
            self.advance();
        }
    }

    fn advance(&mut self) {
        match self.step {
            Step::NextBlock => self.next_block(),
            Step::HuffmanBlock => self.huffman_block(),
            Step::CopyHuff => self.copy_huff(),
            Step::CopyData => self.copy_data(),
        }
    }

    // =========================================================================
    // Block dispatch
    // =========================================================================

    fn next_block(&mut self) {
        if self.final_block {
            if self.hw != self.hp {
                self.flush(Step::NextBlock);
                return;
            }
            self.err = Some(GzseekError::Eof);
            return;
        }
        while self.nb < 1 + 2 {
            if let Err(e) = self.more_bits() {
                self.err = Some(e);
                return;
            }
        }
        self.final_block = self.bit_buf & 1 == 1;
        self.bit_buf >>= 1;
        let typ = self.bit_buf & 3;
        self.bit_buf >>= 2;
        self.nb -= 1 + 2;
        match typ {
            0 => self.data_block(),
            1 => {
                // Compressed, fixed Huffman tables.
                self.hl = TableRef::Fixed;
                self.hd = TableRef::None;
                self.huffman_block();
            }
            2 => {
                // Compressed, dynamic Huffman tables.
                if let Err(e) = self.read_huffman() {
                    self.err = Some(e);
                    return;
                }
                self.hl = TableRef::Lit;
                self.hd = TableRef::Dist;
                self.huffman_block();
            }
            _ => {
                // Type 3 is reserved.
                self.err = Some(GzseekError::CorruptInput(self.r_offset));
            }
        }
    }

    /// Parse a dynamic block's table definition (RFC 1951 §3.2.7) and build
    /// `h1`/`h2`. `h1` doubles as the code-length meta-table while the
    /// definition itself is being decoded.
    fn read_huffman(&mut self) -> GzseekResult<()> {
        // HLIT[5], HDIST[5], HCLEN[4].
        while self.nb < 5 + 5 + 4 {
            self.more_bits()?;
        }
        let nlit = (self.bit_buf & 0x1F) as usize + 257;
        if nlit > MAX_LIT {
            return Err(GzseekError::CorruptInput(self.r_offset));
        }
        self.bit_buf >>= 5;
        let ndist = (self.bit_buf & 0x1F) as usize + 1;
        // ndist caps at 32, always within MAX_DIST.
        self.bit_buf >>= 5;
        let nclen = (self.bit_buf & 0xF) as usize + 4;
        self.bit_buf >>= 4;
        self.nb -= 5 + 5 + 4;

        // (HCLEN+4) code lengths of 3 bits each, in CODE_ORDER order.
        for i in 0..nclen {
            while self.nb < 3 {
                self.more_bits()?;
            }
            self.codebits[CODE_ORDER[i]] = self.bit_buf & 0x7;
            self.bit_buf >>= 3;
            self.nb -= 3;
        }
        for i in nclen..CODE_ORDER.len() {
            self.codebits[CODE_ORDER[i]] = 0;
        }
        if !self.h1.init(&self.codebits) {
            return Err(GzseekError::CorruptInput(self.r_offset));
        }

        // HLIT + HDIST code lengths, decoded with the meta-table.
        let total = nlit + ndist;
        let mut i = 0;
        while i < total {
            let x = self.huff_sym(TableRef::Lit)?;
            if x < 16 {
                self.bits[i] = x;
                i += 1;
                continue;
            }
            // Repeat previous length or zeros.
            let (mut rep, nb, b): (usize, u32, u32) = match x {
                16 => {
                    if i == 0 {
                        return Err(GzseekError::CorruptInput(self.r_offset));
                    }
                    (3, 2, self.bits[i - 1])
                }
                17 => (3, 3, 0),
                18 => (11, 7, 0),
                _ => return Err(GzseekError::Internal("unexpected length code")),
            };
            while self.nb < nb {
                self.more_bits()?;
            }
            rep += (self.bit_buf & ((1 << nb) - 1)) as usize;
            self.bit_buf >>= nb;
            self.nb -= nb;
            if i + rep > total {
                return Err(GzseekError::CorruptInput(self.r_offset));
            }
            for _ in 0..rep {
                self.bits[i] = b;
                i += 1;
            }
        }

        if !self.h1.init(&self.bits[0..nlit]) || !self.h2.init(&self.bits[nlit..nlit + ndist]) {
            return Err(GzseekError::CorruptInput(self.r_offset));
        }
        Ok(())
    }

    // =========================================================================
    // Compressed blocks
    // =========================================================================

    fn huffman_block(&mut self) {
        loop {
            let v = match self.huff_sym(self.hl) {
                Ok(v) => v,
                Err(e) => {
                    self.err = Some(e);
                    return;
                }
            };

            if v < 256 {
                self.hist[self.hp] = v as u8;
                self.hp += 1;
                if self.hp == MAX_HIST {
                    // Ring full; flush and resume this loop afterwards.
                    self.flush(Step::HuffmanBlock);
                    return;
                }
                continue;
            }
            if v == 256 {
                // End of block.
                self.step = Step::NextBlock;
                return;
            }

            // Length code 257..285 (RFC 1951 §3.2.5).
            let (mut length, n): (usize, u32) = if v < 265 {
                ((v - 254) as usize, 0)
            } else if v < 269 {
                ((v * 2 - 519) as usize, 1)
            } else if v < 273 {
                ((v * 4 - 1057) as usize, 2)
            } else if v < 277 {
                ((v * 8 - 2149) as usize, 3)
            } else if v < 281 {
                ((v * 16 - 4365) as usize, 4)
            } else if v < 285 {
                ((v * 32 - 8861) as usize, 5)
            } else {
                (258, 0)
            };
            if n > 0 {
                while self.nb < n {
                    if let Err(e) = self.more_bits() {
                        self.err = Some(e);
                        return;
                    }
                }
                length += (self.bit_buf & ((1 << n) - 1)) as usize;
                self.bit_buf >>= n;
                self.nb -= n;
            }

            let mut dist = if self.hd == TableRef::None {
                // Fixed blocks: 5 raw bits, most-significant first.
                while self.nb < 5 {
                    if let Err(e) = self.more_bits() {
                        self.err = Some(e);
                        return;
                    }
                }
                let d = reverse_bits(self.bit_buf & 0x1F, 5);
                self.bit_buf >>= 5;
                self.nb -= 5;
                d
            } else {
                match self.huff_sym(self.hd) {
                    Ok(d) => d,
                    Err(e) => {
                        self.err = Some(e);
                        return;
                    }
                }
            };

            if dist < 4 {
                dist += 1;
            } else if dist >= 30 {
                self.err = Some(GzseekError::CorruptInput(self.r_offset));
                return;
            } else {
                let nb = (dist - 2) >> 1;
                // One distance bit is already in the code; read nb more.
                let mut extra = (dist & 1) << nb;
                while self.nb < nb {
                    if let Err(e) = self.more_bits() {
                        self.err = Some(e);
                        return;
                    }
                }
                extra |= self.bit_buf & ((1 << nb) - 1);
                self.bit_buf >>= nb;
                self.nb -= nb;
                dist = (1 << (nb + 1)) + 1 + extra;
            }

            if dist as usize > MAX_HIST {
                self.err = Some(GzseekError::Internal("bad history distance"));
                return;
            }
            // No check on length; the encoding can be prescient.
            if !self.hfull && dist as usize > self.hp {
                self.err = Some(GzseekError::CorruptInput(self.r_offset));
                return;
            }

            self.copy_len = length;
            self.copy_dist = dist as usize;
            if self.copy_hist() {
                return;
            }
        }
    }

    /// Copy `copy_len` bytes from `copy_dist` bytes back in the ring to the
    /// write position, splitting at ring edges. Returns true when the ring
    /// filled and the decoder flushed (resume via `CopyHuff`).
    fn copy_hist(&mut self) -> bool {
        let mut p = if self.hp >= self.copy_dist {
            self.hp - self.copy_dist
        } else {
            self.hp + MAX_HIST - self.copy_dist
        };
        while self.copy_len > 0 {
            let mut n = self.copy_len;
            n = n.min(MAX_HIST - self.hp);
            n = n.min(MAX_HIST - p);
            forward_copy(&mut self.hist[..], self.hp, p, n);
            p += n;
            self.hp += n;
            self.copy_len -= n;
            if self.hp == MAX_HIST {
                self.flush(Step::CopyHuff);
                return true;
            }
            if p == MAX_HIST {
                p = 0;
            }
        }
        false
    }

    fn copy_huff(&mut self) {
        if self.copy_hist() {
            return;
        }
        self.huffman_block();
    }

    // =========================================================================
    // Stored blocks
    // =========================================================================

    fn data_block(&mut self) {
        // Stored blocks are byte-aligned; discard the partial byte.
        self.nb = 0;
        self.bit_buf = 0;

        // Length then ones-complement of length.
        if let Err(e) = self.r.read_full(&mut self.buf) {
            self.err = Some(GzseekError::read_at(self.r_offset, e));
            return;
        }
        self.r_offset += 4;
        let n = self.buf[0] as u32 | (self.buf[1] as u32) << 8;
        let nn = self.buf[2] as u32 | (self.buf[3] as u32) << 8;
        if nn as u16 != !(n as u16) {
            self.err = Some(GzseekError::CorruptInput(self.r_offset));
            return;
        }

        if n == 0 {
            // Zero-length stored block is a sync marker.
            self.flush(Step::NextBlock);
            return;
        }

        self.copy_len = n as usize;
        self.copy_data();
    }

    /// Copy stored-block bytes straight into the ring, pausing to flush
    /// whenever it fills.
    fn copy_data(&mut self) {
        let mut n = self.copy_len;
        while n > 0 {
            let m = n.min(MAX_HIST - self.hp);
            if let Err(e) = self.r.read_full(&mut self.hist[self.hp..self.hp + m]) {
                self.err = Some(GzseekError::read_at(self.r_offset, e));
                return;
            }
            self.r_offset += m as u64;
            n -= m;
            self.hp += m;
            if self.hp == MAX_HIST {
                self.copy_len = n;
                self.flush(Step::CopyData);
                return;
            }
        }
        self.step = Step::NextBlock;
    }

    // =========================================================================
    // Bits and flushing
    // =========================================================================

    fn more_bits(&mut self) -> GzseekResult<()> {
        match self.r.read_byte() {
            Ok(c) => {
                self.r_offset += 1;
                self.bit_buf |= (c as u32) << self.nb;
                self.nb += 8;
                Ok(())
            }
            Err(e) => Err(GzseekError::read_at(self.r_offset, e)),
        }
    }

    /// Decode one Huffman symbol against the selected table.
    fn huff_sym(&mut self, sel: TableRef) -> GzseekResult<u32> {
        let mut n = match sel {
            TableRef::Lit => self.h1.min,
            TableRef::Dist => self.h2.min,
            TableRef::Fixed => fixed_literal_table().min,
            TableRef::None => return Err(GzseekError::Internal("no huffman table selected")),
        };
        loop {
            while self.nb < n {
                self.more_bits()?;
            }
            let (value, width) = {
                let t = match sel {
                    TableRef::Lit => &self.h1,
                    TableRef::Dist => &self.h2,
                    _ => fixed_literal_table(),
                };
                let mut chunk = t.chunks[self.bit_buf as usize & (HUFFMAN_NUM_CHUNKS - 1)];
                let mut w = chunk & HUFFMAN_COUNT_MASK;
                if w > HUFFMAN_CHUNK_BITS {
                    let link = &t.links[(chunk >> HUFFMAN_VALUE_SHIFT) as usize];
                    chunk = link[(self.bit_buf >> HUFFMAN_CHUNK_BITS & t.link_mask) as usize];
                    w = chunk & HUFFMAN_COUNT_MASK;
                }
                (chunk >> HUFFMAN_VALUE_SHIFT, w)
            };
            if width == 0 {
                return Err(GzseekError::CorruptInput(self.r_offset));
            }
            if width <= self.nb {
                self.bit_buf >>= width;
                self.nb -= width;
                return Ok(value);
            }
            n = width;
        }
    }

    /// Expose `hist[hw..hp]` to the consumer and advance the watermark,
    /// wrapping the ring when the write position hits the end. The decoder
    /// stays suspended at `next` until `to_read` is drained.
    fn flush(&mut self, next: Step) {
        self.to_read = self.hw..self.hp;
        self.w_offset += (self.hp - self.hw) as u64;
        self.hw = self.hp;
        if self.hp == MAX_HIST {
            self.hp = 0;
            self.hw = 0;
            self.hfull = true;
        }
        self.step = next;
    }
}

/// Forward byte-order copy inside the ring: overlapping back-references
/// must re-read bytes written earlier in the same copy.
fn forward_copy(hist: &mut [u8], dst: usize, src: usize, n: usize) {
    if dst <= src {
        hist.copy_within(src..src + n, dst);
    } else {
        for i in 0..n {
            hist[dst + i] = hist[src + i];
        }
    }
}
