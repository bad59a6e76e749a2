//! Access points and random extraction.
//!
//! `build_index` decodes the whole first gzip stream once, snapshotting the
//! inflater wherever it last suspended after each `SPAN` bytes of output.
//! A `Point` deep-copies every piece of decoder state, so `extract` can
//! seek the compressed file to the recorded offset, rebuild a decoder in
//! the identical state, and produce bytes from any uncompressed offset
//! after decoding at most one span's worth of prefix.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::byte_reader::ByteReader;
use crate::error::{GzseekError, GzseekResult};
use crate::gunzip::{read_header, GzipReader};
use crate::huffman::HuffmanTable;
use crate::inflate::{FlateDecoder, Step, TableRef, MAX_DIST, MAX_HIST, MAX_LIT, NUM_CODES};

/// Nominal uncompressed distance between access points. Larger spans trade
/// extraction speed for index memory.
pub const SPAN: u64 = 1 << 20;

/// A deep snapshot of the inflater at one suspension point.
///
/// `hl`/`hd` are table selectors, not pointers, so a snapshot's active
/// tables are its own `h1`/`h2` copies (or the fixed static) both here and
/// after rehydration; the live decoder's aliasing carries over untouched.
#[derive(Debug)]
pub struct Point {
    pub(crate) r_offset: u64,
    pub(crate) w_offset: u64,

    pub(crate) bit_buf: u32,
    pub(crate) nb: u32,

    pub(crate) h1: HuffmanTable,
    pub(crate) h2: HuffmanTable,

    pub(crate) bits: Box<[u32; MAX_LIT + MAX_DIST]>,
    pub(crate) codebits: [u32; NUM_CODES],

    pub(crate) hist: Box<[u8; MAX_HIST]>,
    pub(crate) hp: usize,
    pub(crate) hw: usize,
    pub(crate) hfull: bool,

    pub(crate) buf: [u8; 4],

    pub(crate) step: Step,
    pub(crate) final_block: bool,
    pub(crate) err: Option<GzseekError>,

    pub(crate) hl: TableRef,
    pub(crate) hd: TableRef,

    pub(crate) copy_len: usize,
    pub(crate) copy_dist: usize,
}

impl Point {
    /// Compressed payload bytes consumed up to this point (relative to the
    /// end of the gzip header).
    pub fn r_offset(&self) -> u64 {
        self.r_offset
    }

    /// Uncompressed bytes produced before this point.
    pub fn w_offset(&self) -> u64 {
        self.w_offset
    }

    fn capture<R: Read>(d: &FlateDecoder<R>) -> Self {
        Point {
            r_offset: d.r_offset,
            w_offset: d.w_offset,
            bit_buf: d.bit_buf,
            nb: d.nb,
            h1: d.h1.clone(),
            h2: d.h2.clone(),
            bits: d.bits.clone(),
            codebits: d.codebits,
            hist: d.hist.clone(),
            hp: d.hp,
            hw: d.hw,
            hfull: d.hfull,
            buf: d.buf,
            step: d.step,
            final_block: d.final_block,
            err: d.err.clone(),
            hl: d.hl,
            hd: d.hd,
            copy_len: d.copy_len,
            copy_dist: d.copy_dist,
        }
    }

    /// Build a fresh decoder in this snapshot's state over a reader that
    /// must be positioned at `r_offset` plus the gzip header length.
    /// `r_offset` is restored from the snapshot, never from the reader.
    pub(crate) fn rehydrate<R: Read>(&self, r: ByteReader<R>) -> FlateDecoder<R> {
        FlateDecoder {
            r,
            r_offset: self.r_offset,
            w_offset: self.w_offset,
            bit_buf: self.bit_buf,
            nb: self.nb,
            h1: self.h1.clone(),
            h2: self.h2.clone(),
            bits: self.bits.clone(),
            codebits: self.codebits,
            hist: self.hist.clone(),
            hp: self.hp,
            hw: self.hw,
            hfull: self.hfull,
            buf: self.buf,
            step: self.step,
            final_block: self.final_block,
            err: self.err.clone(),
            to_read: 0..0,
            hl: self.hl,
            hd: self.hd,
            copy_len: self.copy_len,
            copy_dist: self.copy_dist,
        }
    }
}

/// Ordered access points into one gzip file. Immutable once built; safe to
/// share across concurrent `extract` calls, each of which rehydrates its
/// own decoder.
#[derive(Default, Debug)]
pub struct Index {
    pub(crate) points: Vec<Point>,
}

impl Index {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    fn add_point<R: Read>(&mut self, d: &FlateDecoder<R>, total: u64) -> GzseekResult<()> {
        if d.w_offset != total {
            return Err(GzseekError::Internal("span accumulator out of sync"));
        }
        if d.to_read.start < d.to_read.end {
            return Err(GzseekError::Internal("snapshot with undelivered output"));
        }
        self.points.push(Point::capture(d));
        Ok(())
    }

    /// Rightmost point whose `w_offset` does not exceed `offset`.
    fn locate(&self, offset: u64) -> Option<&Point> {
        let i = self.points.partition_point(|p| p.w_offset <= offset);
        if i == 0 {
            None
        } else {
            Some(&self.points[i - 1])
        }
    }
}

/// Pull whole output spans until at least `SPAN` bytes have accumulated.
/// The decoder is left suspended with its pending output fully drained.
fn read_span<R: Read>(gz: &mut GzipReader<R>) -> GzseekResult<Vec<u8>> {
    let mut buf = Vec::new();
    while (buf.len() as u64) < SPAN {
        let block = gz.read_block()?;
        buf.extend_from_slice(&block);
    }
    Ok(buf)
}

/// Decompress the whole first gzip stream of `path` and record an access
/// point roughly every `SPAN` bytes of uncompressed output. The result
/// always contains the point taken before the first deflate block. Data
/// after the first stream is ignored; concatenated gzip files are not
/// supported.
pub fn build_index<P: AsRef<Path>>(path: P) -> GzseekResult<Index> {
    let file = File::open(path)?;
    let mut gz = GzipReader::new(file)?;

    let mut index = Index::default();
    // Access point before the first block.
    index.add_point(&gz.decoder, 0)?;

    let mut total = 0u64;
    loop {
        match read_span(&mut gz) {
            Ok(span) => {
                total += span.len() as u64;
                index.add_point(&gz.decoder, total)?;
            }
            // No point after the last block.
            Err(e) if e.is_eof() => return Ok(index),
            Err(e) => return Err(e),
        }
    }
}

/// Result of an `extract` call. `eof` is set when the stream ended before
/// the full request was satisfied; `data` then holds whatever was produced.
#[derive(Debug, Default)]
pub struct Extraction {
    pub data: Vec<u8>,
    pub eof: bool,
}

/// Read `length` uncompressed bytes starting at zero-indexed `offset`,
/// using `index` to skip ahead. Requests at or past the end of the data
/// return a short (possibly empty) result with `eof` set; a non-positive
/// `length` or an empty index returns an empty result without error.
pub fn extract<P: AsRef<Path>>(
    path: P,
    index: &Index,
    offset: i64,
    length: i64,
) -> GzseekResult<Extraction> {
    let mut file = File::open(path)?;
    if length <= 0 || index.is_empty() || offset < 0 {
        return Ok(Extraction::default());
    }
    let pt = match index.locate(offset as u64) {
        Some(pt) => pt,
        None => return Ok(Extraction::default()),
    };

    // Re-parse the header to learn how many bytes precede the payload.
    let header_len = {
        let mut r = ByteReader::new(&file);
        read_header(&mut r)?;
        r.offset()
    };

    // Position the file at the point's compressed offset and bring a fresh
    // decoder back to the recorded state.
    file.seek(SeekFrom::Start(pt.r_offset + header_len))?;
    let mut dec = pt.rehydrate(ByteReader::new(file));

    // Decode the discard prefix and the payload into one buffer.
    let skip = (offset as u64 - pt.w_offset) as usize;
    let mut buf = vec![0u8; skip + length as usize];
    let mut filled = 0usize;
    let eof = loop {
        if filled == buf.len() {
            break false;
        }
        match dec.read(&mut buf[filled..]) {
            Ok(0) => break false,
            Ok(n) => filled += n,
            Err(e) if e.is_eof() => break true,
            Err(e) => return Err(e),
        }
    };
    buf.truncate(filled);
    let data = if filled > skip {
        buf.split_off(skip)
    } else {
        Vec::new()
    };
    Ok(Extraction { data, eof })
}
