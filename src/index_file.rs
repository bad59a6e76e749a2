//! On-disk index persistence.
//!
//! An index costs a full decompression pass to build, so callers that
//! revisit the same file can save it next to the data and reload it later.
//! The format is little-endian and field-by-field:
//!
//! - magic `GZSX`, format version, point count
//! - per point: scalar decoder state, both code-length scratch arrays,
//!   both Huffman tables, and the 32 KiB history window compressed with
//!   zlib (a length-prefixed blob)
//!
//! A snapshot taken by the index pass never carries a terminal status, so
//! no error state is persisted.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{GzseekError, GzseekResult};
use crate::huffman::{HuffmanTable, HUFFMAN_NUM_CHUNKS};
use crate::index::{Index, Point};
use crate::inflate::{Step, TableRef, MAX_DIST, MAX_HIST, MAX_LIT, NUM_CODES};

const INDEX_MAGIC: [u8; 4] = *b"GZSX";
const INDEX_VERSION: u32 = 1;

impl Index {
    /// Write the index to `path`, replacing any existing file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> GzseekResult<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);

        w.write_all(&INDEX_MAGIC)?;
        write_u32(&mut w, INDEX_VERSION)?;
        write_u64(&mut w, self.points.len() as u64)?;
        for pt in &self.points {
            write_point(&mut w, pt)?;
        }
        w.flush()?;
        Ok(())
    }

    /// Load an index previously written by `save`.
    pub fn load<P: AsRef<Path>>(path: P) -> GzseekResult<Index> {
        let file = File::open(path)?;
        let mut r = BufReader::new(file);

        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != INDEX_MAGIC {
            return Err(GzseekError::invalid_index("bad magic"));
        }
        let version = read_u32(&mut r)?;
        if version != INDEX_VERSION {
            return Err(GzseekError::invalid_index(format!(
                "unsupported version {version}"
            )));
        }

        let count = read_u64(&mut r)? as usize;
        let mut points = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            points.push(read_point(&mut r)?);
        }
        Ok(Index { points })
    }
}

fn write_point<W: Write>(w: &mut W, pt: &Point) -> GzseekResult<()> {
    write_u64(w, pt.r_offset)?;
    write_u64(w, pt.w_offset)?;
    write_u32(w, pt.bit_buf)?;
    write_u32(w, pt.nb)?;
    write_u32(w, pt.hp as u32)?;
    write_u32(w, pt.hw as u32)?;
    w.write_all(&[pt.hfull as u8])?;
    w.write_all(&pt.buf)?;
    w.write_all(&[
        step_to_byte(pt.step),
        pt.final_block as u8,
        table_ref_to_byte(pt.hl),
        table_ref_to_byte(pt.hd),
    ])?;
    write_u32(w, pt.copy_len as u32)?;
    write_u32(w, pt.copy_dist as u32)?;

    // Code lengths never exceed 15; one byte each.
    let codebits: Vec<u8> = pt.codebits.iter().map(|&b| b as u8).collect();
    w.write_all(&codebits)?;
    let bits: Vec<u8> = pt.bits.iter().map(|&b| b as u8).collect();
    w.write_all(&bits)?;

    write_table(w, &pt.h1)?;
    write_table(w, &pt.h2)?;

    let window = compress_window(&pt.hist[..])?;
    write_u32(w, window.len() as u32)?;
    w.write_all(&window)?;
    Ok(())
}

fn read_point<R: Read>(r: &mut R) -> GzseekResult<Point> {
    let r_offset = read_u64(r)?;
    let w_offset = read_u64(r)?;
    let bit_buf = read_u32(r)?;
    let nb = read_u32(r)?;
    let hp = read_u32(r)? as usize;
    let hw = read_u32(r)? as usize;
    let hfull = read_u8(r)? != 0;
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    let step = step_from_byte(read_u8(r)?)?;
    let final_block = read_u8(r)? != 0;
    let hl = table_ref_from_byte(read_u8(r)?)?;
    let hd = table_ref_from_byte(read_u8(r)?)?;
    let copy_len = read_u32(r)? as usize;
    let copy_dist = read_u32(r)? as usize;

    if hp > MAX_HIST || hw > hp {
        return Err(GzseekError::invalid_index("history cursor out of range"));
    }
    if copy_dist > MAX_HIST {
        return Err(GzseekError::invalid_index("copy distance out of range"));
    }

    let mut codebits_raw = [0u8; NUM_CODES];
    r.read_exact(&mut codebits_raw)?;
    let mut codebits = [0u32; NUM_CODES];
    for (dst, &src) in codebits.iter_mut().zip(codebits_raw.iter()) {
        *dst = src as u32;
    }
    let mut bits_raw = [0u8; MAX_LIT + MAX_DIST];
    r.read_exact(&mut bits_raw)?;
    let mut bits = Box::new([0u32; MAX_LIT + MAX_DIST]);
    for (dst, &src) in bits.iter_mut().zip(bits_raw.iter()) {
        *dst = src as u32;
    }

    let h1 = read_table(r)?;
    let h2 = read_table(r)?;

    let window_len = read_u32(r)? as usize;
    let mut window = vec![0u8; window_len];
    r.read_exact(&mut window)?;
    let window = decompress_window(&window)?;
    if window.len() != MAX_HIST {
        return Err(GzseekError::invalid_index("history window truncated"));
    }
    let mut hist = Box::new([0u8; MAX_HIST]);
    hist.copy_from_slice(&window);

    Ok(Point {
        r_offset,
        w_offset,
        bit_buf,
        nb,
        h1,
        h2,
        bits,
        codebits,
        hist,
        hp,
        hw,
        hfull,
        buf,
        step,
        final_block,
        err: None,
        hl,
        hd,
        copy_len,
        copy_dist,
    })
}

fn write_table<W: Write>(w: &mut W, t: &HuffmanTable) -> GzseekResult<()> {
    write_u32(w, t.min)?;
    write_u32(w, t.link_mask)?;
    for &chunk in t.chunks.iter() {
        write_u32(w, chunk)?;
    }
    write_u32(w, t.links.len() as u32)?;
    for link in &t.links {
        write_u32(w, link.len() as u32)?;
        for &entry in link {
            write_u32(w, entry)?;
        }
    }
    Ok(())
}

fn read_table<R: Read>(r: &mut R) -> GzseekResult<HuffmanTable> {
    let min = read_u32(r)?;
    let link_mask = read_u32(r)?;
    let mut chunks = [0u32; HUFFMAN_NUM_CHUNKS];
    for chunk in chunks.iter_mut() {
        *chunk = read_u32(r)?;
    }
    let num_links = read_u32(r)? as usize;
    if num_links > HUFFMAN_NUM_CHUNKS {
        return Err(GzseekError::invalid_index("oversized link table"));
    }
    let mut links = Vec::with_capacity(num_links);
    for _ in 0..num_links {
        let len = read_u32(r)? as usize;
        if len > 1 << 7 {
            return Err(GzseekError::invalid_index("oversized link entry"));
        }
        let mut link = Vec::with_capacity(len);
        for _ in 0..len {
            link.push(read_u32(r)?);
        }
        links.push(link);
    }
    Ok(HuffmanTable {
        min,
        chunks,
        links,
        link_mask,
    })
}

fn compress_window(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data)?;
    encoder.finish()
}

fn decompress_window(data: &[u8]) -> GzseekResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut output = Vec::with_capacity(MAX_HIST);
    decoder
        .read_to_end(&mut output)
        .map_err(|_| GzseekError::invalid_index("corrupt history window"))?;
    Ok(output)
}

fn step_to_byte(step: Step) -> u8 {
    match step {
        Step::NextBlock => 0,
        Step::HuffmanBlock => 1,
        Step::CopyHuff => 2,
        Step::CopyData => 3,
    }
}

fn step_from_byte(b: u8) -> GzseekResult<Step> {
    match b {
        0 => Ok(Step::NextBlock),
        1 => Ok(Step::HuffmanBlock),
        2 => Ok(Step::CopyHuff),
        3 => Ok(Step::CopyData),
        _ => Err(GzseekError::invalid_index("unknown decoder step")),
    }
}

fn table_ref_to_byte(t: TableRef) -> u8 {
    match t {
        TableRef::None => 0,
        TableRef::Lit => 1,
        TableRef::Dist => 2,
        TableRef::Fixed => 3,
    }
}

fn table_ref_from_byte(b: u8) -> GzseekResult<TableRef> {
    match b {
        0 => Ok(TableRef::None),
        1 => Ok(TableRef::Lit),
        2 => Ok(TableRef::Dist),
        3 => Ok(TableRef::Fixed),
        _ => Err(GzseekError::invalid_index("unknown table selector")),
    }
}

fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{build_index, extract, SPAN};
    use flate2::write::GzEncoder;
    use std::path::PathBuf;

    fn write_gzip(name: &str, data: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        let file = File::create(&path).unwrap();
        let mut enc = GzEncoder::new(file, Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap();
        path
    }

    #[test]
    fn test_save_load_roundtrip() {
        let data: Vec<u8> = (0..2 * SPAN as usize + 70_000)
            .map(|i| ((i * 7 + i / 100) % 256) as u8)
            .collect();
        let gz_path = write_gzip("gzseek_file_roundtrip.gz", &data);
        let index = build_index(&gz_path).unwrap();
        assert!(index.len() >= 2);

        let idx_path = std::env::temp_dir().join("gzseek_file_roundtrip.gzx");
        index.save(&idx_path).unwrap();
        let loaded = Index::load(&idx_path).unwrap();
        assert_eq!(loaded.len(), index.len());
        for (a, b) in loaded.points().iter().zip(index.points().iter()) {
            assert_eq!(a.r_offset(), b.r_offset());
            assert_eq!(a.w_offset(), b.w_offset());
        }

        // The reloaded index must extract the same bytes, including from a
        // point after the first span.
        let offset = SPAN as i64 + 777;
        let fresh = extract(&gz_path, &index, offset, 4096).unwrap();
        let reloaded = extract(&gz_path, &loaded, offset, 4096).unwrap();
        assert_eq!(fresh.data, &data[offset as usize..offset as usize + 4096]);
        assert_eq!(reloaded.data, fresh.data);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let path = std::env::temp_dir().join("gzseek_file_badmagic.gzx");
        std::fs::write(&path, b"NOPE\x01\x00\x00\x00").unwrap();
        let err = Index::load(&path).unwrap_err();
        assert!(matches!(err, GzseekError::InvalidIndex(_)));
    }

    #[test]
    fn test_bad_version_rejected() {
        let path = std::env::temp_dir().join("gzseek_file_badversion.gzx");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&INDEX_MAGIC);
        bytes.extend_from_slice(&99u32.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        let err = Index::load(&path).unwrap_err();
        assert!(matches!(err, GzseekError::InvalidIndex(_)));
    }

    #[test]
    fn test_truncated_file_rejected() {
        let data: Vec<u8> = (0..50_000).map(|i| (i % 253) as u8).collect();
        let gz_path = write_gzip("gzseek_file_trunc.gz", &data);
        let index = build_index(&gz_path).unwrap();

        let idx_path = std::env::temp_dir().join("gzseek_file_trunc.gzx");
        index.save(&idx_path).unwrap();
        let mut bytes = std::fs::read(&idx_path).unwrap();
        bytes.truncate(bytes.len() / 2);
        std::fs::write(&idx_path, &bytes).unwrap();

        assert!(Index::load(&idx_path).is_err());
    }
}
