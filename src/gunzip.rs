//! gzip (RFC 1952) framing over the resumable inflater.
//!
//! Parses the header (with optional FEXTRA / FNAME / FCOMMENT / FHCRC
//! fields), hands the same byte source to a `FlateDecoder`, and validates
//! the CRC-32 + ISIZE trailer once the deflate stream ends. Concatenated
//! gzip members are not supported: after the first stream's trailer the
//! reader reports end of stream regardless of residual bytes.

use std::io::Read;

use crate::byte_reader::ByteReader;
use crate::error::{GzseekError, GzseekResult};
use crate::inflate::FlateDecoder;

const GZIP_ID1: u8 = 0x1f;
const GZIP_ID2: u8 = 0x8b;
const GZIP_DEFLATE: u8 = 8;

const FLAG_HDR_CRC: u8 = 1 << 1;
const FLAG_EXTRA: u8 = 1 << 2;
const FLAG_NAME: u8 = 1 << 3;
const FLAG_COMMENT: u8 = 1 << 4;

/// Longest NUL-terminated header string accepted.
const MAX_HEADER_STRING: usize = 512;

/// Metadata carried by the gzip header.
#[derive(Clone, Debug, Default)]
pub struct GzipHeader {
    pub name: Option<String>,
    pub comment: Option<String>,
    pub extra: Option<Vec<u8>>,
    pub mtime: u32,
    pub os: u8,
}

#[derive(Debug)]
pub struct GzipReader<R> {
    header: GzipHeader,
    header_len: u64,
    pub(crate) decoder: FlateDecoder<R>,
    digest: crc32fast::Hasher,
    size: u32,
    err: Option<GzseekError>,
}

impl<R: Read> GzipReader<R> {
    pub fn new(inner: R) -> GzseekResult<Self> {
        let mut r = ByteReader::new(inner);
        let header = read_header(&mut r)?;
        let header_len = r.offset();
        Ok(Self {
            header,
            header_len,
            decoder: FlateDecoder::new(r),
            digest: crc32fast::Hasher::new(),
            size: 0,
            err: None,
        })
    }

    pub fn header(&self) -> &GzipHeader {
        &self.header
    }

    /// Bytes the parsed header occupied; the compressed payload starts
    /// at this file offset.
    pub fn header_len(&self) -> u64 {
        self.header_len
    }

    /// Next whole span of uncompressed output. At the end of the deflate
    /// stream the trailer is validated and the terminal status becomes
    /// `Eof` (or `Checksum` on a mismatch). Errors are sticky.
    pub fn read_block(&mut self) -> GzseekResult<Vec<u8>> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        match self.decoder.read_block() {
            Ok(block) => {
                self.digest.update(&block);
                self.size = self.size.wrapping_add(block.len() as u32);
                Ok(block)
            }
            Err(e) if e.is_eof() => {
                let status = self.check_trailer();
                self.err = Some(status.clone());
                Err(status)
            }
            Err(e) => {
                self.err = Some(e.clone());
                Err(e)
            }
        }
    }

    fn check_trailer(&mut self) -> GzseekError {
        let mut buf = [0u8; 8];
        if let Err(e) = self.decoder.r.read_full(&mut buf) {
            return GzseekError::read_at(self.decoder.r_offset, e);
        }
        let crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let isize = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if self.digest.clone().finalize() != crc || isize != self.size {
            return GzseekError::Checksum;
        }
        GzseekError::Eof
    }
}

/// Parse a gzip header from `r`. The reader's offset afterwards is the
/// header's byte length. FHCRC, when present, must match the low 16 bits
/// of a CRC-32 over every preceding header byte.
pub(crate) fn read_header<R: Read>(r: &mut ByteReader<R>) -> GzseekResult<GzipHeader> {
    let mut digest = crc32fast::Hasher::new();
    let mut buf = [0u8; 10];
    r.read_full(&mut buf)
        .map_err(|e| GzseekError::read_at(r.offset(), e))?;
    if buf[0] != GZIP_ID1 || buf[1] != GZIP_ID2 {
        return Err(GzseekError::header("bad magic number"));
    }
    if buf[2] != GZIP_DEFLATE {
        return Err(GzseekError::header(format!(
            "unsupported compression method {}",
            buf[2]
        )));
    }
    let flg = buf[3];
    let mut header = GzipHeader {
        mtime: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        os: buf[9],
        ..Default::default()
    };
    digest.update(&buf);

    if flg & FLAG_EXTRA != 0 {
        let mut len_buf = [0u8; 2];
        r.read_full(&mut len_buf)
            .map_err(|e| GzseekError::read_at(r.offset(), e))?;
        digest.update(&len_buf);
        let mut data = vec![0u8; u16::from_le_bytes(len_buf) as usize];
        r.read_full(&mut data)
            .map_err(|e| GzseekError::read_at(r.offset(), e))?;
        digest.update(&data);
        header.extra = Some(data);
    }
    if flg & FLAG_NAME != 0 {
        header.name = Some(read_string(r, &mut digest)?);
    }
    if flg & FLAG_COMMENT != 0 {
        header.comment = Some(read_string(r, &mut digest)?);
    }
    if flg & FLAG_HDR_CRC != 0 {
        let mut crc_buf = [0u8; 2];
        r.read_full(&mut crc_buf)
            .map_err(|e| GzseekError::read_at(r.offset(), e))?;
        let want = u16::from_le_bytes(crc_buf) as u32;
        if digest.finalize() & 0xFFFF != want {
            return Err(GzseekError::header("header checksum mismatch"));
        }
    }
    Ok(header)
}

/// NUL-terminated Latin-1 header string, capped at `MAX_HEADER_STRING`.
fn read_string<R: Read>(
    r: &mut ByteReader<R>,
    digest: &mut crc32fast::Hasher,
) -> GzseekResult<String> {
    let mut buf = Vec::new();
    loop {
        if buf.len() >= MAX_HEADER_STRING {
            return Err(GzseekError::header("header string too long"));
        }
        let b = r
            .read_byte()
            .map_err(|e| GzseekError::read_at(r.offset(), e))?;
        digest.update(&[b]);
        if b == 0 {
            return Ok(buf.iter().map(|&b| b as char).collect());
        }
        buf.push(b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, GzEncoder};
    use flate2::{Compression, GzBuilder};
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn read_to_end(bytes: &[u8]) -> GzseekResult<Vec<u8>> {
        let mut gz = GzipReader::new(bytes)?;
        let mut out = Vec::new();
        loop {
            match gz.read_block() {
                Ok(block) => out.extend_from_slice(&block),
                Err(e) if e.is_eof() => return Ok(out),
                Err(e) => return Err(e),
            }
        }
    }

    #[test]
    fn test_empty_member() {
        assert_eq!(read_to_end(&gzip(b"")).unwrap(), b"");
    }

    #[test]
    fn test_plain_member() {
        let original = b"hello gzip framing";
        assert_eq!(read_to_end(&gzip(original)).unwrap(), original);
    }

    #[test]
    fn test_large_member() {
        let original: Vec<u8> = (0..150_000).map(|i| ((i * 7 + i / 100) % 256) as u8).collect();
        assert_eq!(read_to_end(&gzip(&original)).unwrap(), original);
    }

    #[test]
    fn test_header_fields_and_length() {
        let original = b"payload with a decorated header";
        let mut enc = GzBuilder::new()
            .filename("data.bin")
            .comment("a comment")
            .extra(vec![1, 2, 3, 4])
            .mtime(1234567)
            .write(Vec::new(), Compression::default());
        enc.write_all(original).unwrap();
        let bytes = enc.finish().unwrap();

        let mut gz = GzipReader::new(&bytes[..]).unwrap();
        assert_eq!(gz.header().name.as_deref(), Some("data.bin"));
        assert_eq!(gz.header().comment.as_deref(), Some("a comment"));
        assert_eq!(gz.header().extra.as_deref(), Some(&[1u8, 2, 3, 4][..]));
        assert_eq!(gz.header().mtime, 1234567);
        // 10 fixed + (2 + 4) extra + (8 + 1) name + (9 + 1) comment.
        assert_eq!(gz.header_len(), 10 + 6 + 9 + 10);

        let mut out = Vec::new();
        loop {
            match gz.read_block() {
                Ok(block) => out.extend_from_slice(&block),
                Err(e) if e.is_eof() => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(out, original);
    }

    #[test]
    fn test_header_crc_accepted() {
        // flate2 never writes FHCRC, so assemble the member by hand.
        let payload = b"fhcrc protected";
        let mut header = vec![GZIP_ID1, GZIP_ID2, GZIP_DEFLATE, FLAG_HDR_CRC];
        header.extend_from_slice(&[0, 0, 0, 0, 0, 255]);
        let crc16 = (crc32fast::hash(&header) & 0xFFFF) as u16;
        let mut bytes = header;
        bytes.extend_from_slice(&crc16.to_le_bytes());
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(payload).unwrap();
        bytes.extend_from_slice(&enc.finish().unwrap());
        bytes.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());

        assert_eq!(read_to_end(&bytes).unwrap(), payload);
    }

    #[test]
    fn test_header_crc_mismatch() {
        let mut header = vec![GZIP_ID1, GZIP_ID2, GZIP_DEFLATE, FLAG_HDR_CRC];
        header.extend_from_slice(&[0, 0, 0, 0, 0, 255]);
        let crc16 = (crc32fast::hash(&header) & 0xFFFF) as u16 ^ 0x5555;
        header.extend_from_slice(&crc16.to_le_bytes());
        header.extend_from_slice(&[0u8; 16]);

        let err = GzipReader::new(&header[..]).unwrap_err();
        assert!(matches!(err, GzseekError::Header(_)));
    }

    #[test]
    fn test_bad_magic() {
        let err = GzipReader::new(&b"not gzip at all....."[..]).unwrap_err();
        assert!(matches!(err, GzseekError::Header(_)));
    }

    #[test]
    fn test_bad_method() {
        let bytes = [GZIP_ID1, GZIP_ID2, 7, 0, 0, 0, 0, 0, 0, 255];
        let err = GzipReader::new(&bytes[..]).unwrap_err();
        assert!(matches!(err, GzseekError::Header(_)));
    }

    #[test]
    fn test_unterminated_name_rejected() {
        let mut bytes = vec![GZIP_ID1, GZIP_ID2, GZIP_DEFLATE, FLAG_NAME];
        bytes.extend_from_slice(&[0, 0, 0, 0, 0, 255]);
        bytes.extend(std::iter::repeat(b'n').take(600));
        let err = GzipReader::new(&bytes[..]).unwrap_err();
        assert!(matches!(err, GzseekError::Header(_)));
    }

    #[test]
    fn test_trailer_crc_mismatch() {
        let mut bytes = gzip(b"checksummed payload");
        let n = bytes.len();
        bytes[n - 8] ^= 0xFF;
        let err = read_to_end(&bytes).unwrap_err();
        assert!(matches!(err, GzseekError::Checksum));
    }

    #[test]
    fn test_trailer_isize_mismatch() {
        let mut bytes = gzip(b"checksummed payload");
        let n = bytes.len();
        bytes[n - 1] ^= 0xFF;
        let err = read_to_end(&bytes).unwrap_err();
        assert!(matches!(err, GzseekError::Checksum));
    }

    #[test]
    fn test_second_member_ignored() {
        let mut bytes = gzip(b"first member");
        bytes.extend_from_slice(&gzip(b"second member"));
        assert_eq!(read_to_end(&bytes).unwrap(), b"first member");
    }

    #[test]
    fn test_trailing_garbage_ignored() {
        let mut bytes = gzip(b"payload before junk");
        bytes.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(read_to_end(&bytes).unwrap(), b"payload before junk");
    }

    #[test]
    fn test_eof_is_sticky() {
        let bytes = gzip(b"x");
        let mut gz = GzipReader::new(&bytes[..]).unwrap();
        let mut saw_data = false;
        loop {
            match gz.read_block() {
                Ok(_) => saw_data = true,
                Err(e) if e.is_eof() => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(saw_data);
        assert!(gz.read_block().unwrap_err().is_eof());
    }
}
