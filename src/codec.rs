//! Byte-level primitives shared by the append path and the readers.
//!
//! Every multi-byte integer on the wire is big-endian. Writers and readers
//! both feed a running [`X1764`] digest so the record framing can be checked
//! without knowing the record layout in advance.

use std::io::{ErrorKind, Read};

use bytes::Bytes;
use zerocopy::byteorder::big_endian::U32;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::checksum::X1764;
use crate::error::{Error, Result};
use crate::types::{BlockNum, FileNum, Lsn, TxnId};

pub const LOG_MAGIC: [u8; 8] = *b"tokulogg";
pub const LOG_VERSION: u32 = 1;

/// Size of the file header: magic plus version.
pub const LOG_HEADER_LEN: usize = 12;

/// Smallest possible framed record: cmd, LSN, checksum, trailing length.
pub const MIN_RECORD_LEN: usize = 1 + 8 + 4 + 4;

#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct LogFileHeader {
    magic: [u8; 8],
    version: U32,
}

impl LogFileHeader {
    pub fn new() -> Self {
        Self {
            magic: LOG_MAGIC,
            version: LOG_VERSION.into(),
        }
    }

    pub fn check(&self) -> Result<u32> {
        if self.magic != LOG_MAGIC || self.version.get() != LOG_VERSION {
            return Err(Error::BadFormat);
        }
        Ok(self.version.get())
    }
}

impl Default for LogFileHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Read and validate the 12-byte file header, returning the version.
pub fn read_log_magic<R: Read>(r: &mut R) -> Result<u32> {
    let mut header = LogFileHeader::new_zeroed();
    // A file too short to hold the header is malformed, not truncated.
    r.read_exact(header.as_bytes_mut())
        .map_err(|_| Error::BadFormat)?;
    header.check()
}

fn read_err(e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::UnexpectedEof {
        Error::Truncated
    } else {
        Error::Io(e)
    }
}

/// Serializer over the in-memory log buffer. Checksummed writes cover the
/// record body; the checksum and trailing length themselves go through the
/// `_nocrc` variant.
pub struct Wbuf<'a> {
    buf: &'a mut Vec<u8>,
    checksum: X1764,
}

impl<'a> Wbuf<'a> {
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Self {
            buf,
            checksum: X1764::new(),
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.checksum.add(&[v]);
        self.buf.push(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        let b = v.to_be_bytes();
        self.checksum.add(&b);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_u64(&mut self, v: u64) {
        let b = v.to_be_bytes();
        self.checksum.add(&b);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_lsn(&mut self, lsn: Lsn) {
        self.write_u64(lsn.0);
    }

    pub fn write_txnid(&mut self, txnid: TxnId) {
        self.write_u64(txnid);
    }

    pub fn write_filenum(&mut self, filenum: FileNum) {
        self.write_u32(filenum.0);
    }

    pub fn write_blocknum(&mut self, blocknum: BlockNum) {
        self.write_u64(blocknum.0);
    }

    pub fn write_bytestring(&mut self, bs: &[u8]) {
        self.write_u32(bs.len() as u32);
        self.checksum.add(bs);
        self.buf.extend_from_slice(bs);
    }

    pub fn write_filenums(&mut self, filenums: &[FileNum]) {
        self.write_u32(filenums.len() as u32);
        for f in filenums {
            self.write_filenum(*f);
        }
    }

    /// Digest of everything written so far through the checksummed methods.
    pub fn finish(&self) -> u32 {
        self.checksum.finish()
    }

    pub fn write_u32_nocrc(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }
}

pub fn read_u8<R: Read>(r: &mut R, checksum: &mut X1764, len: &mut u32) -> Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b).map_err(read_err)?;
    checksum.add(&b);
    *len += 1;
    Ok(b[0])
}

pub fn read_u32<R: Read>(r: &mut R, checksum: &mut X1764, len: &mut u32) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b).map_err(read_err)?;
    checksum.add(&b);
    *len += 4;
    Ok(u32::from_be_bytes(b))
}

pub fn read_u64<R: Read>(r: &mut R, checksum: &mut X1764, len: &mut u32) -> Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b).map_err(read_err)?;
    checksum.add(&b);
    *len += 8;
    Ok(u64::from_be_bytes(b))
}

pub fn read_lsn<R: Read>(r: &mut R, checksum: &mut X1764, len: &mut u32) -> Result<Lsn> {
    read_u64(r, checksum, len).map(Lsn)
}

pub fn read_txnid<R: Read>(r: &mut R, checksum: &mut X1764, len: &mut u32) -> Result<TxnId> {
    read_u64(r, checksum, len)
}

pub fn read_filenum<R: Read>(r: &mut R, checksum: &mut X1764, len: &mut u32) -> Result<FileNum> {
    read_u32(r, checksum, len).map(FileNum)
}

pub fn read_blocknum<R: Read>(r: &mut R, checksum: &mut X1764, len: &mut u32) -> Result<BlockNum> {
    read_u64(r, checksum, len).map(BlockNum)
}

pub fn read_bytestring<R: Read>(r: &mut R, checksum: &mut X1764, len: &mut u32) -> Result<Bytes> {
    let n = read_u32(r, checksum, len)? as usize;
    let mut v = Vec::new();
    v.try_reserve_exact(n).map_err(|_| Error::OutOfMemory)?;
    v.resize(n, 0);
    r.read_exact(&mut v).map_err(read_err)?;
    checksum.add(&v);
    *len += n as u32;
    Ok(Bytes::from(v))
}

pub fn read_filenums<R: Read>(
    r: &mut R,
    checksum: &mut X1764,
    len: &mut u32,
) -> Result<Vec<FileNum>> {
    let n = read_u32(r, checksum, len)? as usize;
    let mut v = Vec::new();
    v.try_reserve_exact(n).map_err(|_| Error::OutOfMemory)?;
    for _ in 0..n {
        v.push(read_filenum(r, checksum, len)?);
    }
    Ok(v)
}

/// Read a u32 that sits outside the checksummed region (the crc itself and
/// the trailing length).
pub fn read_u32_nocrc<R: Read>(r: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b).map_err(read_err)?;
    Ok(u32::from_be_bytes(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = LogFileHeader::new();
        let bytes = header.as_bytes();
        assert_eq!(bytes.len(), LOG_HEADER_LEN);
        assert_eq!(&bytes[..8], b"tokulogg");
        assert_eq!(read_log_magic(&mut &bytes[..]).unwrap(), LOG_VERSION);
    }

    #[test]
    fn bad_magic_is_bad_format() {
        let mut bytes = LogFileHeader::new().as_bytes().to_vec();
        bytes[0] = b'X';
        assert!(matches!(
            read_log_magic(&mut &bytes[..]),
            Err(Error::BadFormat)
        ));
        // Short header as well.
        assert!(matches!(
            read_log_magic(&mut &bytes[..5]),
            Err(Error::BadFormat)
        ));
    }

    #[test]
    fn reader_tracks_writer_checksum() {
        let mut buf = Vec::new();
        let mut w = Wbuf::new(&mut buf);
        w.write_u8(b'z');
        w.write_lsn(Lsn(42));
        w.write_txnid(77);
        w.write_bytestring(b"payload");
        w.write_filenums(&[FileNum(1), FileNum(0xdead)]);
        w.write_blocknum(BlockNum(u64::MAX));
        let written_crc = w.finish();

        let mut checksum = X1764::new();
        let mut len = 0;
        let mut r = &buf[..];
        assert_eq!(read_u8(&mut r, &mut checksum, &mut len).unwrap(), b'z');
        assert_eq!(read_lsn(&mut r, &mut checksum, &mut len).unwrap(), Lsn(42));
        assert_eq!(read_txnid(&mut r, &mut checksum, &mut len).unwrap(), 77);
        assert_eq!(
            read_bytestring(&mut r, &mut checksum, &mut len).unwrap(),
            Bytes::from_static(b"payload")
        );
        assert_eq!(
            read_filenums(&mut r, &mut checksum, &mut len).unwrap(),
            vec![FileNum(1), FileNum(0xdead)]
        );
        assert_eq!(
            read_blocknum(&mut r, &mut checksum, &mut len).unwrap(),
            BlockNum(u64::MAX)
        );
        assert_eq!(checksum.finish(), written_crc);
        assert_eq!(len as usize, buf.len());
    }

    #[test]
    fn short_read_is_truncated() {
        let mut checksum = X1764::new();
        let mut len = 0;
        let mut r = &b"abc"[..];
        assert!(matches!(
            read_u64(&mut r, &mut checksum, &mut len),
            Err(Error::Truncated)
        ));
    }
}
