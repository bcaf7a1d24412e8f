//! Read-side access to closed log files: a forward cursor over the record
//! stream, a backward cursor over the tail-length chain, and the two peeks
//! the maintenance paths need (last LSN for the file catalog, first LSN for
//! archive gating).

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::checksum::X1764;
use crate::codec::{self, LOG_HEADER_LEN, MIN_RECORD_LEN};
use crate::error::{Error, Result};
use crate::io::FileExt;
use crate::records::LogEntry;
use crate::types::Lsn;

/// Read one framed record, verifying the checksum and the trailing length.
pub fn read_entry<R: Read>(r: &mut R) -> Result<LogEntry> {
    let mut checksum = X1764::new();
    let mut len = 0u32;
    let cmd = codec::read_u8(r, &mut checksum, &mut len)?;
    read_entry_after_cmd(cmd, r, checksum, len)
}

fn read_entry_after_cmd<R: Read>(
    cmd: u8,
    r: &mut R,
    mut checksum: X1764,
    mut len: u32,
) -> Result<LogEntry> {
    let lsn = codec::read_lsn(r, &mut checksum, &mut len)?;
    let entry = LogEntry::read_fields(cmd, lsn, r, &mut checksum, &mut len)?;
    let crc = codec::read_u32_nocrc(r)?;
    if crc != checksum.finish() {
        return Err(Error::BadFormat);
    }
    let total = codec::read_u32_nocrc(r)?;
    if total != len + 8 {
        return Err(Error::BadFormat);
    }
    Ok(entry)
}

/// Forward cursor over the records of one log file.
pub struct LogCursor<R = BufReader<File>> {
    reader: R,
}

impl LogCursor<BufReader<File>> {
    /// Open `path`, validate the header, and position at the first record.
    /// Also returns the file's format version.
    pub fn open(path: &Path) -> Result<(Self, u32)> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let version = codec::read_log_magic(&mut reader)?;
        Ok((Self { reader }, version))
    }
}

impl<R: Read> LogCursor<R> {
    /// `None` at a clean end of file; `Truncated` when the stream stops
    /// inside a record.
    pub fn next_entry(&mut self) -> Result<Option<LogEntry>> {
        let mut first = [0u8; 1];
        match self.reader.read(&mut first) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) => return Err(e.into()),
        }
        let mut checksum = X1764::new();
        checksum.add(&first);
        read_entry_after_cmd(first[0], &mut self.reader, checksum, 1).map(Some)
    }
}

/// Backward cursor following the tail-length chain from the end of a file.
pub struct BackwardCursor {
    file: File,
    pos: u64,
}

impl BackwardCursor {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut header = [0u8; LOG_HEADER_LEN];
        file.read_exact_at(&mut header, 0)
            .map_err(|_| Error::BadFormat)?;
        codec::read_log_magic(&mut &header[..])?;
        let pos = file.metadata()?.len();
        Ok(Self { file, pos })
    }

    /// The record ending at the current position, or `None` once the header
    /// is reached.
    pub fn prev_entry(&mut self) -> Result<Option<LogEntry>> {
        let header_len = LOG_HEADER_LEN as u64;
        if self.pos == header_len {
            return Ok(None);
        }
        if self.pos < header_len + MIN_RECORD_LEN as u64 {
            return Err(Error::BadFormat);
        }
        let mut tail = [0u8; 4];
        self.file.read_exact_at(&mut tail, self.pos - 4)?;
        let total = u32::from_be_bytes(tail) as u64;
        if total < MIN_RECORD_LEN as u64 || total > self.pos - header_len {
            return Err(Error::BadFormat);
        }
        let start = self.pos - total;
        let mut buf = vec![0u8; total as usize];
        self.file.read_exact_at(&mut buf, start)?;
        let mut slice = &buf[..];
        let entry = read_entry(&mut slice)?;
        if !slice.is_empty() {
            return Err(Error::BadFormat);
        }
        self.pos = start;
        Ok(Some(entry))
    }
}

/// LSN of the last record of `path`, verifying the tail record's framing.
/// `None` for a file that holds no records.
pub fn last_lsn_in_file(path: &Path) -> Result<Option<Lsn>> {
    let mut cursor = BackwardCursor::open(path)?;
    Ok(cursor.prev_entry()?.map(|entry| entry.lsn()))
}

/// LSN of the first record of `path`, read without validating anything past
/// the header. `None` when the file is too short to tell, which callers
/// treat as "not archivable".
pub fn peek_first_lsn(path: &Path) -> Result<Option<Lsn>> {
    let file = File::open(path)?;
    let mut buf = [0u8; LOG_HEADER_LEN + 1 + 8];
    match file.read_exact_at(&mut buf, 0) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let lsn = u64::from_be_bytes(buf[LOG_HEADER_LEN + 1..].try_into().unwrap());
    Ok(Some(Lsn(lsn)))
}
