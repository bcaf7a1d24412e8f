//! The record catalog. Every record layout, size, reader and pretty-printer
//! is generated from the single declarative table at the bottom of this
//! module; nothing here is written per record by hand.

use std::fmt;
use std::io::Read;

use bytes::Bytes;

use crate::checksum::X1764;
use crate::codec::{self, Wbuf};
use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::types::{FileNum, Lsn, TxnId};

/// A field type that can appear in a log record body.
pub trait LogField: Sized {
    fn wire_len(&self) -> usize;
    fn write(&self, w: &mut Wbuf);
    fn read<R: Read>(r: &mut R, checksum: &mut X1764, len: &mut u32) -> Result<Self>;
    fn fmt_field(&self, name: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl LogField for u32 {
    fn wire_len(&self) -> usize {
        4
    }

    fn write(&self, w: &mut Wbuf) {
        w.write_u32(*self);
    }

    fn read<R: Read>(r: &mut R, checksum: &mut X1764, len: &mut u32) -> Result<Self> {
        codec::read_u32(r, checksum, len)
    }

    fn fmt_field(&self, name: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " {}={}", name, self)
    }
}

impl LogField for u64 {
    fn wire_len(&self) -> usize {
        8
    }

    fn write(&self, w: &mut Wbuf) {
        w.write_u64(*self);
    }

    fn read<R: Read>(r: &mut R, checksum: &mut X1764, len: &mut u32) -> Result<Self> {
        codec::read_u64(r, checksum, len)
    }

    fn fmt_field(&self, name: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " {}={}", name, self)
    }
}

impl LogField for Lsn {
    fn wire_len(&self) -> usize {
        8
    }

    fn write(&self, w: &mut Wbuf) {
        w.write_lsn(*self);
    }

    fn read<R: Read>(r: &mut R, checksum: &mut X1764, len: &mut u32) -> Result<Self> {
        codec::read_lsn(r, checksum, len)
    }

    fn fmt_field(&self, name: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " {}={}", name, self)
    }
}

impl LogField for FileNum {
    fn wire_len(&self) -> usize {
        4
    }

    fn write(&self, w: &mut Wbuf) {
        w.write_filenum(*self);
    }

    fn read<R: Read>(r: &mut R, checksum: &mut X1764, len: &mut u32) -> Result<Self> {
        codec::read_filenum(r, checksum, len)
    }

    fn fmt_field(&self, name: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " {}={}", name, self.0)
    }
}

impl LogField for Bytes {
    fn wire_len(&self) -> usize {
        4 + self.len()
    }

    fn write(&self, w: &mut Wbuf) {
        w.write_bytestring(self);
    }

    fn read<R: Read>(r: &mut R, checksum: &mut X1764, len: &mut u32) -> Result<Self> {
        codec::read_bytestring(r, checksum, len)
    }

    fn fmt_field(&self, name: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " {}=", name)?;
        fmt_bytestring(self, f)
    }
}

impl LogField for Vec<FileNum> {
    fn wire_len(&self) -> usize {
        4 + 4 * self.len()
    }

    fn write(&self, w: &mut Wbuf) {
        w.write_filenums(self);
    }

    fn read<R: Read>(r: &mut R, checksum: &mut X1764, len: &mut u32) -> Result<Self> {
        codec::read_filenums(r, checksum, len)
    }

    fn fmt_field(&self, name: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " {}={{num={} filenums=\"", name, self.len())?;
        for (i, filenum) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{:#x}", filenum.0)?;
        }
        write!(f, "\"}}")
    }
}

fn fmt_bytestring(bs: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{{len={} data=\"", bs.len())?;
    for &b in bs {
        match b {
            b'"' => write!(f, "\\\"")?,
            b'\\' => write!(f, "\\\\")?,
            b'\n' => write!(f, "\\n")?,
            _ if b.is_ascii_graphic() || b == b' ' => write!(f, "{}", b as char)?,
            _ => write!(f, "\\{:03o}", b)?,
        }
    }
    write!(f, "\"}}")
}

/// Frame one record into `buf`: cmd byte, LSN, fields, checksum of the
/// checksummed region, trailing total length.
pub(crate) fn frame_into(buf: &mut Vec<u8>, entry: &LogEntry) {
    let start = buf.len();
    let mut w = Wbuf::new(&mut *buf);
    w.write_u8(entry.cmd());
    w.write_lsn(entry.lsn());
    entry.write_fields(&mut w);
    let crc = w.finish();
    w.write_u32_nocrc(crc);
    w.write_u32_nocrc(entry.wire_len() as u32);
    debug_assert_eq!(buf.len() - start, entry.wire_len());
}

macro_rules! log_records {
    ($(
        $(#[$meta:meta])*
        ($cmd:literal, $name:ident, $snake:ident, $pretty:literal) {
            $($field:ident : $fty:ty),* $(,)?
        }
    ),+ $(,)?) => {
        /// A decoded log record together with the LSN it was stamped with.
        #[derive(Debug, Clone, PartialEq)]
        pub enum LogEntry {
            $(
                $(#[$meta])*
                $name { lsn: Lsn, $($field: $fty),* },
            )+
        }

        impl LogEntry {
            /// Command byte identifying the record type on disk.
            pub fn cmd(&self) -> u8 {
                match self {
                    $(LogEntry::$name { .. } => $cmd,)+
                }
            }

            pub fn lsn(&self) -> Lsn {
                match self {
                    $(LogEntry::$name { lsn, .. } => *lsn,)+
                }
            }

            pub(crate) fn set_lsn(&mut self, new: Lsn) {
                match self {
                    $(LogEntry::$name { lsn, .. } => *lsn = new,)+
                }
            }

            fn body_len(&self) -> usize {
                match self {
                    $(LogEntry::$name { lsn: _, $($field),* } =>
                        8usize $(+ LogField::wire_len($field))*,)+
                }
            }

            /// Total framed size: cmd byte, body, checksum, trailing length.
            pub fn wire_len(&self) -> usize {
                1 + self.body_len() + 4 + 4
            }

            pub(crate) fn write_fields(&self, w: &mut Wbuf) {
                match self {
                    $(LogEntry::$name { lsn: _, $($field),* } => {
                        $(LogField::write($field, w);)*
                    })+
                }
            }

            pub(crate) fn read_fields<R: Read>(
                cmd: u8,
                lsn: Lsn,
                r: &mut R,
                checksum: &mut X1764,
                len: &mut u32,
            ) -> Result<Self> {
                match cmd {
                    $($cmd => {
                        $(let $field = <$fty as LogField>::read(r, checksum, len)?;)*
                        Ok(LogEntry::$name { lsn, $($field),* })
                    })+
                    _ => Err(Error::BadFormat),
                }
            }
        }

        impl fmt::Display for LogEntry {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(LogEntry::$name { lsn, $($field),* } => {
                        write!(f, "{} lsn={}", $pretty, lsn)?;
                        $(LogField::fmt_field($field, stringify!($field), f)?;)*
                        Ok(())
                    })+
                }
            }
        }

        $(
            $(#[$meta])*
            pub fn $snake(
                logger: &Logger,
                lsn_out: Option<&mut Lsn>,
                do_fsync: bool,
                $($field: $fty),*
            ) -> Result<()> {
                let entry = LogEntry::$name { lsn: Lsn::ZERO, $($field),* };
                logger.append(entry, do_fsync, lsn_out)
            }
        )+
    };
}

log_records! {
    /// Free-form annotation; also written as the final record of a clean
    /// shutdown.
    (b'T', Comment, log_comment, "comment") { comment: Bytes },
    /// A transaction began. `parent` is zero for root transactions.
    (b'b', XBegin, log_xbegin, "xbegin") { parent: TxnId },
    (b'C', XCommit, log_xcommit, "xcommit") { txnid: TxnId },
    (b'q', XAbort, log_xabort, "xabort") { txnid: TxnId },
    /// A table file was created. Synced to disk before the engine touches
    /// the new file.
    (b'F', FCreate, log_fcreate, "fcreate") {
        txnid: TxnId,
        filenum: FileNum,
        fname: Bytes,
        mode: u32,
        treeflags: u32,
        descriptor_version: u32,
        descriptor: Bytes,
    },
    (b'U', FDelete, log_fdelete, "fdelete") { txnid: TxnId, fname: Bytes },
    /// Bookkeeping only: associates a filename with its FILENUM.
    (b'O', FOpen, log_fopen, "fopen") { fname: Bytes, filenum: FileNum, treeflags: u32 },
    (b'o', FClose, log_fclose, "fclose") { fname: Bytes, filenum: FileNum },
    (b'x', CheckpointBegin, log_checkpoint_begin, "checkpoint_begin") { timestamp: u64 },
    (b'X', CheckpointEnd, log_checkpoint_end, "checkpoint_end") {
        lsn_begin_checkpoint: Lsn,
        timestamp: u64,
    },
    /// Files a live transaction had open at checkpoint time.
    (b'L', TxnCheckpoint, log_txn_checkpoint, "txn_checkpoint") {
        txnid: TxnId,
        open_filenums: Vec<FileNum>,
    },
}
