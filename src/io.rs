use std::fs::File;
use std::io::{Error, ErrorKind, Result};

/// Positional reads and writes on a shared file handle. The logger knows the
/// byte offset of everything it touches, so no seeking state is kept.
pub trait FileExt {
    fn write_all_at(&self, buf: &[u8], offset: u64) -> Result<()>;

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()>;
}

impl FileExt for File {
    fn write_all_at(&self, buf: &[u8], offset: u64) -> Result<()> {
        let mut written = 0;

        while written != buf.len() {
            written +=
                nix::sys::uio::pwrite(self, &buf[written..], (offset + written as u64) as _)?;
        }

        Ok(())
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let mut read = 0;

        while read != buf.len() {
            let n = nix::sys::uio::pread(self, &mut buf[read..], (offset + read as u64) as _)?;
            if n == 0 {
                return Err(Error::new(ErrorKind::UnexpectedEof, "unexpected end-of-file"));
            }
            read += n;
        }

        Ok(())
    }
}
