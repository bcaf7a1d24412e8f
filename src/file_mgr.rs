//! Catalog of the log files in a directory. The durable copy of this state
//! is the file names themselves; everything here is rebuilt on open by
//! scanning the directory and tail-reading each file.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::cursor;
use crate::error::Result;
use crate::types::Lsn;

/// One entry of the catalog: a file index and the LSN of the last record
/// known to be in that file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFileInfo {
    pub index: u64,
    pub max_lsn: Lsn,
}

/// In-memory catalog of the log files of one directory, ordered by index.
#[derive(Debug, Default)]
pub struct LogFileManager {
    files: VecDeque<LogFileInfo>,
}

impl LogFileManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `dir` and rebuild the catalog, computing each file's max LSN
    /// from its tail record. Returns the last LSN of the newest file, which
    /// is where the next logger session resumes.
    pub fn init(&mut self, dir: &Path) -> Result<Lsn> {
        self.files.clear();
        let mut last = Lsn::ZERO;
        for (index, path) in list_log_files(dir)? {
            if let Some(lsn) = cursor::last_lsn_in_file(&path)? {
                last = lsn;
            }
            // A file with no records inherits the previous file's max.
            self.files.push_back(LogFileInfo {
                index,
                max_lsn: last,
            });
        }
        Ok(last)
    }

    pub fn add(&mut self, info: LogFileInfo) {
        if let Some(newest) = self.files.back() {
            assert!(info.index > newest.index);
        }
        self.files.push_back(info);
    }

    pub fn get_oldest(&self) -> Option<&LogFileInfo> {
        self.files.front()
    }

    pub fn delete_oldest(&mut self) {
        self.files.pop_front();
    }

    /// Stamp the newest entry with the LSN of the last record known to have
    /// reached its file. Called after each flush and at rollover.
    pub fn update_last_lsn(&mut self, lsn: Lsn) {
        if let Some(newest) = self.files.back_mut() {
            newest.max_lsn = lsn;
        }
    }

    pub fn num_logfiles(&self) -> usize {
        self.files.len()
    }

    pub fn last_lsn(&self) -> Lsn {
        self.files.back().map(|f| f.max_lsn).unwrap_or(Lsn::ZERO)
    }
}

/// `log<index>.tokulog`, zero-padded the way new files are created.
pub fn log_file_name(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("log{:012}.tokulog", index))
}

/// Strict full match of the log file name pattern. Any digit width is
/// accepted; anything else in the directory is ignored.
pub fn parse_log_file_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix("log")?.strip_suffix(".tokulog")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// All log files in `dir`, sorted ascending by index.
pub fn list_log_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(index) = parse_log_file_name(name) {
            files.push((index, entry.path()));
        }
    }
    files.sort_by_key(|(index, _)| *index);
    Ok(files)
}

/// The index the next created log file will get: one past the largest
/// present, or zero for a fresh directory.
pub fn next_unused_index(dir: &Path) -> Result<u64> {
    Ok(list_log_files(dir)?
        .last()
        .map(|(index, _)| index + 1)
        .unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_match_is_strict() {
        assert_eq!(parse_log_file_name("log000000000007.tokulog"), Some(7));
        assert_eq!(parse_log_file_name("log7.tokulog"), Some(7));
        assert_eq!(parse_log_file_name("log.tokulog"), None);
        assert_eq!(parse_log_file_name("log7.tokulog.bak"), None);
        assert_eq!(parse_log_file_name("xlog7.tokulog"), None);
        assert_eq!(parse_log_file_name("log7a.tokulog"), None);
        assert_eq!(parse_log_file_name("log7.toku"), None);
    }

    #[test]
    fn catalog_is_ordered() {
        let mut mgr = LogFileManager::new();
        mgr.add(LogFileInfo {
            index: 0,
            max_lsn: Lsn(10),
        });
        mgr.add(LogFileInfo {
            index: 3,
            max_lsn: Lsn(20),
        });
        assert_eq!(mgr.num_logfiles(), 2);
        assert_eq!(mgr.get_oldest().unwrap().index, 0);
        assert_eq!(mgr.last_lsn(), Lsn(20));

        mgr.update_last_lsn(Lsn(25));
        assert_eq!(mgr.last_lsn(), Lsn(25));
        assert_eq!(mgr.get_oldest().unwrap().max_lsn, Lsn(10));

        mgr.delete_oldest();
        assert_eq!(mgr.num_logfiles(), 1);
        assert_eq!(mgr.get_oldest().unwrap().index, 3);
    }

    #[test]
    #[should_panic]
    fn add_rejects_stale_index() {
        let mut mgr = LogFileManager::new();
        mgr.add(LogFileInfo {
            index: 5,
            max_lsn: Lsn::ZERO,
        });
        mgr.add(LogFileInfo {
            index: 5,
            max_lsn: Lsn::ZERO,
        });
    }

    #[test]
    fn listing_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "log000000000002.tokulog",
            "log1.tokulog",
            "notes.txt",
            "log3.tokulog.tmp",
        ] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let files = list_log_files(dir.path()).unwrap();
        let indexes: Vec<u64> = files.iter().map(|(i, _)| *i).collect();
        assert_eq!(indexes, vec![1, 2]);
        assert_eq!(next_unused_index(dir.path()).unwrap(), 3);
    }
}
