//! The logger core: LSN allocation, the double-buffer append path, group
//! commit, file rollover, trim and archive.
//!
//! Producers contend on the input lock only long enough to allocate an LSN
//! and copy their record into the in-buffer. Exactly one thread at a time
//! holds "output permission" (a boolean guarded by a condition monitor, not
//! a mutex) and owns the out-buffer, the file descriptor and the file
//! catalog. A flusher swaps the buffers, drops the input lock, and only then
//! does file I/O, so producers keep queueing while the disk is busy. A
//! committer that wakes up to find its LSN already durable paid nothing for
//! its fsync; that is the group commit.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, MutexGuard};
use zerocopy::AsBytes;

use crate::codec::{LogFileHeader, LOG_HEADER_LEN};
use crate::error::{Error, Result};
use crate::file_mgr::{self, LogFileInfo, LogFileManager};
use crate::io::FileExt;
use crate::records::{self, LogEntry};
use crate::rollback::RollbackStore;
use crate::txn::{LiveTxn, LiveTxnIndex};
use crate::types::{DictId, Lsn, TxnId, TXNID_NONE};

/// Default rollover threshold.
pub const DEFAULT_LG_MAX: u32 = 100 << 20;

/// Default buffer capacity, matching the engine's block size.
pub const DEFAULT_WRITE_BLOCK_SIZE: u32 = 4 << 20;

/// No single record or buffer may reach this size; it must fit in 30 bits.
const SIZE_LIMIT: usize = 1 << 30;

struct LogBuf {
    bytes: Vec<u8>,
    cap: usize,
    max_lsn: Lsn,
}

impl LogBuf {
    fn empty() -> Self {
        Self {
            bytes: Vec::new(),
            cap: 0,
            max_lsn: Lsn::ZERO,
        }
    }

    fn with_capacity(cap: usize) -> Result<Self> {
        let mut bytes = Vec::new();
        bytes.try_reserve(cap).map_err(|_| Error::OutOfMemory)?;
        Ok(Self {
            bytes,
            cap,
            max_lsn: Lsn::ZERO,
        })
    }

    fn has_room(&self, n: usize) -> bool {
        self.bytes.len() + n <= self.cap
    }

    fn grow_to(&mut self, new_cap: usize) -> Result<()> {
        if new_cap > self.cap {
            self.bytes
                .try_reserve(new_cap - self.bytes.len())
                .map_err(|_| Error::OutOfMemory)?;
            self.cap = new_cap;
        }
        Ok(())
    }
}

/// State mutated under the input lock: the in-buffer and the LSN counter.
struct Input {
    inbuf: LogBuf,
    /// Last allocated LSN. An append takes `lsn + 1`.
    lsn: Lsn,
}

/// State owned by whoever holds output permission. The mutex itself is
/// uncontended; permission serializes access before it is ever locked.
struct Output {
    outbuf: LogBuf,
    file: Option<File>,
    dir: Option<File>,
    dir_path: PathBuf,
    /// Bytes written into the current file, header included.
    n_in_file: u64,
    written_lsn: Lsn,
    next_file_index: u64,
    file_mgr: LogFileManager,
}

/// The output-permission monitor. `fsynced_lsn` lives here because waiters
/// read it under this lock to learn that someone else already made their
/// commit durable.
struct OutputPermit {
    available: bool,
    fsynced_lsn: Lsn,
}

/// Snapshot of the observability counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggerStatus {
    pub input_lock_ctr: u64,
    pub output_condition_lock_ctr: u64,
    pub swap_ctr: u64,
    pub fsync_ctr: u64,
}

pub type RemoveFinalizeCallback = Box<dyn Fn(DictId) + Send + Sync>;

pub struct Logger {
    /// Handed to live transactions as their back-reference.
    weak_self: Weak<Logger>,

    input: Mutex<Input>,
    output: Mutex<Output>,
    permit: Mutex<OutputPermit>,
    output_cond: Condvar,

    is_open: AtomicBool,
    panicked: AtomicBool,
    panic_errno: AtomicI32,
    write_log_files: AtomicBool,
    trim_log_files: AtomicBool,
    lg_max: AtomicU32,
    write_block_size: AtomicU32,
    last_completed_checkpoint_lsn: AtomicU64,

    live_txns: LiveTxnIndex,
    oldest_living_xid: AtomicU64,
    rollback: Mutex<Option<Box<dyn RollbackStore>>>,
    remove_finalize_callback: Mutex<Option<RemoveFinalizeCallback>>,

    input_lock_ctr: AtomicU64,
    output_condition_lock_ctr: AtomicU64,
    swap_ctr: AtomicU64,
    fsync_ctr: AtomicU64,
}

impl Logger {
    /// Allocate a logger. Nothing touches the disk until `open`.
    pub fn create() -> Arc<Logger> {
        Arc::new_cyclic(|weak_self| Logger {
            weak_self: weak_self.clone(),
            input: Mutex::new(Input {
                inbuf: LogBuf::empty(),
                lsn: Lsn::ZERO,
            }),
            output: Mutex::new(Output {
                outbuf: LogBuf::empty(),
                file: None,
                dir: None,
                dir_path: PathBuf::new(),
                n_in_file: 0,
                written_lsn: Lsn::ZERO,
                next_file_index: 0,
                file_mgr: LogFileManager::new(),
            }),
            permit: Mutex::new(OutputPermit {
                available: true,
                fsynced_lsn: Lsn::ZERO,
            }),
            output_cond: Condvar::new(),
            is_open: AtomicBool::new(false),
            panicked: AtomicBool::new(false),
            panic_errno: AtomicI32::new(0),
            write_log_files: AtomicBool::new(true),
            trim_log_files: AtomicBool::new(true),
            lg_max: AtomicU32::new(DEFAULT_LG_MAX),
            write_block_size: AtomicU32::new(DEFAULT_WRITE_BLOCK_SIZE),
            last_completed_checkpoint_lsn: AtomicU64::new(0),
            live_txns: LiveTxnIndex::default(),
            oldest_living_xid: AtomicU64::new(TXNID_NONE),
            rollback: Mutex::new(None),
            remove_finalize_callback: Mutex::new(None),
            input_lock_ctr: AtomicU64::new(0),
            output_condition_lock_ctr: AtomicU64::new(0),
            swap_ctr: AtomicU64::new(0),
            fsync_ctr: AtomicU64::new(0),
        })
    }

    /// Bind the logger to `directory`, resume the LSN counters from the
    /// newest file found there, and open the next file for writing.
    #[tracing::instrument(skip_all)]
    pub fn open(&self, directory: impl AsRef<Path>) -> Result<()> {
        if self.is_open() || self.is_panicked() {
            return Err(Error::InvalidArg("logger is already open or panicked"));
        }
        let directory = directory.as_ref();
        let dir_path = if directory.is_absolute() {
            directory.to_path_buf()
        } else {
            std::env::current_dir()?.join(directory)
        };

        let mut output = self.output.lock();
        let last = output.file_mgr.init(&dir_path)?;
        {
            let mut input = self.lock_input();
            input.lsn = last;
            input.inbuf = LogBuf::with_capacity(self.write_block_size() as usize)?;
            input.inbuf.max_lsn = last;
        }
        output.outbuf = LogBuf::with_capacity(self.write_block_size() as usize)?;
        output.outbuf.max_lsn = last;
        output.written_lsn = last;
        output.dir = Some(File::open(&dir_path)?);
        output.next_file_index = file_mgr::next_unused_index(&dir_path)?;
        output.dir_path = dir_path;
        self.permit.lock().fsynced_lsn = last;

        let mut fsynced_lsn = last;
        self.open_logfile(&mut output, &mut fsynced_lsn)?;
        drop(output);

        self.is_open.store(true, Ordering::SeqCst);
        tracing::debug!(last_lsn = last.0, "log opened");
        Ok(())
    }

    /// Flush, sync and close the log. A clean close is single-threaded by
    /// contract: no appenders, no maintenance in flight.
    pub fn close(&self) -> Result<()> {
        if self.is_panicked() {
            return Err(Error::InvalidArg("logger has panicked"));
        }
        if !self.is_open() {
            return Ok(());
        }
        let input = self.lock_input();
        let mut fsynced_lsn = self.grab_output();
        let mut output = self.output.lock();
        let result = self.close_inner(input, &mut output, &mut fsynced_lsn);
        drop(output);
        match result {
            Ok(()) => {
                self.release_output(fsynced_lsn);
                self.is_open.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.panic_with(&e);
                self.release_output(fsynced_lsn);
                Err(e)
            }
        }
    }

    fn close_inner(
        &self,
        input: MutexGuard<'_, Input>,
        output: &mut Output,
        fsynced_lsn: &mut Lsn,
    ) -> Result<()> {
        self.write_buffer(input, output, fsynced_lsn)?;
        if let Some(file) = output.file.take() {
            if self.write_log_files() {
                file.sync_data()?;
                self.fsync_ctr.fetch_add(1, Ordering::Relaxed);
            }
        }
        output.dir = None;
        Ok(())
    }

    /// Emit the final shutdown marker. Only written when no transactions
    /// are live; otherwise recovery still has work to do.
    pub fn shutdown(&self) -> Result<()> {
        if self.is_open() && self.live_txns.is_empty() {
            records::log_comment(self, None, true, Bytes::from_static(b"shutdown"))?;
        }
        Ok(())
    }

    /// Close and reopen the log as part of recovery, resetting the LSN
    /// counters to `last_lsn`. Single-threaded by contract.
    pub fn restart(&self, last_lsn: Lsn) -> Result<()> {
        if self.is_panicked() || !self.is_open() {
            return Err(Error::InvalidArg("logger is not open or has panicked"));
        }
        let mut fsynced_lsn = self.grab_output();
        let input = self.lock_input();
        let mut output = self.output.lock();
        let result = self.restart_inner(input, &mut output, &mut fsynced_lsn, last_lsn);
        drop(output);
        match result {
            Ok(()) => {
                self.release_output(fsynced_lsn);
                Ok(())
            }
            Err(e) => {
                self.panic_with(&e);
                self.release_output(fsynced_lsn);
                Err(e)
            }
        }
    }

    fn restart_inner(
        &self,
        input: MutexGuard<'_, Input>,
        output: &mut Output,
        fsynced_lsn: &mut Lsn,
        last_lsn: Lsn,
    ) -> Result<()> {
        self.write_buffer(input, output, fsynced_lsn)?;
        if let Some(file) = output.file.take() {
            if self.write_log_files() {
                file.sync_data()?;
                self.fsync_ctr.fetch_add(1, Ordering::Relaxed);
            }
        }
        {
            let mut input = self.lock_input();
            input.lsn = last_lsn;
            input.inbuf.max_lsn = last_lsn;
        }
        output.written_lsn = last_lsn;
        output.outbuf.max_lsn = last_lsn;
        self.permit.lock().fsynced_lsn = last_lsn;
        *fsynced_lsn = last_lsn;
        self.write_log_files.store(true, Ordering::SeqCst);
        self.trim_log_files.store(true, Ordering::SeqCst);
        self.open_logfile(output, fsynced_lsn)
    }

    // ----- tunables, only legal before open -----

    /// Rollover threshold; must fit in 30 bits.
    pub fn set_lg_max(&self, lg_max: u32) -> Result<()> {
        if self.is_panicked() || self.is_open() {
            return Err(Error::InvalidArg("logger is already open or panicked"));
        }
        if lg_max as usize > SIZE_LIMIT {
            return Err(Error::InvalidArg("lg_max too large"));
        }
        self.lg_max.store(lg_max, Ordering::SeqCst);
        Ok(())
    }

    pub fn get_lg_max(&self) -> u32 {
        self.lg_max.load(Ordering::SeqCst)
    }

    /// Buffer capacity hint.
    pub fn set_lg_bsize(&self, bsize: u32) -> Result<()> {
        if self.is_panicked() || self.is_open() {
            return Err(Error::InvalidArg("logger is already open or panicked"));
        }
        if bsize == 0 || bsize as usize > SIZE_LIMIT {
            return Err(Error::InvalidArg("bad buffer size"));
        }
        self.write_block_size.store(bsize, Ordering::SeqCst);
        Ok(())
    }

    /// When disabled, all writes go to the null device and every fsync is a
    /// nop, but LSN bookkeeping stays intact. Test escape hatch.
    pub fn set_write_log_files(&self, write_log_files: bool) -> Result<()> {
        if self.is_open() {
            return Err(Error::InvalidArg("logger is already open"));
        }
        self.write_log_files.store(write_log_files, Ordering::SeqCst);
        Ok(())
    }

    pub fn set_trim_log_files(&self, trim_log_files: bool) -> Result<()> {
        if self.is_open() {
            return Err(Error::InvalidArg("logger is already open"));
        }
        self.trim_log_files.store(trim_log_files, Ordering::SeqCst);
        Ok(())
    }

    // ----- observability -----

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    pub fn is_panicked(&self) -> bool {
        self.panicked.load(Ordering::SeqCst)
    }

    pub fn panic_errno(&self) -> i32 {
        self.panic_errno.load(Ordering::SeqCst)
    }

    /// Sticky failure: once panicked, every fallible entry point returns
    /// `InvalidArg` and the original errno stays readable here.
    pub fn panic(&self, errno: i32) {
        tracing::error!(errno, "logger panicked");
        self.panic_errno.store(errno, Ordering::SeqCst);
        self.panicked.store(true, Ordering::SeqCst);
    }

    fn panic_with(&self, err: &Error) {
        self.panic(err.raw_os_error().unwrap_or(0));
    }

    /// The most recently allocated LSN.
    pub fn last_lsn(&self) -> Lsn {
        self.input.lock().lsn
    }

    /// The LSN the next append will receive.
    pub fn next_lsn(&self) -> Lsn {
        self.input.lock().lsn.next()
    }

    /// Highest LSN known durable on stable storage.
    pub fn fsynced_lsn(&self) -> Lsn {
        self.permit.lock().fsynced_lsn
    }

    pub fn status(&self) -> LoggerStatus {
        LoggerStatus {
            input_lock_ctr: self.input_lock_ctr.load(Ordering::Relaxed),
            output_condition_lock_ctr: self.output_condition_lock_ctr.load(Ordering::Relaxed),
            swap_ctr: self.swap_ctr.load(Ordering::Relaxed),
            fsync_ctr: self.fsync_ctr.load(Ordering::Relaxed),
        }
    }

    fn write_log_files(&self) -> bool {
        self.write_log_files.load(Ordering::SeqCst)
    }

    fn trim_log_files(&self) -> bool {
        self.trim_log_files.load(Ordering::SeqCst)
    }

    fn write_block_size(&self) -> u32 {
        self.write_block_size.load(Ordering::SeqCst)
    }

    // ----- live transactions -----

    /// Register a transaction as live. Called by the transaction manager
    /// when it hands out a TXNID.
    pub fn register_live_txn(&self, txnid: TxnId) -> Arc<LiveTxn> {
        let txn = Arc::new(LiveTxn::new(txnid, self.weak_self.clone()));
        self.live_txns.insert(txn.clone());
        txn
    }

    pub fn retire_live_txn(&self, txnid: TxnId) -> Option<Arc<LiveTxn>> {
        self.live_txns.remove(txnid)
    }

    pub fn txnid_to_txn(&self, txnid: TxnId) -> Option<Arc<LiveTxn>> {
        self.live_txns.find(txnid)
    }

    pub fn is_txnid_live(&self, txnid: TxnId) -> bool {
        self.live_txns.find(txnid).is_some()
    }

    pub fn num_live_txns(&self) -> usize {
        self.live_txns.len()
    }

    pub fn min_live_txnid(&self) -> Option<TxnId> {
        self.live_txns.min_txnid()
    }

    pub fn oldest_living_xid(&self) -> TxnId {
        self.oldest_living_xid.load(Ordering::SeqCst)
    }

    /// The transaction manager tells the logger when the oldest live TXNID
    /// changes; the logger never computes it on its own.
    pub fn set_oldest_living_xid(&self, txnid: TxnId) {
        self.oldest_living_xid.store(txnid, Ordering::SeqCst);
    }

    // ----- callbacks and the rollback hook -----

    pub fn set_remove_finalize_callback(
        &self,
        callback: impl Fn(DictId) + Send + Sync + 'static,
    ) {
        *self.remove_finalize_callback.lock() = Some(Box::new(callback));
    }

    /// Invoked when a file delete commits or a file create aborts.
    /// Fire-and-forget: having no callback installed is fine.
    pub fn call_remove_finalize_callback(&self, dict_id: DictId) {
        if let Some(callback) = &*self.remove_finalize_callback.lock() {
            callback(dict_id);
        }
    }

    /// Attach the undo store. The handle stays opaque; the logger only
    /// guarantees that log close and store close are driven by one owner.
    pub fn open_rollback(&self, store: Box<dyn RollbackStore>, create: bool) -> Result<()> {
        if !self.is_open() || self.is_panicked() {
            return Err(Error::InvalidArg("logger is not open or has panicked"));
        }
        let mut rollback = self.rollback.lock();
        if rollback.is_some() {
            return Err(Error::InvalidArg("rollback store is already attached"));
        }
        store.open(create)?;
        *rollback = Some(store);
        Ok(())
    }

    /// Detach and close the undo store. It must be clean and empty unless
    /// recovery failed, in which case it is poisoned before closing.
    pub fn close_rollback(&self, recovery_failed: bool) -> Result<()> {
        let store = self.rollback.lock().take();
        let Some(store) = store else {
            return Ok(());
        };
        if self.is_panicked() {
            return Ok(());
        }
        if recovery_failed {
            store.set_panicked();
        } else {
            assert!(store.is_clean());
            assert!(store.is_empty());
        }
        store.close()
    }

    // ----- checkpoint, trim, archive -----

    /// Record that a checkpoint completed through `lsn`. Files entirely
    /// older than this may be trimmed or archived.
    pub fn note_checkpoint(&self, lsn: Lsn) {
        self.last_completed_checkpoint_lsn
            .store(lsn.0, Ordering::SeqCst);
    }

    pub fn last_completed_checkpoint_lsn(&self) -> Lsn {
        Lsn(self.last_completed_checkpoint_lsn.load(Ordering::SeqCst))
    }

    /// Delete log files whose content is entirely at or below `trim_lsn`.
    /// The current file always survives. A deletion error aborts the sweep
    /// but does not panic the logger.
    #[tracing::instrument(skip(self))]
    pub fn maybe_trim_log(&self, trim_lsn: Lsn) -> Result<()> {
        if self.is_panicked() || !self.is_open() {
            return Err(Error::InvalidArg("logger is not open or has panicked"));
        }
        let fsynced_lsn = self.grab_output();
        let mut output = self.output.lock();
        let mut result = Ok(());
        if self.write_log_files() && self.trim_log_files() {
            while output.file_mgr.num_logfiles() > 1 {
                let oldest = *output.file_mgr.get_oldest().expect("catalog is empty");
                if oldest.max_lsn > trim_lsn {
                    // Contains records past the watermark, as does
                    // everything newer.
                    break;
                }
                output.file_mgr.delete_oldest();
                let path = file_mgr::log_file_name(&output.dir_path, oldest.index);
                tracing::debug!(index = oldest.index, "trimming log file");
                if let Err(e) = std::fs::remove_file(&path) {
                    result = Err(e.into());
                    break;
                }
            }
        }
        drop(output);
        self.release_output(fsynced_lsn);
        result
    }

    /// Paths of the log files safe to copy elsewhere, oldest first: all
    /// files strictly older than the newest file whose first record is at
    /// or below the last completed checkpoint. The active file is never
    /// returned.
    #[tracing::instrument(skip(self))]
    pub fn log_archive(&self, flags: u32) -> Result<Vec<PathBuf>> {
        if flags != 0 {
            return Err(Error::InvalidArg("unsupported archive flags"));
        }
        if self.is_panicked() || !self.is_open() {
            return Err(Error::InvalidArg("logger is not open or has panicked"));
        }
        let fsynced_lsn = self.grab_output();
        let dir_path = self.output.lock().dir_path.clone();
        let files = file_mgr::list_log_files(&dir_path);
        self.release_output(fsynced_lsn);
        let files = files?;
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let checkpoint_lsn = self.last_completed_checkpoint_lsn();
        // A file whose first LSN cannot be read is treated as not
        // archivable; if a newer file qualifies, this one is covered anyway.
        let qualifies = |path: &Path| match crate::cursor::peek_first_lsn(path) {
            Ok(Some(first)) => first <= checkpoint_lsn,
            _ => false,
        };

        let n = files.len();
        let mut boundary = 0;
        if qualifies(&files[n - 1].1) {
            boundary = n - 1;
        } else {
            for i in (0..n - 1).rev() {
                if qualifies(&files[i].1) {
                    boundary = i;
                    break;
                }
            }
        }
        Ok(files
            .into_iter()
            .take(boundary)
            .map(|(_, path)| path)
            .collect())
    }

    // ----- fsync entry points -----

    /// Flush everything queued and sync through it.
    pub fn fsync(&self) -> Result<()> {
        if self.is_panicked() || !self.is_open() {
            return Err(Error::InvalidArg("logger is not open or has panicked"));
        }
        let input = self.lock_input();
        // Sync through the last allocated LSN, not just what currently sits
        // in the inbuf: a swap leaves a stale max in the idle buffer.
        let target = input.lsn;
        self.maybe_fsync(input, target, true)
    }

    /// Nop when `lsn` is already durable.
    pub fn fsync_if_lsn_not_fsynced(&self, lsn: Lsn) -> Result<()> {
        if self.is_panicked() || !self.is_open() {
            return Err(Error::InvalidArg("logger is not open or has panicked"));
        }
        if self.write_log_files() && self.fsynced_lsn() < lsn {
            let input = self.lock_input();
            self.maybe_fsync(input, lsn, true)?;
            debug_assert!(self.fsynced_lsn() >= lsn);
        }
        Ok(())
    }

    // ----- the append path -----

    /// Allocate the next LSN, frame `entry` into the in-buffer and, when
    /// `do_fsync` is set, return only once the record is durable.
    pub(crate) fn append(
        &self,
        mut entry: LogEntry,
        do_fsync: bool,
        lsn_out: Option<&mut Lsn>,
    ) -> Result<()> {
        if self.is_panicked() || !self.is_open() {
            return Err(Error::InvalidArg("logger is not open or has panicked"));
        }
        let needed = entry.wire_len();
        let mut input = self.lock_input();
        if !input.inbuf.has_room(needed) {
            input = self.make_space_in_inbuf(input, needed)?;
        }
        let lsn = input.lsn.next();
        input.lsn = lsn;
        entry.set_lsn(lsn);
        if let Some(out) = lsn_out {
            *out = lsn;
        }
        records::frame_into(&mut input.inbuf.bytes, &entry);
        input.inbuf.max_lsn = lsn;
        self.maybe_fsync(input, lsn, do_fsync)
    }

    /// Entry and exit: holds the input lock, with room for `needed` bytes on
    /// exit. May briefly release the input lock to take output permission,
    /// so the caller must not rely on buffer state across the call.
    fn make_space_in_inbuf<'a>(
        &'a self,
        input: MutexGuard<'a, Input>,
        needed: usize,
    ) -> Result<MutexGuard<'a, Input>> {
        if input.inbuf.has_room(needed) {
            return Ok(input);
        }
        drop(input);
        let mut fsynced_lsn = self.grab_output();
        let mut input = self.lock_input();
        // Another thread may have drained the buffer while we waited.
        if input.inbuf.has_room(needed) {
            self.release_output(fsynced_lsn);
            return Ok(input);
        }
        if !input.inbuf.bytes.is_empty() {
            let mut output = self.output.lock();
            self.swap_inbuf_outbuf(&mut input, &mut output);
            // Keep the input lock across this write: appenders queue behind
            // us instead of starving this thread.
            if let Err(e) = self.write_outbuf_to_logfile(&mut output, &mut fsynced_lsn) {
                drop(output);
                drop(input);
                self.panic_with(&e);
                self.release_output(fsynced_lsn);
                return Err(e);
            }
        }
        // The inbuf is now empty; make sure a single record can ever fit.
        if needed > input.inbuf.cap {
            assert!(needed < SIZE_LIMIT);
            let new_cap = std::cmp::max(input.inbuf.cap * 2, needed);
            assert!(new_cap < SIZE_LIMIT);
            if let Err(e) = input.inbuf.grow_to(new_cap) {
                drop(input);
                self.release_output(fsynced_lsn);
                return Err(e);
            }
        }
        self.release_output(fsynced_lsn);
        Ok(input)
    }

    /// Entry: holds the input lock, record already in the in-buffer.
    /// Exit: holds no locks. When `do_fsync` is set, `lsn` is durable on
    /// return; either someone else flushed past it while we waited (the
    /// group commit case) or we became the flusher.
    fn maybe_fsync(&self, input: MutexGuard<'_, Input>, lsn: Lsn, do_fsync: bool) -> Result<()> {
        if !do_fsync {
            drop(input);
            return Ok(());
        }
        drop(input);
        let (already_done, mut fsynced_lsn) = self.wait_till_output_written_or_available(lsn);
        if already_done {
            return Ok(());
        }
        // We own output permission and lsn has not reached disk yet.
        let mut input = self.lock_input();
        let mut output = self.output.lock();
        self.swap_inbuf_outbuf(&mut input, &mut output);
        // Release the input lock before touching the file so other threads
        // refill the inbuf while we write. This is what makes commits group.
        drop(input);
        let result = self.flush_through(&mut output, &mut fsynced_lsn, lsn);
        drop(output);
        match result {
            Ok(()) => {
                self.release_output(fsynced_lsn);
                Ok(())
            }
            Err(e) => {
                self.panic_with(&e);
                self.release_output(fsynced_lsn);
                Err(e)
            }
        }
    }

    fn flush_through(&self, output: &mut Output, fsynced_lsn: &mut Lsn, lsn: Lsn) -> Result<()> {
        self.write_outbuf_to_logfile(output, fsynced_lsn)?;
        if *fsynced_lsn < lsn {
            // A rollover inside the write may already have synced past us.
            self.fsync_logfile(output)?;
            assert!(*fsynced_lsn <= output.written_lsn);
            *fsynced_lsn = output.written_lsn;
        }
        if self.write_log_files() {
            output.file_mgr.update_last_lsn(output.written_lsn);
        }
        Ok(())
    }

    fn fsync_logfile(&self, output: &Output) -> Result<()> {
        if self.write_log_files() {
            output
                .file
                .as_ref()
                .expect("log file is open")
                .sync_data()?;
            self.fsync_ctr.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Entry and exit: holds output permission. The input lock may be held
    /// as well; other producers block on it, not on us.
    fn write_outbuf_to_logfile(&self, output: &mut Output, fsynced_lsn: &mut Lsn) -> Result<()> {
        if !output.outbuf.bytes.is_empty() {
            let file = output.file.as_ref().expect("log file is open");
            file.write_all_at(&output.outbuf.bytes, output.n_in_file)?;
            // There is something in the buffer, so its LSN must be past
            // everything previously written.
            assert!(output.outbuf.max_lsn > output.written_lsn);
            output.written_lsn = output.outbuf.max_lsn;
            output.n_in_file += output.outbuf.bytes.len() as u64;
            output.outbuf.bytes.clear();
        }
        if output.n_in_file > self.get_lg_max() as u64 {
            self.close_and_open_logfile(output, fsynced_lsn)?;
        }
        Ok(())
    }

    fn close_and_open_logfile(&self, output: &mut Output, fsynced_lsn: &mut Lsn) -> Result<()> {
        if self.write_log_files() {
            self.fsync_logfile(output)?;
            *fsynced_lsn = output.written_lsn;
            output.file_mgr.update_last_lsn(output.written_lsn);
        }
        output.file = None;
        self.open_logfile(output, fsynced_lsn)
    }

    fn open_logfile(&self, output: &mut Output, fsynced_lsn: &mut Lsn) -> Result<()> {
        let index = output.next_file_index;
        let file = if self.write_log_files() {
            let path = file_mgr::log_file_name(&output.dir_path, index);
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o700)
                .open(&path)?;
            if let Some(dir) = &output.dir {
                // Capture the new directory entry before writing through it.
                dir.sync_all()?;
            }
            output.next_file_index += 1;
            file
        } else {
            OpenOptions::new().write(true).open("/dev/null")?
        };
        let header = LogFileHeader::new();
        file.write_all_at(header.as_bytes(), 0)?;
        if self.write_log_files() {
            output.file_mgr.add(LogFileInfo {
                index,
                max_lsn: output.written_lsn,
            });
        }
        *fsynced_lsn = output.written_lsn;
        output.n_in_file = LOG_HEADER_LEN as u64;
        output.file = Some(file);
        tracing::debug!(index, "opened log file");
        Ok(())
    }

    /// Entry: holds the input lock and output permission.
    /// Exit: input lock released, permission still held. Only used by the
    /// single-threaded paths (close, restart).
    fn write_buffer(
        &self,
        mut input: MutexGuard<'_, Input>,
        output: &mut Output,
        fsynced_lsn: &mut Lsn,
    ) -> Result<()> {
        self.swap_inbuf_outbuf(&mut input, output);
        drop(input);
        self.write_outbuf_to_logfile(output, fsynced_lsn)?;
        if self.write_log_files() {
            self.fsync_logfile(output)?;
            *fsynced_lsn = output.written_lsn;
            output.file_mgr.update_last_lsn(output.written_lsn);
        }
        Ok(())
    }

    /// Entry and exit: holds the input lock and output permission.
    fn swap_inbuf_outbuf(&self, input: &mut Input, output: &mut Output) {
        std::mem::swap(&mut input.inbuf, &mut output.outbuf);
        assert_eq!(input.inbuf.bytes.len(), 0);
        self.swap_ctr.fetch_add(1, Ordering::Relaxed);
    }

    // ----- the output-permission monitor -----

    fn lock_input(&self) -> MutexGuard<'_, Input> {
        self.input_lock_ctr.fetch_add(1, Ordering::Relaxed);
        self.input.lock()
    }

    /// Wait for and take output permission. Must not be called with the
    /// input lock held, except from the single-threaded paths.
    fn grab_output(&self) -> Lsn {
        self.output_condition_lock_ctr.fetch_add(1, Ordering::Relaxed);
        let mut permit = self.permit.lock();
        while !permit.available {
            self.output_cond.wait(&mut permit);
        }
        permit.available = false;
        permit.fsynced_lsn
    }

    /// Release output permission, merging our view of the durable LSN, and
    /// wake every waiter: some learn their commit is already durable, one
    /// becomes the next flusher.
    fn release_output(&self, fsynced_lsn: Lsn) {
        self.output_condition_lock_ctr.fetch_add(1, Ordering::Relaxed);
        let mut permit = self.permit.lock();
        permit.available = true;
        if permit.fsynced_lsn < fsynced_lsn {
            permit.fsynced_lsn = fsynced_lsn;
        }
        self.output_cond.notify_all();
    }

    /// Wait until either `lsn` is durable (returns `true`, permission not
    /// taken) or output becomes available (returns `false`, permission
    /// taken). Also returns the durable LSN observed under the lock.
    fn wait_till_output_written_or_available(&self, lsn: Lsn) -> (bool, Lsn) {
        self.output_condition_lock_ctr.fetch_add(1, Ordering::Relaxed);
        let mut permit = self.permit.lock();
        loop {
            if permit.fsynced_lsn >= lsn {
                return (true, permit.fsynced_lsn);
            }
            if permit.available {
                permit.available = false;
                return (false, permit.fsynced_lsn);
            }
            self.output_cond.wait(&mut permit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_requires_open() {
        let logger = Logger::create();
        assert!(matches!(
            records::log_comment(&logger, None, false, Bytes::from_static(b"x")),
            Err(Error::InvalidArg(_))
        ));
    }

    #[test]
    fn tunables_are_validated_and_pre_open_only() {
        let logger = Logger::create();
        assert_eq!(logger.get_lg_max(), DEFAULT_LG_MAX);
        logger.set_lg_max(1 << 30).unwrap();
        assert!(logger.set_lg_max((1 << 30) + 1).is_err());
        assert!(logger.set_lg_bsize(0).is_err());
        logger.set_lg_bsize(1 << 20).unwrap();

        let dir = tempfile::tempdir().unwrap();
        logger.open(dir.path()).unwrap();
        assert!(logger.set_lg_max(1024).is_err());
        assert!(logger.set_lg_bsize(1024).is_err());
        assert!(logger.set_write_log_files(false).is_err());
        assert!(logger.set_trim_log_files(false).is_err());
        assert!(logger.open(dir.path()).is_err());
        logger.close().unwrap();
    }

    #[test]
    fn manual_panic_is_sticky() {
        let logger = Logger::create();
        let dir = tempfile::tempdir().unwrap();
        logger.open(dir.path()).unwrap();
        logger.panic(5);
        assert!(logger.is_panicked());
        assert_eq!(logger.panic_errno(), 5);
        assert!(matches!(logger.fsync(), Err(Error::InvalidArg(_))));
        assert!(matches!(logger.close(), Err(Error::InvalidArg(_))));
    }

    #[test]
    fn oldest_living_xid_is_externally_maintained() {
        let logger = Logger::create();
        assert_eq!(logger.oldest_living_xid(), TXNID_NONE);
        logger.set_oldest_living_xid(12);
        assert_eq!(logger.oldest_living_xid(), 12);
        assert_eq!(logger.min_live_txnid(), None);
        let _txn = logger.register_live_txn(12);
        assert_eq!(logger.min_live_txnid(), Some(12));
    }
}
