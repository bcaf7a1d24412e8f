//! The live-transaction registry. The transaction manager owns transactions
//! and drives their lifecycle; the logger only indexes them to answer "is
//! this TXNID live?" and to gate shutdown.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::records;
use crate::types::{FileNum, TxnId};

/// A live transaction known to the logger. Holds a weak back-reference to
/// its logger; the logger never owns transactions.
pub struct LiveTxn {
    txnid: TxnId,
    logger: Weak<Logger>,
}

impl LiveTxn {
    pub(crate) fn new(txnid: TxnId, logger: Weak<Logger>) -> Self {
        Self { txnid, logger }
    }

    pub fn txnid(&self) -> TxnId {
        self.txnid
    }

    pub fn logger(&self) -> Option<Arc<Logger>> {
        self.logger.upgrade()
    }

    fn live_logger(&self) -> Result<Arc<Logger>> {
        self.logger
            .upgrade()
            .ok_or(Error::InvalidArg("logger is gone"))
    }

    /// Record the creation of a table file. Synced before returning so the
    /// file never exists on disk without its log record.
    pub fn log_fcreate(
        &self,
        fname: &[u8],
        filenum: FileNum,
        mode: u32,
        treeflags: u32,
        descriptor_version: u32,
        descriptor: Bytes,
    ) -> Result<()> {
        let logger = self.live_logger()?;
        records::log_fcreate(
            &logger,
            None,
            true,
            self.txnid,
            filenum,
            Bytes::copy_from_slice(fname),
            mode,
            treeflags,
            descriptor_version,
            descriptor,
        )
    }

    pub fn log_fdelete(&self, fname: &[u8]) -> Result<()> {
        let logger = self.live_logger()?;
        records::log_fdelete(
            &logger,
            None,
            false,
            self.txnid,
            Bytes::copy_from_slice(fname),
        )
    }

    /// Bookkeeping only: which filename a FILENUM refers to.
    pub fn log_fopen(&self, fname: &[u8], filenum: FileNum, treeflags: u32) -> Result<()> {
        let logger = self.live_logger()?;
        records::log_fopen(
            &logger,
            None,
            false,
            Bytes::copy_from_slice(fname),
            filenum,
            treeflags,
        )
    }
}

/// Ordered index of the live transactions, keyed by TXNID.
#[derive(Default)]
pub struct LiveTxnIndex {
    txns: Mutex<BTreeMap<TxnId, Arc<LiveTxn>>>,
}

impl LiveTxnIndex {
    pub fn insert(&self, txn: Arc<LiveTxn>) {
        self.txns.lock().insert(txn.txnid, txn);
    }

    pub fn remove(&self, txnid: TxnId) -> Option<Arc<LiveTxn>> {
        self.txns.lock().remove(&txnid)
    }

    pub fn find(&self, txnid: TxnId) -> Option<Arc<LiveTxn>> {
        self.txns.lock().get(&txnid).cloned()
    }

    /// Smallest live TXNID, if any.
    pub fn min_txnid(&self) -> Option<TxnId> {
        self.txns.lock().keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.txns.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.txns.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dangling(txnid: TxnId) -> Arc<LiveTxn> {
        Arc::new(LiveTxn::new(txnid, Weak::new()))
    }

    #[test]
    fn index_orders_by_txnid() {
        let index = LiveTxnIndex::default();
        assert!(index.is_empty());
        assert_eq!(index.min_txnid(), None);

        for txnid in [9, 3, 7] {
            index.insert(dangling(txnid));
        }
        assert_eq!(index.len(), 3);
        assert_eq!(index.min_txnid(), Some(3));
        assert!(index.find(7).is_some());
        assert!(index.find(8).is_none());

        assert_eq!(index.remove(3).unwrap().txnid(), 3);
        assert_eq!(index.min_txnid(), Some(7));
        assert!(index.remove(3).is_none());
    }

    #[test]
    fn helpers_fail_without_a_logger() {
        let txn = dangling(1);
        assert!(txn.logger().is_none());
        assert!(matches!(
            txn.log_fdelete(b"gone.db"),
            Err(Error::InvalidArg(_))
        ));
    }
}
