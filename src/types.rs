use std::fmt;

/// Log sequence number. Strictly increasing across the lifetime of a logger;
/// zero is reserved to mean "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);

    pub fn next(self) -> Lsn {
        Lsn(self.0 + 1)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Transaction identifier, assigned by the transaction manager.
pub type TxnId = u64;

/// The id of a transaction that does not exist.
pub const TXNID_NONE: TxnId = 0;

/// Identifier of a stored table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileNum(pub u32);

/// Identifier of a block within a table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockNum(pub u64);

/// Identifier of a dictionary, passed through to the remove-finalize
/// callback without interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DictId(pub u64);
