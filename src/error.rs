use crate::domain::action::{ActionSlot, Operation};
use crate::domain::ids::InstanceAddress;
use crate::domain::payment::LedgerError;
use crate::policy::hook::HookError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),

    // Configuration errors: raised while constructing or deploying components.
    #[error("combinator requires at least one condition")]
    NoConditions,
    #[error("combinator accepts at most {max} conditions, got {count}")]
    TooManyConditions { count: usize, max: usize },
    #[error("combinator requires at least one recorder")]
    NoRecorders,
    #[error("combinator accepts at most {max} recorders, got {count}")]
    TooManyRecorders { count: usize, max: usize },
    #[error("no instance deployed at {0}")]
    UnknownInstance(InstanceAddress),
    #[error("no predicate registered under \"{0}\"")]
    UnknownPredicate(String),
    #[error("a predicate is already registered under \"{0}\"")]
    PredicateAlreadyRegistered(String),
    #[error("no freeze policy configured")]
    NoFreezePolicy,
    #[error("fee bounds incompatible: {fee_bps} bps outside [{min_bps}, {max_bps}]")]
    FeeBoundsIncompatible {
        fee_bps: u16,
        min_bps: u16,
        max_bps: u16,
    },

    // Authorization errors: a pipeline stage refused the caller.
    #[error("condition not met for {operation}")]
    ConditionNotMet { operation: Operation },
    #[error("caller is not authorized to freeze this payment")]
    UnauthorizedFreeze,
    #[error("caller is not authorized to unfreeze this payment")]
    UnauthorizedUnfreeze,
    #[error("caller is neither the payer nor the arbiter")]
    NotPayerOrArbiter,
    #[error("before-hook rejected {slot}: {source}")]
    BeforeHookRejected {
        slot: ActionSlot,
        #[source]
        source: HookError,
    },

    // State errors: right caller, wrong moment or wrong state.
    #[error("payment is already frozen")]
    AlreadyFrozen,
    #[error("payment is not frozen")]
    NotFrozen,
    #[error("payment has not been authorized through this escrow period")]
    NotAuthorized,
    #[error("escrow period expired at {expired_at}")]
    EscrowPeriodExpired { expired_at: u64 },
    #[error("release is locked while the payment is frozen or inside its escrow period")]
    ReleaseLocked,

    // Post-ledger stages. Both are fatal to the transition.
    #[error("after-hook failed for {slot}: {source}")]
    AfterHookFailed {
        slot: ActionSlot,
        #[source]
        source: HookError,
    },
    #[error("recorder failed: {0}")]
    RecorderFailed(#[source] HookError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, PaymentError>;
