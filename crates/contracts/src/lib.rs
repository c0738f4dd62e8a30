//! VeilPool contract bindings
//!
//! ABI declarations for the fixed-denomination Veil pools and decoding of
//! their logs into the [`PoolEvent`] tagged union consumed by the indexer.

pub mod bindings;
pub mod pool;

pub use bindings::IVeilPool;
pub use pool::{
    event_signatures, DecodeError, DepositEvent, PoolEvent, RawLog, ValidatorChangedEvent,
    WithdrawalEvent, MAX_TIMESTAMP,
};
