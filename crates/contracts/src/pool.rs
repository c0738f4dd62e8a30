use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolEvent;
use thiserror::Error;

use crate::bindings::IVeilPool;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Log has no topics")]
    MissingTopic,

    #[error("Unknown event signature: {0}")]
    UnknownEvent(B256),

    #[error("ABI decode error: {0}")]
    Abi(#[from] alloy_sol_types::Error),

    #[error("Value out of range for {0}")]
    OutOfRange(&'static str),
}

/// Undecoded log as delivered by the event source
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub log_index: u64,
}

/// Deposit event data
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepositEvent {
    pub pool: Address,
    pub commitment: B256,
    pub sender: Address,
    pub leaf_index: u32,
    pub timestamp: u64,
}

/// Withdrawal event data
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WithdrawalEvent {
    pub pool: Address,
    pub nullifier_hash: B256,
    pub recipient: Address,
    pub relayer: Address,
    pub fee: U256,
    pub timestamp: u64,
}

/// Validator reassignment (`UpdateVerifiedDepositor`)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorChangedEvent {
    pub pool: Address,
    pub new_validator: Address,
}

/// Every event kind the indexer reconciles
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolEvent {
    Deposit(DepositEvent),
    Withdrawal(WithdrawalEvent),
    ValidatorChanged(ValidatorChangedEvent),
}

impl PoolEvent {
    /// Address of the pool that emitted the event
    pub fn pool(&self) -> Address {
        match self {
            Self::Deposit(e) => e.pool,
            Self::Withdrawal(e) => e.pool,
            Self::ValidatorChanged(e) => e.pool,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Deposit(_) => "Deposit",
            Self::Withdrawal(_) => "Withdrawal",
            Self::ValidatorChanged(_) => "ValidatorChanged",
        }
    }

    /// Decode a raw VeilPool log into a typed event.
    ///
    /// The emitting address becomes the pool identity; topic0 selects the
    /// event kind.
    pub fn decode(log: &RawLog) -> Result<Self, DecodeError> {
        let topic0 = *log.topics.first().ok_or(DecodeError::MissingTopic)?;
        let topics = log.topics.iter().copied();

        if topic0 == IVeilPool::Deposit::SIGNATURE_HASH {
            let ev = IVeilPool::Deposit::decode_raw_log(topics, &log.data)?;
            Ok(Self::Deposit(DepositEvent {
                pool: log.address,
                commitment: ev.commitment,
                sender: ev.sender,
                leaf_index: ev.leafIndex,
                timestamp: to_timestamp(ev.timestamp)?,
            }))
        } else if topic0 == IVeilPool::Withdrawal::SIGNATURE_HASH {
            let ev = IVeilPool::Withdrawal::decode_raw_log(topics, &log.data)?;
            Ok(Self::Withdrawal(WithdrawalEvent {
                pool: log.address,
                nullifier_hash: ev.nullifierHash,
                recipient: ev.to,
                relayer: ev.relayer,
                fee: ev.fee,
                timestamp: to_timestamp(ev.timestamp)?,
            }))
        } else if topic0 == IVeilPool::UpdateVerifiedDepositor::SIGNATURE_HASH {
            let ev = IVeilPool::UpdateVerifiedDepositor::decode_raw_log(topics, &log.data)?;
            Ok(Self::ValidatorChanged(ValidatorChangedEvent {
                pool: log.address,
                new_validator: ev.newVeilVerifier,
            }))
        } else {
            Err(DecodeError::UnknownEvent(topic0))
        }
    }
}

/// Topic0 values of every event the indexer subscribes to
pub fn event_signatures() -> [B256; 3] {
    [
        IVeilPool::Deposit::SIGNATURE_HASH,
        IVeilPool::Withdrawal::SIGNATURE_HASH,
        IVeilPool::UpdateVerifiedDepositor::SIGNATURE_HASH,
    ]
}

/// Largest timestamp the indexer can store (SQLite INTEGER is signed 64-bit)
pub const MAX_TIMESTAMP: u64 = i64::MAX as u64;

fn to_timestamp(value: U256) -> Result<u64, DecodeError> {
    u64::try_from(value)
        .ok()
        .filter(|ts| *ts <= MAX_TIMESTAMP)
        .ok_or(DecodeError::OutOfRange("timestamp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Address {
        "0x6c206B5389de4e5a23FdF13BF38104CE8Dd2eD5f".parse().unwrap()
    }

    fn raw(data: alloy_primitives::LogData) -> RawLog {
        RawLog {
            address: pool(),
            topics: data.topics().to_vec(),
            data: data.data,
            block_number: 24_532_700,
            log_index: 3,
        }
    }

    #[test]
    fn test_decode_deposit() {
        let commitment = B256::repeat_byte(0xc1);
        let sender = Address::repeat_byte(0x11);
        let log = raw(
            IVeilPool::Deposit {
                commitment,
                sender,
                leafIndex: 7,
                timestamp: U256::from(1_700_000_000u64),
            }
            .encode_log_data(),
        );

        let event = PoolEvent::decode(&log).unwrap();
        assert_eq!(
            event,
            PoolEvent::Deposit(DepositEvent {
                pool: pool(),
                commitment,
                sender,
                leaf_index: 7,
                timestamp: 1_700_000_000,
            })
        );
        assert_eq!(event.pool(), pool());
    }

    #[test]
    fn test_decode_withdrawal() {
        let log = raw(
            IVeilPool::Withdrawal {
                to: Address::repeat_byte(0x22),
                nullifierHash: B256::repeat_byte(0xaa),
                relayer: Address::repeat_byte(0x33),
                fee: U256::from(5u64),
                timestamp: U256::from(300u64),
            }
            .encode_log_data(),
        );

        match PoolEvent::decode(&log).unwrap() {
            PoolEvent::Withdrawal(w) => {
                assert_eq!(w.nullifier_hash, B256::repeat_byte(0xaa));
                assert_eq!(w.recipient, Address::repeat_byte(0x22));
                assert_eq!(w.relayer, Address::repeat_byte(0x33));
                assert_eq!(w.fee, U256::from(5u64));
                assert_eq!(w.timestamp, 300);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_validator_update() {
        let log = raw(
            IVeilPool::UpdateVerifiedDepositor {
                newVeilVerifier: Address::repeat_byte(0x44),
            }
            .encode_log_data(),
        );

        let event = PoolEvent::decode(&log).unwrap();
        assert_eq!(event.kind(), "ValidatorChanged");
        assert_eq!(
            event,
            PoolEvent::ValidatorChanged(ValidatorChangedEvent {
                pool: pool(),
                new_validator: Address::repeat_byte(0x44),
            })
        );
    }

    #[test]
    fn test_decode_rejects_unknown_and_empty() {
        let mut log = raw(
            IVeilPool::UpdateVerifiedDepositor {
                newVeilVerifier: Address::ZERO,
            }
            .encode_log_data(),
        );
        log.topics[0] = B256::repeat_byte(0xff);
        assert!(matches!(
            PoolEvent::decode(&log),
            Err(DecodeError::UnknownEvent(_))
        ));

        log.topics.clear();
        assert!(matches!(
            PoolEvent::decode(&log),
            Err(DecodeError::MissingTopic)
        ));
    }

    #[test]
    fn test_timestamp_overflow_is_rejected() {
        let log = raw(
            IVeilPool::Deposit {
                commitment: B256::ZERO,
                sender: Address::ZERO,
                leafIndex: 0,
                timestamp: U256::MAX,
            }
            .encode_log_data(),
        );
        assert!(matches!(
            PoolEvent::decode(&log),
            Err(DecodeError::OutOfRange("timestamp"))
        ));
    }

    #[test]
    fn test_timestamp_above_signed_range_is_rejected() {
        let withdrawal = |timestamp: u64| {
            raw(IVeilPool::Withdrawal {
                to: Address::ZERO,
                nullifierHash: B256::ZERO,
                relayer: Address::ZERO,
                fee: U256::ZERO,
                timestamp: U256::from(timestamp),
            }
            .encode_log_data())
        };

        assert!(matches!(
            PoolEvent::decode(&withdrawal(u64::MAX)),
            Err(DecodeError::OutOfRange("timestamp"))
        ));
        assert!(matches!(
            PoolEvent::decode(&withdrawal(MAX_TIMESTAMP + 1)),
            Err(DecodeError::OutOfRange("timestamp"))
        ));
        match PoolEvent::decode(&withdrawal(MAX_TIMESTAMP)).unwrap() {
            PoolEvent::Withdrawal(w) => assert_eq!(w.timestamp, MAX_TIMESTAMP),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
