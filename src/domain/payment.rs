use super::amount::{Amount, Balance, MAX_FEE_BPS};
use super::ids::{Address, AssetId, Digest, PaymentId, Timestamp};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const PAYMENT_ID_DOMAIN: &str = "escrow-policy/payment/v1";

/// Immutable description of one payment.
///
/// Never mutated after creation; its content hash ([`PaymentInfo::id`]) is
/// the key used by every per-payment map. Two values with identical fields
/// share a `PaymentId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    /// The coordinator allowed to drive this payment.
    pub operator: Address,
    pub payer: Address,
    pub receiver: Address,
    pub asset: AssetId,
    /// Upper bound for the authorized amount.
    pub max_amount: Amount,
    /// Authorization must happen strictly before this time.
    pub pre_approval_expiry: Timestamp,
    /// Release must happen strictly before this time; reclaim only after.
    pub authorization_expiry: Timestamp,
    /// Post-escrow refunds must happen strictly before this time.
    pub refund_expiry: Timestamp,
    pub min_fee_bps: u16,
    pub max_fee_bps: u16,
    /// When set, fees may only be paid to this party.
    #[serde(default)]
    pub fee_receiver: Option<Address>,
    /// Distinguishes otherwise identical payments.
    pub salt: u64,
}

impl PaymentInfo {
    /// Content hash of this payment.
    pub fn id(&self) -> Result<PaymentId> {
        Digest::of_canonical(PAYMENT_ID_DOMAIN, self).map(PaymentId)
    }
}

/// Ledger validation failures.
///
/// These are the ledger actor's own checks; any of them aborts the
/// transition that triggered it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("payment is operated by {expected}, not {actual}")]
    WrongOperator { expected: Address, actual: Address },
    #[error("payment has already been collected")]
    AlreadyCollected,
    #[error("payment has not been authorized")]
    NotCollected,
    #[error("amount {requested} exceeds the payment maximum {max}")]
    ExceedsMaxAmount { requested: Amount, max: Amount },
    #[error("pre-approval expired at {0}")]
    AfterPreApprovalExpiry(Timestamp),
    #[error("authorization expired at {0}")]
    AfterAuthorizationExpiry(Timestamp),
    #[error("authorization does not expire before {0}")]
    BeforeAuthorizationExpiry(Timestamp),
    #[error("refund window closed at {0}")]
    AfterRefundExpiry(Timestamp),
    #[error("expiries must satisfy pre-approval <= authorization <= refund")]
    InvalidExpiries,
    #[error("fee range [{min_bps}, {max_bps}] is invalid")]
    InvalidFeeBps { min_bps: u16, max_bps: u16 },
    #[error("fee of {fee_bps} bps outside payment range [{min_bps}, {max_bps}]")]
    FeeBpsOutOfRange {
        fee_bps: u16,
        min_bps: u16,
        max_bps: u16,
    },
    #[error("fees for this payment must be paid to {expected}")]
    InvalidFeeReceiver { expected: Address },
    #[error("requested {requested} but only {available} is capturable")]
    InsufficientCapturable { requested: Amount, available: Balance },
    #[error("requested {requested} but only {available} is refundable")]
    RefundExceedsCaptured { requested: Amount, available: Balance },
    #[error("nothing left in escrow to refund")]
    NothingToRefund,
    #[error("arithmetic overflow")]
    Overflow,
}

/// A change to one party's net position in one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub party: Address,
    pub asset: AssetId,
    pub delta: Balance,
}

/// A staged ledger write: the new record and the postings that move funds.
///
/// Stores apply entries atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub record: PaymentRecord,
    pub postings: Vec<Posting>,
}

/// Ledger bookkeeping for one payment.
///
/// Mutated only through the primitives below, which validate first and then
/// apply, so a failed primitive leaves the record untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: PaymentId,
    /// Whether funds were ever collected from the payer.
    pub collected: bool,
    /// Funds held in escrow that can still be released or refunded.
    pub capturable: Balance,
    /// Released funds that can still be refunded post escrow.
    pub refundable: Balance,
}

impl PaymentRecord {
    pub fn new(payment_id: PaymentId) -> Self {
        Self {
            payment_id,
            collected: false,
            capturable: Balance::ZERO,
            refundable: Balance::ZERO,
        }
    }

    /// Pulls `amount` from the payer into escrow.
    pub fn authorize(
        &mut self,
        info: &PaymentInfo,
        amount: Amount,
        operator: &Address,
        now: Timestamp,
    ) -> std::result::Result<Vec<Posting>, LedgerError> {
        check_operator(info, operator)?;
        if self.collected {
            return Err(LedgerError::AlreadyCollected);
        }
        if info.pre_approval_expiry > info.authorization_expiry
            || info.authorization_expiry > info.refund_expiry
        {
            return Err(LedgerError::InvalidExpiries);
        }
        if info.min_fee_bps > info.max_fee_bps || info.max_fee_bps > MAX_FEE_BPS {
            return Err(LedgerError::InvalidFeeBps {
                min_bps: info.min_fee_bps,
                max_bps: info.max_fee_bps,
            });
        }
        if amount > info.max_amount {
            return Err(LedgerError::ExceedsMaxAmount {
                requested: amount,
                max: info.max_amount,
            });
        }
        if now >= info.pre_approval_expiry {
            return Err(LedgerError::AfterPreApprovalExpiry(info.pre_approval_expiry));
        }

        self.collected = true;
        self.capturable = amount.into();
        Ok(vec![posting(&info.payer, info, -Balance::from(amount))])
    }

    /// Releases `amount` from escrow to the receiver, minus the fee.
    pub fn capture(
        &mut self,
        info: &PaymentInfo,
        amount: Amount,
        fee_bps: u16,
        fee_receiver: &Address,
        operator: &Address,
        now: Timestamp,
    ) -> std::result::Result<Vec<Posting>, LedgerError> {
        check_operator(info, operator)?;
        if !self.collected {
            return Err(LedgerError::NotCollected);
        }
        if now >= info.authorization_expiry {
            return Err(LedgerError::AfterAuthorizationExpiry(
                info.authorization_expiry,
            ));
        }
        if fee_bps < info.min_fee_bps || fee_bps > info.max_fee_bps {
            return Err(LedgerError::FeeBpsOutOfRange {
                fee_bps,
                min_bps: info.min_fee_bps,
                max_bps: info.max_fee_bps,
            });
        }
        if let Some(expected) = &info.fee_receiver
            && fee_bps > 0
            && expected != fee_receiver
        {
            return Err(LedgerError::InvalidFeeReceiver {
                expected: expected.clone(),
            });
        }
        let requested = Balance::from(amount);
        if requested > self.capturable {
            return Err(LedgerError::InsufficientCapturable {
                requested: amount,
                available: self.capturable,
            });
        }

        let fee = amount.fee_at(fee_bps).ok_or(LedgerError::Overflow)?;
        let net = requested.checked_sub(fee).ok_or(LedgerError::Overflow)?;
        let refundable = self
            .refundable
            .checked_add(requested)
            .ok_or(LedgerError::Overflow)?;
        let capturable = self
            .capturable
            .checked_sub(requested)
            .ok_or(LedgerError::Overflow)?;
        self.capturable = capturable;
        self.refundable = refundable;

        let mut postings = vec![posting(&info.receiver, info, net)];
        if fee.is_positive() {
            postings.push(posting(fee_receiver, info, fee));
        }
        Ok(postings)
    }

    /// Returns part of the escrowed funds to the payer.
    pub fn partial_void(
        &mut self,
        info: &PaymentInfo,
        amount: Amount,
        operator: &Address,
    ) -> std::result::Result<Vec<Posting>, LedgerError> {
        check_operator(info, operator)?;
        if !self.collected {
            return Err(LedgerError::NotCollected);
        }
        let requested = Balance::from(amount);
        if requested > self.capturable {
            return Err(LedgerError::InsufficientCapturable {
                requested: amount,
                available: self.capturable,
            });
        }
        self.capturable = self
            .capturable
            .checked_sub(requested)
            .ok_or(LedgerError::Overflow)?;
        Ok(vec![posting(&info.payer, info, requested)])
    }

    /// Returns everything still in escrow to the payer.
    pub fn void(
        &mut self,
        info: &PaymentInfo,
        operator: &Address,
    ) -> std::result::Result<Vec<Posting>, LedgerError> {
        check_operator(info, operator)?;
        self.drain_escrow(info)
    }

    /// Lets the payer take back escrowed funds once the authorization has
    /// expired.
    pub fn reclaim(
        &mut self,
        info: &PaymentInfo,
        now: Timestamp,
    ) -> std::result::Result<Vec<Posting>, LedgerError> {
        if now < info.authorization_expiry {
            return Err(LedgerError::BeforeAuthorizationExpiry(
                info.authorization_expiry,
            ));
        }
        self.drain_escrow(info)
    }

    /// Sends released funds back from the receiver to the payer.
    pub fn refund(
        &mut self,
        info: &PaymentInfo,
        amount: Amount,
        operator: &Address,
        now: Timestamp,
    ) -> std::result::Result<Vec<Posting>, LedgerError> {
        check_operator(info, operator)?;
        if now >= info.refund_expiry {
            return Err(LedgerError::AfterRefundExpiry(info.refund_expiry));
        }
        let requested = Balance::from(amount);
        if requested > self.refundable {
            return Err(LedgerError::RefundExceedsCaptured {
                requested: amount,
                available: self.refundable,
            });
        }
        self.refundable = self
            .refundable
            .checked_sub(requested)
            .ok_or(LedgerError::Overflow)?;
        Ok(vec![
            posting(&info.receiver, info, -requested),
            posting(&info.payer, info, requested),
        ])
    }

    fn drain_escrow(
        &mut self,
        info: &PaymentInfo,
    ) -> std::result::Result<Vec<Posting>, LedgerError> {
        if !self.collected {
            return Err(LedgerError::NotCollected);
        }
        if !self.capturable.is_positive() {
            return Err(LedgerError::NothingToRefund);
        }
        let amount = self.capturable;
        self.capturable = Balance::ZERO;
        Ok(vec![posting(&info.payer, info, amount)])
    }
}

fn check_operator(info: &PaymentInfo, operator: &Address) -> std::result::Result<(), LedgerError> {
    if &info.operator != operator {
        return Err(LedgerError::WrongOperator {
            expected: info.operator.clone(),
            actual: operator.clone(),
        });
    }
    Ok(())
}

fn posting(party: &Address, info: &PaymentInfo, delta: Balance) -> Posting {
    Posting {
        party: party.clone(),
        asset: info.asset.clone(),
        delta,
    }
}

/// Lifecycle state of a payment, derived from its ledger record and the
/// current time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    NonExistent,
    InEscrow,
    Released,
    Settled,
    Expired,
}

impl PaymentState {
    pub fn derive(record: Option<&PaymentRecord>, info: &PaymentInfo, now: Timestamp) -> Self {
        let Some(record) = record.filter(|r| r.collected) else {
            return Self::NonExistent;
        };
        if record.capturable.is_positive() {
            if now >= info.authorization_expiry {
                Self::Expired
            } else {
                Self::InEscrow
            }
        } else if record.refundable.is_positive() && now < info.refund_expiry {
            Self::Released
        } else {
            Self::Settled
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NonExistent => "non_existent",
            Self::InEscrow => "in_escrow",
            Self::Released => "released",
            Self::Settled => "settled",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
