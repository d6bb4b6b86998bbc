//! Recorder pipeline: side effects written once a transition's ledger
//! operation succeeded.

use super::hook::{HookError, Invocation};
use crate::application::journal::Journal;
use crate::domain::ids::{Address, PaymentId};
use crate::error::{PaymentError, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Maximum number of recorders a [`RecorderCombinator`] runs.
pub const MAX_RECORDERS: usize = 10;

pub trait Recorder: Send + Sync {
    /// Writes the side effect and registers its inverse in `journal`.
    fn record(&self, invocation: &Invocation<'_>, journal: &mut Journal) -> std::result::Result<(), HookError>;
}

pub type RecorderRef = Arc<dyn Recorder>;

/// Runs several recorders in order as one recorder.
///
/// Either every recorder's writes are kept or none are: the first failure
/// reverts what the earlier recorders wrote and aborts. No retries.
pub struct RecorderCombinator {
    recorders: Vec<RecorderRef>,
}

impl RecorderCombinator {
    pub fn new(recorders: Vec<RecorderRef>) -> Result<Self> {
        if recorders.is_empty() {
            return Err(PaymentError::NoRecorders);
        }
        if recorders.len() > MAX_RECORDERS {
            return Err(PaymentError::TooManyRecorders {
                count: recorders.len(),
                max: MAX_RECORDERS,
            });
        }
        Ok(Self { recorders })
    }

    pub fn len(&self) -> usize {
        self.recorders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recorders.is_empty()
    }
}

impl Recorder for RecorderCombinator {
    fn record(&self, invocation: &Invocation<'_>, journal: &mut Journal) -> std::result::Result<(), HookError> {
        let mut nested = Journal::new();
        for recorder in &self.recorders {
            if let Err(e) = recorder.record(invocation, &mut nested) {
                nested.rollback();
                return Err(e);
            }
        }
        journal.absorb(nested);
        Ok(())
    }
}

/// A page of payment identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub items: Vec<PaymentId>,
    pub total: usize,
}

type Index = Arc<RwLock<HashMap<Address, Vec<PaymentId>>>>;

/// Indexes payments by payer and receiver the first time it sees them.
///
/// Off-chain tooling (evidence and refund-request front ends) lists a
/// party's payments through [`PaymentIndexRecorder::payments_of_payer`] and
/// [`PaymentIndexRecorder::payments_of_receiver`].
#[derive(Clone)]
pub struct PaymentIndexRecorder {
    coordinator: Address,
    by_payer: Index,
    by_receiver: Index,
}

impl PaymentIndexRecorder {
    pub fn new(coordinator: Address) -> Self {
        Self {
            coordinator,
            by_payer: Arc::default(),
            by_receiver: Arc::default(),
        }
    }

    pub fn payments_of_payer(&self, payer: &Address, offset: usize, limit: usize) -> Page {
        page(&self.by_payer, payer, offset, limit)
    }

    pub fn payments_of_receiver(&self, receiver: &Address, offset: usize, limit: usize) -> Page {
        page(&self.by_receiver, receiver, offset, limit)
    }
}

fn page(index: &Index, party: &Address, offset: usize, limit: usize) -> Page {
    let index = index.read();
    let ids = index.get(party).map(Vec::as_slice).unwrap_or_default();
    Page {
        items: ids.iter().skip(offset).take(limit).copied().collect(),
        total: ids.len(),
    }
}

fn insert_once(index: &Index, party: &Address, id: PaymentId, journal: &mut Journal) {
    let mut map = index.write();
    let ids = map.entry(party.clone()).or_default();
    if ids.contains(&id) {
        return;
    }
    ids.push(id);

    let index = index.clone();
    let party = party.clone();
    journal.on_rollback(move || {
        if let Some(ids) = index.write().get_mut(&party) {
            ids.retain(|known| known != &id);
        }
    });
}

impl Recorder for PaymentIndexRecorder {
    fn record(&self, invocation: &Invocation<'_>, journal: &mut Journal) -> std::result::Result<(), HookError> {
        invocation.ensure_invoker(&self.coordinator)?;
        let subject = &invocation.subject;
        insert_once(&self.by_payer, &subject.payment.payer, *subject.payment_id, journal);
        insert_once(&self.by_receiver, &subject.payment.receiver, *subject.payment_id, journal);
        Ok(())
    }
}
