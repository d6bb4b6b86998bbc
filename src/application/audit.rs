use crate::domain::action::Operation;
use crate::domain::amount::Balance;
use crate::domain::ids::{Address, InstanceAddress, PaymentId, Timestamp};
use crate::error::Result;
use parking_lot::RwLock;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Transition(Operation),
    Freeze,
    Unfreeze,
    /// A factory created a new instance of the named kind.
    Deployment(&'static str),
}

/// One reconciliation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    /// Position in the log, starting at 1. Assigned on append.
    pub sequence: u64,
    pub event: AuditEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<PaymentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstanceAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Balance>,
    pub actor: Address,
    pub timestamp: Timestamp,
}

impl AuditEntry {
    pub fn new(event: AuditEvent, actor: &Address, timestamp: Timestamp) -> Self {
        Self {
            sequence: 0,
            event,
            payment_id: None,
            instance: None,
            amount: None,
            actor: actor.clone(),
            timestamp,
        }
    }

    pub fn with_payment(mut self, payment_id: PaymentId) -> Self {
        self.payment_id = Some(payment_id);
        self
    }

    pub fn with_instance(mut self, instance: InstanceAddress) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn with_amount(mut self, amount: Balance) -> Self {
        self.amount = Some(amount);
        self
    }
}

/// Append-only log of every committed state change.
///
/// Each append is also emitted as a `tracing` event on the
/// `escrow_policy::audit` target.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, mut entry: AuditEntry) -> AuditEntry {
        let mut entries = self.entries.write();
        entry.sequence = entries.len() as u64 + 1;

        tracing::info!(
            target: "escrow_policy::audit",
            sequence = entry.sequence,
            event = ?entry.event,
            payment_id = entry.payment_id.map(|id| id.to_string()),
            instance = entry.instance.map(|a| a.to_string()),
            amount = entry.amount.map(|a| a.to_string()),
            actor = %entry.actor,
            timestamp = entry.timestamp.as_secs(),
            "audit"
        );

        entries.push(entry.clone());
        entry
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().clone()
    }

    pub fn entries_for(&self, payment_id: &PaymentId) -> Vec<AuditEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.payment_id.as_ref() == Some(payment_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Writes the log as JSON lines.
    pub fn write_json_lines<W: Write>(&self, mut writer: W) -> Result<()> {
        for entry in self.entries.read().iter() {
            serde_json::to_writer(&mut writer, entry)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}
