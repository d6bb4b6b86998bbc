use crate::domain::ids::{Address, PaymentId, Timestamp};

/// Read-only capability handed to every condition, hook and recorder call.
///
/// Policies never look the coordinator up; everything they may consult about
/// it arrives through this handle.
pub trait PolicyContext {
    /// Time of the operation being evaluated.
    fn now(&self) -> Timestamp;
    /// Identity of the coordinator running the pipeline.
    fn coordinator(&self) -> &Address;
    /// The arbiter bound to the coordinator, if any.
    fn arbiter(&self) -> Option<&Address>;
    /// When the payment was first authorized through an escrow period.
    fn authorized_at(&self, payment_id: &PaymentId) -> Option<Timestamp>;
    /// Whether the escrow period of the payment is over. Coordinators
    /// without an escrow period report `true`.
    fn escrow_period_elapsed(&self, payment_id: &PaymentId) -> bool;
    /// Whether the payment is currently frozen.
    fn is_frozen(&self, payment_id: &PaymentId) -> bool;
}

/// Context for policies evaluated outside any coordinator: no arbiter, no
/// escrow period, nothing frozen.
#[derive(Debug, Clone)]
pub struct StandaloneContext {
    pub now: Timestamp,
    pub coordinator: Address,
    pub arbiter: Option<Address>,
}

impl StandaloneContext {
    pub fn new(coordinator: Address, now: Timestamp) -> Self {
        Self {
            now,
            coordinator,
            arbiter: None,
        }
    }

    pub fn with_arbiter(mut self, arbiter: Address) -> Self {
        self.arbiter = Some(arbiter);
        self
    }
}

impl PolicyContext for StandaloneContext {
    fn now(&self) -> Timestamp {
        self.now
    }

    fn coordinator(&self) -> &Address {
        &self.coordinator
    }

    fn arbiter(&self) -> Option<&Address> {
        self.arbiter.as_ref()
    }

    fn authorized_at(&self, _payment_id: &PaymentId) -> Option<Timestamp> {
        None
    }

    fn escrow_period_elapsed(&self, _payment_id: &PaymentId) -> bool {
        true
    }

    fn is_frozen(&self, _payment_id: &PaymentId) -> bool {
        false
    }
}
