//! Deterministic, content-addressed factories.
//!
//! An instance's address is the SHA-256 of its kind tag and the canonical
//! JSON of its configuration, so it can be computed before deployment.
//! Deploying the same configuration twice yields the same instance.

use super::audit::{AuditEntry, AuditEvent, AuditLog};
use crate::domain::ids::{Address, Digest, InstanceAddress};
use crate::domain::ports::ClockRef;
use crate::error::{PaymentError, Result};
use crate::policy::condition::{check_fanout, Condition, Predicate};
use crate::policy::freeze::{EscrowPeriod, FreezePolicy};
use crate::policy::recorder::{PaymentIndexRecorder, RecorderCombinator, RecorderRef};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::Debug;
use std::sync::Arc;

/// A kind of instance a [`Factory`] can deploy.
pub trait Deployable: Sized + Send + Sync + 'static {
    type Config: Serialize + Clone + Debug;

    /// Tag mixed into every address of this kind.
    const KIND: &'static str;

    /// Builds a fresh instance, resolving referenced instances in `deployments`.
    fn build(config: &Self::Config, deployments: &Deployments) -> Result<Self>;

    /// The factory of this kind inside `deployments`.
    fn factory(deployments: &Deployments) -> &Factory<Self>;
}

/// Result of a deploy call.
pub struct Deployment<T> {
    pub address: InstanceAddress,
    pub instance: Arc<T>,
    /// False when the instance already existed.
    pub created: bool,
}

impl<T> Clone for Deployment<T> {
    fn clone(&self) -> Self {
        Self {
            address: self.address,
            instance: self.instance.clone(),
            created: self.created,
        }
    }
}

pub struct Factory<T: Deployable> {
    instances: RwLock<HashMap<InstanceAddress, Arc<T>>>,
}

impl<T: Deployable> Default for Factory<T> {
    fn default() -> Self {
        Self {
            instances: RwLock::default(),
        }
    }
}

impl<T: Deployable> Factory<T> {
    pub fn compute_address(config: &T::Config) -> Result<InstanceAddress> {
        Digest::of_canonical(T::KIND, config).map(InstanceAddress)
    }

    pub fn get(&self, address: &InstanceAddress) -> Option<Arc<T>> {
        self.instances.read().get(address).cloned()
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }

    fn deploy(&self, config: &T::Config, deployments: &Deployments) -> Result<Deployment<T>> {
        let address = Self::compute_address(config)?;
        if let Some(instance) = self.get(&address) {
            return Ok(Deployment {
                address,
                instance,
                created: false,
            });
        }

        // Built without holding the lock: combinators resolve their children
        // through this same factory.
        let built = Arc::new(T::build(config, deployments)?);

        let mut instances = self.instances.write();
        if let Some(existing) = instances.get(&address) {
            return Ok(Deployment {
                address,
                instance: existing.clone(),
                created: false,
            });
        }
        instances.insert(address, built.clone());
        Ok(Deployment {
            address,
            instance: built,
            created: true,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionConfig {
    AlwaysTrue,
    IsPayer,
    IsReceiver,
    IsArbiter,
    EscrowPeriodElapsed,
    Unfrozen,
    And { conditions: Vec<InstanceAddress> },
    Or { conditions: Vec<InstanceAddress> },
    Not { condition: InstanceAddress },
    /// A predicate registered with [`Deployments::register_predicate`].
    Custom { name: String },
}

impl Deployable for Condition {
    type Config = ConditionConfig;
    const KIND: &'static str = "escrow-policy/condition/v1";

    fn build(config: &ConditionConfig, deployments: &Deployments) -> Result<Self> {
        Ok(match config {
            ConditionConfig::AlwaysTrue => Condition::AlwaysTrue,
            ConditionConfig::IsPayer => Condition::IsPayer,
            ConditionConfig::IsReceiver => Condition::IsReceiver,
            ConditionConfig::IsArbiter => Condition::IsArbiter,
            ConditionConfig::EscrowPeriodElapsed => Condition::EscrowPeriodElapsed,
            ConditionConfig::Unfrozen => Condition::Unfrozen,
            ConditionConfig::And { conditions } => {
                check_fanout(conditions.len())?;
                Condition::and(deployments.conditions_at(conditions)?)?
            }
            ConditionConfig::Or { conditions } => {
                check_fanout(conditions.len())?;
                Condition::or(deployments.conditions_at(conditions)?)?
            }
            ConditionConfig::Not { condition } => {
                Condition::not(deployments.condition_at(condition)?)
            }
            ConditionConfig::Custom { name } => Condition::Custom(
                deployments
                    .predicate(name)
                    .ok_or_else(|| PaymentError::UnknownPredicate(name.clone()))?,
            ),
        })
    }

    fn factory(deployments: &Deployments) -> &Factory<Self> {
        &deployments.conditions
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezePolicyConfig {
    pub freeze_condition: InstanceAddress,
    pub unfreeze_condition: InstanceAddress,
    #[serde(default)]
    pub freeze_duration: u64,
}

impl Deployable for FreezePolicy {
    type Config = FreezePolicyConfig;
    const KIND: &'static str = "escrow-policy/freeze-policy/v1";

    fn build(config: &FreezePolicyConfig, deployments: &Deployments) -> Result<Self> {
        Ok(FreezePolicy::new(
            deployments.condition_at(&config.freeze_condition)?,
            deployments.condition_at(&config.unfreeze_condition)?,
            config.freeze_duration,
        ))
    }

    fn factory(deployments: &Deployments) -> &Factory<Self> {
        &deployments.freeze_policies
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowPeriodConfig {
    /// The only coordinator allowed to record through this instance.
    pub coordinator: Address,
    pub escrow_period: u64,
    #[serde(default)]
    pub freeze_policy: Option<InstanceAddress>,
}

impl Deployable for EscrowPeriod {
    type Config = EscrowPeriodConfig;
    const KIND: &'static str = "escrow-policy/escrow-period/v1";

    fn build(config: &EscrowPeriodConfig, deployments: &Deployments) -> Result<Self> {
        let policy = match &config.freeze_policy {
            Some(address) => Some(
                deployments
                    .freeze_policies
                    .get(address)
                    .ok_or(PaymentError::UnknownInstance(*address))?,
            ),
            None => None,
        };
        Ok(EscrowPeriod::new(
            config.coordinator.clone(),
            config.escrow_period,
            policy,
        ))
    }

    fn factory(deployments: &Deployments) -> &Factory<Self> {
        &deployments.escrow_periods
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderCombinatorConfig {
    pub recorders: Vec<InstanceAddress>,
}

impl Deployable for RecorderCombinator {
    type Config = RecorderCombinatorConfig;
    const KIND: &'static str = "escrow-policy/recorder-combinator/v1";

    fn build(config: &RecorderCombinatorConfig, deployments: &Deployments) -> Result<Self> {
        let recorders = config
            .recorders
            .iter()
            .map(|address| {
                deployments
                    .recorder(address)
                    .ok_or(PaymentError::UnknownInstance(*address))
            })
            .collect::<Result<Vec<_>>>()?;
        RecorderCombinator::new(recorders)
    }

    fn factory(deployments: &Deployments) -> &Factory<Self> {
        &deployments.recorder_combinators
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIndexConfig {
    pub coordinator: Address,
}

impl Deployable for PaymentIndexRecorder {
    type Config = PaymentIndexConfig;
    const KIND: &'static str = "escrow-policy/payment-index/v1";

    fn build(config: &PaymentIndexConfig, _deployments: &Deployments) -> Result<Self> {
        Ok(PaymentIndexRecorder::new(config.coordinator.clone()))
    }

    fn factory(deployments: &Deployments) -> &Factory<Self> {
        &deployments.payment_indexes
    }
}

/// Registry of every deployable kind.
pub struct Deployments {
    deployer: Address,
    clock: ClockRef,
    audit: Arc<AuditLog>,
    predicates: RwLock<HashMap<String, Arc<dyn Predicate>>>,
    conditions: Factory<Condition>,
    freeze_policies: Factory<FreezePolicy>,
    escrow_periods: Factory<EscrowPeriod>,
    recorder_combinators: Factory<RecorderCombinator>,
    payment_indexes: Factory<PaymentIndexRecorder>,
}

impl Deployments {
    pub fn new(deployer: Address, clock: ClockRef, audit: Arc<AuditLog>) -> Self {
        Self {
            deployer,
            clock,
            audit,
            predicates: RwLock::default(),
            conditions: Factory::default(),
            freeze_policies: Factory::default(),
            escrow_periods: Factory::default(),
            recorder_combinators: Factory::default(),
            payment_indexes: Factory::default(),
        }
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Makes `predicate` available to `Custom` condition configs as `name`.
    /// A name is bound once and cannot be rebound.
    pub fn register_predicate(
        &self,
        name: impl Into<String>,
        predicate: Arc<dyn Predicate>,
    ) -> Result<()> {
        match self.predicates.write().entry(name.into()) {
            Entry::Occupied(entry) => Err(PaymentError::PredicateAlreadyRegistered(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(predicate);
                Ok(())
            }
        }
    }

    pub fn predicate(&self, name: &str) -> Option<Arc<dyn Predicate>> {
        self.predicates.read().get(name).cloned()
    }

    pub fn compute_address<T: Deployable>(&self, config: &T::Config) -> Result<InstanceAddress> {
        Factory::<T>::compute_address(config)
    }

    /// Deploys `config`, or returns the instance already deployed for it.
    pub fn deploy<T: Deployable>(&self, config: &T::Config) -> Result<Deployment<T>> {
        let deployment = T::factory(self).deploy(config, self)?;
        if deployment.created {
            tracing::debug!(kind = T::KIND, address = %deployment.address, "deployed instance");
            self.audit.append(
                AuditEntry::new(AuditEvent::Deployment(T::KIND), &self.deployer, self.clock.now())
                    .with_instance(deployment.address),
            );
        }
        Ok(deployment)
    }

    pub fn get<T: Deployable>(&self, address: &InstanceAddress) -> Option<Arc<T>> {
        T::factory(self).get(address)
    }

    /// Any deployed instance that can act as a recorder.
    pub fn recorder(&self, address: &InstanceAddress) -> Option<RecorderRef> {
        if let Some(escrow) = self.escrow_periods.get(address) {
            return Some(escrow as RecorderRef);
        }
        if let Some(combinator) = self.recorder_combinators.get(address) {
            return Some(combinator as RecorderRef);
        }
        self.payment_indexes
            .get(address)
            .map(|index| index as RecorderRef)
    }

    fn condition_at(&self, address: &InstanceAddress) -> Result<Condition> {
        self.conditions
            .get(address)
            .map(|condition| (*condition).clone())
            .ok_or(PaymentError::UnknownInstance(*address))
    }

    fn conditions_at(&self, addresses: &[InstanceAddress]) -> Result<Vec<Condition>> {
        addresses.iter().map(|a| self.condition_at(a)).collect()
    }
}
