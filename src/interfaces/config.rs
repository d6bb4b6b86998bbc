//! JSON scenario configuration.
//!
//! A scenario describes one coordinator (identity, arbiter, fees, escrow
//! period and freeze policy, slot policies) and a set of named payments. Every
//! condition, freeze policy, escrow period and recorder it mentions is
//! deployed through the [`Deployments`] factories.

use crate::application::audit::AuditLog;
use crate::application::coordinator::{ActionPolicy, EscrowCoordinator};
use crate::application::factory::{
    ConditionConfig, Deployment, Deployments, EscrowPeriodConfig, FreezePolicyConfig,
    PaymentIndexConfig, RecorderCombinatorConfig,
};
use crate::domain::action::ActionSlot;
use crate::domain::ids::{Address, InstanceAddress};
use crate::domain::payment::PaymentInfo;
use crate::domain::ports::{ClockRef, FreezeStoreBox, LedgerStoreBox};
use crate::error::Result;
use crate::policy::condition::Condition;
use crate::policy::fee::{FeeBounds, FlatFee};
use crate::policy::freeze::{EscrowPeriod, FreezePolicy};
use crate::policy::hook::{ConditionGuard, NotificationLog};
use crate::policy::recorder::{PaymentIndexRecorder, RecorderCombinator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

/// A condition tree as written in configuration, e.g.
/// `{"or": ["payer", {"and": ["receiver", "unfrozen"]}]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionSpec {
    AlwaysTrue,
    Payer,
    Receiver,
    Arbiter,
    EscrowPeriodElapsed,
    Unfrozen,
    And(Vec<ConditionSpec>),
    Or(Vec<ConditionSpec>),
    Not(Box<ConditionSpec>),
    /// Name of a predicate registered on the deployments.
    Custom(String),
}

impl ConditionSpec {
    /// Deploys the tree bottom-up and returns its root.
    pub fn deploy(&self, deployments: &Deployments) -> Result<Deployment<Condition>> {
        let config = match self {
            Self::AlwaysTrue => ConditionConfig::AlwaysTrue,
            Self::Payer => ConditionConfig::IsPayer,
            Self::Receiver => ConditionConfig::IsReceiver,
            Self::Arbiter => ConditionConfig::IsArbiter,
            Self::EscrowPeriodElapsed => ConditionConfig::EscrowPeriodElapsed,
            Self::Unfrozen => ConditionConfig::Unfrozen,
            Self::And(children) => ConditionConfig::And {
                conditions: deploy_all(children, deployments)?,
            },
            Self::Or(children) => ConditionConfig::Or {
                conditions: deploy_all(children, deployments)?,
            },
            Self::Not(child) => ConditionConfig::Not {
                condition: child.deploy(deployments)?.address,
            },
            Self::Custom(name) => ConditionConfig::Custom { name: name.clone() },
        };
        deployments.deploy::<Condition>(&config)
    }
}

fn deploy_all(specs: &[ConditionSpec], deployments: &Deployments) -> Result<Vec<InstanceAddress>> {
    specs
        .iter()
        .map(|spec| spec.deploy(deployments).map(|d| d.address))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    pub condition: ConditionSpec,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderSpec {
    PaymentIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub condition: ConditionSpec,
    /// Before-hook vetoing the transition unless its condition holds.
    #[serde(default)]
    pub guard: Option<GuardConfig>,
    /// Attach the scenario's notification log as after-hook.
    #[serde(default)]
    pub notify: bool,
    #[serde(default)]
    pub recorders: Vec<RecorderSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotsConfig {
    pub authorize: SlotConfig,
    pub release: SlotConfig,
    pub refund_in_escrow: SlotConfig,
    pub refund_post_escrow: SlotConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    #[serde(default)]
    pub min_bps: u16,
    #[serde(default)]
    pub max_bps: u16,
    /// Fee charged on every release.
    #[serde(default)]
    pub flat_bps: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeConfig {
    pub freeze: ConditionSpec,
    pub unfreeze: ConditionSpec,
    #[serde(default)]
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowConfig {
    pub period: u64,
    #[serde(default)]
    pub freeze: Option<FreezeConfig>,
    /// Who may release during the escrow period. Defaults to the payer.
    #[serde(default)]
    pub release_bypass: Option<ConditionSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub coordinator: Address,
    #[serde(default)]
    pub arbiter: Option<Address>,
    #[serde(default)]
    pub fee: FeeConfig,
    #[serde(default)]
    pub fee_receiver: Option<Address>,
    #[serde(default)]
    pub escrow: Option<EscrowConfig>,
    pub slots: SlotsConfig,
    #[serde(default)]
    pub payments: BTreeMap<String, PaymentInfo>,
}

/// A configured coordinator and the payments it operates.
pub struct Scenario {
    pub coordinator: EscrowCoordinator,
    pub deployments: Deployments,
    pub payments: BTreeMap<String, PaymentInfo>,
    pub notifications: NotificationLog,
    pub payment_index: Option<Arc<PaymentIndexRecorder>>,
}

impl ScenarioConfig {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Deploys every component, assembles the coordinator and reloads the
    /// escrow-period records persisted in `freezes`.
    pub async fn build(
        self,
        ledger: LedgerStoreBox,
        freezes: FreezeStoreBox,
        clock: ClockRef,
    ) -> Result<Scenario> {
        let audit = Arc::new(AuditLog::new());
        let deployments = Deployments::new(self.coordinator.clone(), clock.clone(), audit.clone());
        let notifications = NotificationLog::new(self.coordinator.clone());

        let mut builder = EscrowCoordinator::builder(self.coordinator.clone(), ledger, clock)
            .fee_bounds(FeeBounds::new(self.fee.min_bps, self.fee.max_bps)?)
            .fee_calculator(Arc::new(FlatFee(self.fee.flat_bps)))
            .audit(audit);
        if let Some(arbiter) = &self.arbiter {
            builder = builder.arbiter(arbiter.clone());
        }
        if let Some(receiver) = &self.fee_receiver {
            builder = builder.fee_receiver(receiver.clone());
        }
        if let Some(escrow) = &self.escrow {
            builder = builder
                .escrow_period(self.deploy_escrow(escrow, &deployments)?)
                .freeze_store(freezes);
            if let Some(bypass) = &escrow.release_bypass {
                builder = builder.release_bypass((*bypass.deploy(&deployments)?.instance).clone());
            }
        }

        let mut payment_index = None;
        let slots = [
            (ActionSlot::Authorize, &self.slots.authorize),
            (ActionSlot::Release, &self.slots.release),
            (ActionSlot::RefundInEscrow, &self.slots.refund_in_escrow),
            (ActionSlot::RefundPostEscrow, &self.slots.refund_post_escrow),
        ];
        for (slot, config) in slots {
            let policy = self.slot_policy(config, &deployments, &notifications, &mut payment_index)?;
            builder = builder.slot(slot, policy);
        }

        let coordinator = builder.build()?;
        coordinator.restore_freezes().await?;
        Ok(Scenario {
            coordinator,
            deployments,
            payments: self.payments,
            notifications,
            payment_index,
        })
    }

    fn deploy_escrow(&self, escrow: &EscrowConfig, deployments: &Deployments) -> Result<Arc<EscrowPeriod>> {
        let freeze_policy = match &escrow.freeze {
            Some(freeze) => {
                let config = FreezePolicyConfig {
                    freeze_condition: freeze.freeze.deploy(deployments)?.address,
                    unfreeze_condition: freeze.unfreeze.deploy(deployments)?.address,
                    freeze_duration: freeze.duration,
                };
                Some(deployments.deploy::<FreezePolicy>(&config)?.address)
            }
            None => None,
        };
        let deployment = deployments.deploy::<EscrowPeriod>(&EscrowPeriodConfig {
            coordinator: self.coordinator.clone(),
            escrow_period: escrow.period,
            freeze_policy,
        })?;
        Ok(deployment.instance)
    }

    fn slot_policy(
        &self,
        config: &SlotConfig,
        deployments: &Deployments,
        notifications: &NotificationLog,
        payment_index: &mut Option<Arc<PaymentIndexRecorder>>,
    ) -> Result<ActionPolicy> {
        let condition = (*config.condition.deploy(deployments)?.instance).clone();
        let mut policy = ActionPolicy::gate(condition);

        if let Some(guard) = &config.guard {
            let condition = (*guard.condition.deploy(deployments)?.instance).clone();
            policy = policy.with_before(Arc::new(ConditionGuard::new(
                self.coordinator.clone(),
                condition,
                guard.reason.clone(),
            )));
        }
        if config.notify {
            policy = policy.with_after(Arc::new(notifications.clone()));
        }
        if !config.recorders.is_empty() {
            let mut recorders = Vec::with_capacity(config.recorders.len());
            for spec in &config.recorders {
                match spec {
                    RecorderSpec::PaymentIndex => {
                        let index = deployments.deploy::<PaymentIndexRecorder>(&PaymentIndexConfig {
                            coordinator: self.coordinator.clone(),
                        })?;
                        *payment_index = Some(index.instance);
                        recorders.push(index.address);
                    }
                }
            }
            let combinator = deployments
                .deploy::<RecorderCombinator>(&RecorderCombinatorConfig { recorders })?;
            policy = policy.with_recorder(combinator.instance);
        }
        Ok(policy)
    }
}
