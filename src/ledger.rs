//! Bounty ledger
//!
//! Owns every bounty, the escrowed balances and the credits paid out to
//! fulfillers. Mutations take `&mut self`: the ledger is single-writer and
//! hosts serialize calls (the HTTP server does it with a mutex).
//!
//! Every mutating operation validates all of its preconditions first and
//! only then writes, so a rejected call leaves no trace.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::access::{AccessControl, LifecycleState};
use crate::error::{LedgerError, LedgerResult};
use crate::events::{EventLog, EventSink, LedgerEvent};
use crate::oracle::{OracleService, Resolution, ResolutionDispatcher};
use crate::types::{Amount, Bounty, BountyId, BountyView, ContentRef, Identity, OracleRecord};

/// What happens to a bounty that can no longer cover its payout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowBalancePolicy {
    /// Claims fail with `InsufficientBalance`; the bounty stays open.
    #[default]
    Reject,
    /// Same rejection, and a payout that leaves the balance below the
    /// fulfillment amount closes the bounty right away.
    CloseWhenDepleted,
}

pub struct LedgerBuilder {
    owner: Identity,
    dispatcher: Option<Box<dyn ResolutionDispatcher>>,
    events: Option<Arc<dyn EventSink>>,
    low_balance_policy: LowBalancePolicy,
}

impl LedgerBuilder {
    pub fn dispatcher(mut self, dispatcher: Box<dyn ResolutionDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn low_balance_policy(mut self, policy: LowBalancePolicy) -> Self {
        self.low_balance_policy = policy;
        self
    }

    pub fn build(self) -> BountyLedger {
        let oracle = match self.dispatcher {
            Some(dispatcher) => OracleService::new(dispatcher),
            None => OracleService::default(),
        };
        info!("Bounty ledger constructed, owner {}", self.owner);
        BountyLedger {
            access: AccessControl::new(self.owner),
            oracle,
            bounties: Vec::new(),
            credits: HashMap::new(),
            policy: self.low_balance_policy,
            events: self.events.unwrap_or_else(|| Arc::new(EventLog::new())),
        }
    }
}

pub struct BountyLedger {
    access: AccessControl,
    oracle: OracleService,
    /// Arena indexed by `BountyId`; never shrinks.
    bounties: Vec<Bounty>,
    credits: HashMap<Identity, Amount>,
    policy: LowBalancePolicy,
    events: Arc<dyn EventSink>,
}

impl BountyLedger {
    /// Ledger with the default dispatcher, an in-memory event log and the
    /// `Reject` low-balance policy.
    pub fn new(owner: Identity) -> Self {
        Self::builder(owner).build()
    }

    pub fn builder(owner: Identity) -> LedgerBuilder {
        LedgerBuilder {
            owner,
            dispatcher: None,
            events: None,
            low_balance_policy: LowBalancePolicy::default(),
        }
    }

    fn emit(&self, event: LedgerEvent) {
        self.events.emit(&event);
    }

    fn index(&self, bounty_id: BountyId) -> LedgerResult<usize> {
        usize::try_from(bounty_id.0)
            .ok()
            .filter(|&idx| idx < self.bounties.len())
            .ok_or(LedgerError::BountyNotFound(bounty_id))
    }

    fn bounty(&self, bounty_id: BountyId) -> LedgerResult<&Bounty> {
        let idx = self.index(bounty_id)?;
        Ok(&self.bounties[idx])
    }

    fn ensure_open(bounty: &Bounty, bounty_id: BountyId) -> LedgerResult<()> {
        if !bounty.open {
            debug!("Bounty {} is closed", bounty_id);
            return Err(LedgerError::Closed(bounty_id));
        }
        Ok(())
    }

    fn ensure_issuer(bounty: &Bounty, caller: &Identity, action: &'static str) -> LedgerResult<()> {
        if &bounty.issuer != caller {
            warn!("Caller {} attempted to {} a bounty issued by {}", caller, action, bounty.issuer);
            return Err(LedgerError::unauthorized(caller, action));
        }
        Ok(())
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    pub fn owner(&self) -> LedgerResult<&Identity> {
        self.access.ensure_live()?;
        Ok(self.access.owner())
    }

    pub fn is_paused(&self) -> LedgerResult<bool> {
        self.access.ensure_live()?;
        Ok(self.access.is_paused())
    }

    /// Always answers, including after destruction.
    pub fn lifecycle(&self) -> LifecycleState {
        self.access.state()
    }

    pub fn low_balance_policy(&self) -> LowBalancePolicy {
        self.policy
    }

    pub fn pause(&mut self, caller: &Identity) -> LedgerResult<()> {
        self.access.pause(caller)?;
        info!("Ledger paused by {}", caller);
        self.emit(LedgerEvent::Paused);
        Ok(())
    }

    pub fn unpause(&mut self, caller: &Identity) -> LedgerResult<()> {
        self.access.unpause(caller)?;
        info!("Ledger unpaused by {}", caller);
        self.emit(LedgerEvent::Unpaused);
        Ok(())
    }

    /// Sweeps every remaining bounty balance to the owner and shuts the
    /// ledger down for good. Returns the swept amount.
    ///
    /// Balances are summed in `u128` so no combination of bounties can
    /// block destruction; the owner's credit saturates at `Amount::MAX`.
    pub fn destroy(&mut self, caller: &Identity) -> LedgerResult<Amount> {
        self.access.ensure_owner(caller, "destroy")?;

        let total: u128 = self.bounties.iter().map(|b| u128::from(b.balance)).sum();
        let swept = Amount::try_from(total).unwrap_or(Amount::MAX);
        if total > u128::from(Amount::MAX) {
            warn!("Swept total {} exceeds the amount range, owner credit capped", total);
        }
        let owner = self.access.owner().clone();
        let owner_credit = self
            .credits
            .get(&owner)
            .copied()
            .unwrap_or(0)
            .saturating_add(swept);

        self.access.destroy(caller)?;
        for bounty in &mut self.bounties {
            bounty.balance = 0;
            bounty.open = false;
        }
        self.credits.insert(owner.clone(), owner_credit);

        info!("Ledger destroyed by {}, {} swept to owner", caller, total);
        self.emit(LedgerEvent::Destroyed { owner, swept });
        Ok(swept)
    }

    // ========================================================================
    // ORACLE
    // ========================================================================

    /// Creates a pending record and dispatches it, or reports the existing
    /// record without dispatching again.
    pub fn request_resolution(&mut self, reference: &ContentRef) -> LedgerResult<Resolution> {
        self.access.ensure_mutable()?;
        let resolution = self.oracle.request_resolution(reference);
        if resolution == Resolution::Dispatched {
            self.emit(LedgerEvent::ResolutionRequested {
                reference: reference.clone(),
            });
        }
        Ok(resolution)
    }

    /// Entry point for the external verification mechanism.
    ///
    /// Accepted while paused: it completes a request that was already
    /// accepted and the oracle does not retry.
    pub fn resolution_callback(&mut self, reference: &ContentRef, text: String) -> LedgerResult<bool> {
        self.access.ensure_live()?;
        let stored = self.oracle.resolution_callback(reference, text.clone())?;
        if stored {
            self.emit(LedgerEvent::ResolutionCompleted {
                reference: reference.clone(),
                text,
            });
        }
        Ok(stored)
    }

    /// Cheap polling read: `None` until the answer is in.
    pub fn resolved_text(&self, reference: &ContentRef) -> LedgerResult<Option<&str>> {
        self.access.ensure_live()?;
        Ok(self.oracle.resolved_text(reference))
    }

    pub fn oracle_record(&self, reference: &ContentRef) -> LedgerResult<Option<&OracleRecord>> {
        self.access.ensure_live()?;
        Ok(self.oracle.record(reference))
    }

    pub fn pending_references(&self) -> LedgerResult<Vec<ContentRef>> {
        self.access.ensure_live()?;
        Ok(self.oracle.pending_references())
    }

    // ========================================================================
    // BOUNTIES
    // ========================================================================

    /// Opens a bounty against the content at `reference`.
    ///
    /// The id is returned right away even if the target text is still
    /// pending; the required text is then bound lazily at fulfillment.
    /// The target reference itself can never fulfill its own bounty.
    pub fn create_bounty(
        &mut self,
        caller: &Identity,
        fulfillment_amount: Amount,
        reference: &ContentRef,
        initial_contribution: Amount,
    ) -> LedgerResult<BountyId> {
        self.access.ensure_mutable()?;
        if fulfillment_amount == 0 {
            return Err(LedgerError::InvalidInput(
                "fulfillment amount must be greater than zero".to_string(),
            ));
        }

        let bounty_id = BountyId(self.bounties.len() as u64);
        if self.oracle.request_resolution(reference) == Resolution::Dispatched {
            self.emit(LedgerEvent::ResolutionRequested {
                reference: reference.clone(),
            });
        }
        let required_text = self.oracle.resolved_text(reference).map(str::to_string);

        self.bounties.push(Bounty::new(
            caller.clone(),
            fulfillment_amount,
            reference.clone(),
            required_text,
            initial_contribution,
        ));

        info!(
            "Bounty {} created by {} against {} (payout {}, balance {})",
            bounty_id, caller, reference, fulfillment_amount, initial_contribution
        );
        self.emit(LedgerEvent::BountyCreated {
            bounty_id,
            issuer: caller.clone(),
        });
        Ok(bounty_id)
    }

    /// Anyone may add funds to an open bounty. Never consults the oracle.
    pub fn contribute(&mut self, caller: &Identity, bounty_id: BountyId, amount: Amount) -> LedgerResult<Amount> {
        self.access.ensure_live()?;
        let idx = self.index(bounty_id)?;
        Self::ensure_open(&self.bounties[idx], bounty_id)?;
        self.access.ensure_mutable()?;
        if amount == 0 {
            return Err(LedgerError::InvalidInput(
                "contribution must be greater than zero".to_string(),
            ));
        }
        let new_balance = self.bounties[idx]
            .balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::InvalidInput("bounty balance overflows".to_string()))?;

        self.bounties[idx].balance = new_balance;

        info!(
            "{} contributed {} to bounty {} (balance {})",
            caller, amount, bounty_id, new_balance
        );
        self.emit(LedgerEvent::ContributionAdded {
            bounty_id,
            contributor: caller.clone(),
            amount,
        });
        Ok(new_balance)
    }

    /// Runs every fulfillment check in order and returns the payout and
    /// the text the claim matched. Pure.
    fn evaluate_fulfillment(
        &self,
        bounty_id: BountyId,
        reference: &ContentRef,
    ) -> LedgerResult<(Amount, String)> {
        self.access.ensure_live()?;
        let bounty = self.bounty(bounty_id)?;
        Self::ensure_open(bounty, bounty_id)?;
        self.access.ensure_mutable()?;

        if bounty.has_used(reference) {
            debug!("Reference {} replayed against bounty {}", reference, bounty_id);
            return Err(LedgerError::AlreadyUsed {
                bounty_id,
                reference: reference.clone(),
            });
        }

        let submitted = self
            .oracle
            .resolved_text(reference)
            .ok_or_else(|| LedgerError::NotResolved(reference.clone()))?;

        let required = match &bounty.required_text {
            Some(text) => text.as_str(),
            None => self
                .oracle
                .resolved_text(&bounty.target)
                .ok_or_else(|| LedgerError::NotResolved(bounty.target.clone()))?,
        };

        // Byte-for-byte; no case folding or whitespace normalization.
        if submitted != required {
            return Err(LedgerError::Mismatch {
                bounty_id,
                reference: reference.clone(),
            });
        }

        if bounty.balance < bounty.fulfillment_amount {
            return Err(LedgerError::InsufficientBalance {
                bounty_id,
                balance: bounty.balance,
                required: bounty.fulfillment_amount,
            });
        }

        Ok((bounty.fulfillment_amount, required.to_string()))
    }

    /// Dry run of `fulfill_bounty`: same checks, no mutation. Returns the
    /// amount a claim would pay.
    pub fn check_fulfillment(&self, bounty_id: BountyId, reference: &ContentRef) -> LedgerResult<Amount> {
        self.evaluate_fulfillment(bounty_id, reference)
            .map(|(payout, _)| payout)
    }

    /// Pays `caller` the bounty's fulfillment amount for a new reference
    /// whose resolved text matches the bounty's required text.
    pub fn fulfill_bounty(
        &mut self,
        caller: &Identity,
        bounty_id: BountyId,
        reference: &ContentRef,
    ) -> LedgerResult<Amount> {
        let (payout, matched_text) = self.evaluate_fulfillment(bounty_id, reference)?;
        let credit = self
            .credits
            .get(caller)
            .copied()
            .unwrap_or(0)
            .checked_add(payout)
            .ok_or_else(|| LedgerError::InvalidInput("payee credit overflows".to_string()))?;

        let idx = self.index(bounty_id)?;
        let bounty = &mut self.bounties[idx];
        bounty.used_references.insert(reference.clone());
        bounty.balance -= payout;
        bounty.fulfillments += 1;
        bounty.required_text.get_or_insert(matched_text);
        let remaining = bounty.balance;
        let depleted = self.policy == LowBalancePolicy::CloseWhenDepleted
            && bounty.balance < bounty.fulfillment_amount;
        if depleted {
            bounty.open = false;
        }
        self.credits.insert(caller.clone(), credit);

        info!(
            "Bounty {} fulfilled by {} with {}: paid {}, balance {}",
            bounty_id, caller, reference, payout, remaining
        );
        self.emit(LedgerEvent::BountyFulfilled {
            bounty_id,
            reference: reference.clone(),
            fulfiller: caller.clone(),
            amount: payout,
        });
        if depleted {
            info!("Bounty {} closed after depletion", bounty_id);
            self.emit(LedgerEvent::BountyClosed { bounty_id });
        }
        Ok(payout)
    }

    /// Issuer-only. Closing is terminal; any balance stays escrowed.
    pub fn close_bounty(&mut self, caller: &Identity, bounty_id: BountyId) -> LedgerResult<()> {
        self.access.ensure_live()?;
        let idx = self.index(bounty_id)?;
        Self::ensure_issuer(&self.bounties[idx], caller, "close")?;
        self.access.ensure_mutable()?;
        Self::ensure_open(&self.bounties[idx], bounty_id)?;

        self.bounties[idx].open = false;

        info!("Bounty {} closed by {}", bounty_id, caller);
        self.emit(LedgerEvent::BountyClosed { bounty_id });
        Ok(())
    }

    /// Issuer-only, open bounties only.
    pub fn change_payout(
        &mut self,
        caller: &Identity,
        bounty_id: BountyId,
        new_amount: Amount,
    ) -> LedgerResult<()> {
        self.access.ensure_live()?;
        let idx = self.index(bounty_id)?;
        Self::ensure_issuer(&self.bounties[idx], caller, "change the payout of")?;
        self.access.ensure_mutable()?;
        Self::ensure_open(&self.bounties[idx], bounty_id)?;
        if new_amount == 0 {
            return Err(LedgerError::InvalidInput(
                "fulfillment amount must be greater than zero".to_string(),
            ));
        }

        self.bounties[idx].fulfillment_amount = new_amount;

        info!("Bounty {} payout changed to {} by {}", bounty_id, new_amount, caller);
        self.emit(LedgerEvent::PayoutChanged {
            bounty_id,
            new_amount,
        });
        Ok(())
    }

    pub fn get_bounty(&self, bounty_id: BountyId) -> LedgerResult<BountyView> {
        self.access.ensure_live()?;
        let bounty = self.bounty(bounty_id)?;
        Ok(self.view_of(bounty, bounty_id))
    }

    pub fn num_bounties(&self) -> LedgerResult<u64> {
        self.access.ensure_live()?;
        Ok(self.bounties.len() as u64)
    }

    /// All bounties in id order.
    pub fn bounties(&self) -> LedgerResult<Vec<BountyView>> {
        self.access.ensure_live()?;
        Ok(self
            .bounties
            .iter()
            .enumerate()
            .map(|(idx, bounty)| self.view_of(bounty, BountyId(idx as u64)))
            .collect())
    }

    /// Total paid out to `identity` so far.
    pub fn credits_of(&self, identity: &Identity) -> LedgerResult<Amount> {
        self.access.ensure_live()?;
        Ok(self.credits.get(identity).copied().unwrap_or(0))
    }

    fn view_of(&self, bounty: &Bounty, bounty_id: BountyId) -> BountyView {
        let mut view = bounty.view(bounty_id);
        if view.required_text.is_none() {
            view.required_text = self.oracle.resolved_text(&bounty.target).map(str::to_string);
        }
        view
    }
}
