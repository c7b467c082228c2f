//! Owner, pause and destruction guards
//!
//! `Active ⇄ Paused → Destroyed`. Every entry point of the ledger runs one
//! of the guards below before touching any state.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::types::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Active,
    Paused,
    Destroyed,
}

#[derive(Debug, Clone)]
pub struct AccessControl {
    owner: Identity,
    paused: bool,
    destroyed: bool,
}

impl AccessControl {
    /// The owner is fixed here and cannot be transferred.
    pub fn new(owner: Identity) -> Self {
        Self {
            owner,
            paused: false,
            destroyed: false,
        }
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn state(&self) -> LifecycleState {
        if self.destroyed {
            LifecycleState::Destroyed
        } else if self.paused {
            LifecycleState::Paused
        } else {
            LifecycleState::Active
        }
    }

    /// Guard for reads: only destruction blocks them.
    pub fn ensure_live(&self) -> LedgerResult<()> {
        if self.destroyed {
            debug!("Rejected call on destroyed ledger");
            return Err(LedgerError::Destroyed);
        }
        Ok(())
    }

    /// Guard for every state-mutating entry point.
    pub fn ensure_mutable(&self) -> LedgerResult<()> {
        self.ensure_live()?;
        if self.paused {
            debug!("Rejected mutation while paused");
            return Err(LedgerError::Paused);
        }
        Ok(())
    }

    /// Guard for owner-only operations. Does not consult the pause flag.
    pub fn ensure_owner(&self, caller: &Identity, action: &'static str) -> LedgerResult<()> {
        self.ensure_live()?;
        if caller != &self.owner {
            warn!("Caller {} attempted to {} without ownership", caller, action);
            return Err(LedgerError::unauthorized(caller, action));
        }
        Ok(())
    }

    pub fn pause(&mut self, caller: &Identity) -> LedgerResult<()> {
        self.ensure_owner(caller, "pause")?;
        if self.paused {
            return Err(LedgerError::Paused);
        }
        self.paused = true;
        Ok(())
    }

    pub fn unpause(&mut self, caller: &Identity) -> LedgerResult<()> {
        self.ensure_owner(caller, "unpause")?;
        if !self.paused {
            return Err(LedgerError::InvalidInput(
                "ledger is not paused".to_string(),
            ));
        }
        self.paused = false;
        Ok(())
    }

    /// Terminal. A second call fails with `Destroyed`.
    pub fn destroy(&mut self, caller: &Identity) -> LedgerResult<()> {
        self.ensure_owner(caller, "destroy")?;
        self.destroyed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Identity {
        Identity::new(name).unwrap()
    }

    #[test]
    fn test_owner_is_creator() {
        let access = AccessControl::new(id("owner"));
        assert_eq!(access.owner(), &id("owner"));
        assert_eq!(access.state(), LifecycleState::Active);
    }

    #[test]
    fn test_only_owner_can_pause() {
        let mut access = AccessControl::new(id("owner"));
        let err = access.pause(&id("mallory")).unwrap_err();
        assert_eq!(err.kind(), "UNAUTHORIZED");
        assert!(!access.is_paused());

        access.pause(&id("owner")).unwrap();
        assert_eq!(access.state(), LifecycleState::Paused);
        assert_eq!(access.ensure_mutable(), Err(LedgerError::Paused));
        assert!(access.ensure_live().is_ok());
    }

    #[test]
    fn test_pause_transitions_are_strict() {
        let mut access = AccessControl::new(id("owner"));
        assert!(access.unpause(&id("owner")).is_err());
        access.pause(&id("owner")).unwrap();
        assert_eq!(access.pause(&id("owner")), Err(LedgerError::Paused));
        access.unpause(&id("owner")).unwrap();
        assert!(access.ensure_mutable().is_ok());
    }

    #[test]
    fn test_destroy_is_terminal() {
        let mut access = AccessControl::new(id("owner"));
        assert!(access.destroy(&id("someone")).is_err());
        access.destroy(&id("owner")).unwrap();

        assert_eq!(access.state(), LifecycleState::Destroyed);
        assert_eq!(access.ensure_live(), Err(LedgerError::Destroyed));
        assert_eq!(access.destroy(&id("owner")), Err(LedgerError::Destroyed));
        assert_eq!(access.unpause(&id("owner")), Err(LedgerError::Destroyed));
    }
}
