//! Inventory ledger: the only place copy counters change.
//!
//! Loans, returns and reservation allocations stage their counter changes
//! through [`InventoryLedger::stage_checkout`] and
//! [`InventoryLedger::stage_checkin`] so the checks live in one place. The
//! standalone [`InventoryLedger::reserve_copy`] and
//! [`InventoryLedger::release_copy`] operations are for staff corrections.

use crate::environment::CirculationEnvironment;
use crate::error::{CirculationError, EntityKind};
use crate::events::CirculationEvent;
use crate::store::UnitOfWork;
use crate::types::{Title, TitleId};
use circulation_core::version::Versioned;
use serde::{Deserialize, Serialize};

/// Snapshot of a title's stock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    /// Title
    pub title_id: TitleId,
    /// Copies owned
    pub total_copies: u32,
    /// Copies on the shelf
    pub available_copies: u32,
}

impl Availability {
    /// Whether at least one copy can be lent right now.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.available_copies > 0
    }

    /// Copies currently out.
    #[must_use]
    pub const fn on_loan(&self) -> u32 {
        self.total_copies.saturating_sub(self.available_copies)
    }
}

/// Maintains per-title copy counters.
#[derive(Clone, Debug)]
pub struct InventoryLedger {
    env: CirculationEnvironment,
}

impl InventoryLedger {
    /// Creates a ledger over `env`
    #[must_use]
    pub const fn new(env: CirculationEnvironment) -> Self {
        Self { env }
    }

    /// Load a title or fail with `NotFound`.
    pub(crate) async fn load(&self, title_id: TitleId) -> Result<Versioned<Title>, CirculationError> {
        self.env
            .store
            .title(title_id)
            .await?
            .ok_or_else(|| CirculationError::not_found(EntityKind::Title, title_id))
    }

    /// Stage one copy leaving the shelf.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::CapacityExceeded`] if no copy is available.
    pub(crate) fn stage_checkout(
        unit: UnitOfWork,
        title: &Versioned<Title>,
    ) -> Result<(UnitOfWork, Title), CirculationError> {
        let next = title.take_copy()?;
        Ok((unit.update_title(next.clone(), title.version), next))
    }

    /// Stage one copy coming back to the shelf.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::Validation`] if every copy is already shelved.
    pub(crate) fn stage_checkin(
        unit: UnitOfWork,
        title: &Versioned<Title>,
    ) -> Result<(UnitOfWork, Title), CirculationError> {
        let next = title.return_copy().inspect_err(|error| {
            tracing::error!(title_id = %title.id, %error, "Copy counters out of balance");
        })?;
        Ok((unit.update_title(next.clone(), title.version), next))
    }

    /// Take one copy off the shelf.
    ///
    /// # Errors
    ///
    /// - [`CirculationError::NotFound`] for an unknown title
    /// - [`CirculationError::CapacityExceeded`] if no copy is available
    pub async fn reserve_copy(&self, title_id: TitleId) -> Result<Title, CirculationError> {
        let title = self
            .env
            .atomically("reserve_copy", || self.try_adjust(title_id, Self::stage_checkout))
            .await?;

        tracing::info!(
            title_id = %title.id,
            available = title.available_copies,
            "Copy reserved"
        );
        self.env.publish([stock_adjusted(&title)]).await;
        Ok(title)
    }

    /// Put one copy back on the shelf.
    ///
    /// # Errors
    ///
    /// - [`CirculationError::NotFound`] for an unknown title
    /// - [`CirculationError::Validation`] if every copy is already shelved
    pub async fn release_copy(&self, title_id: TitleId) -> Result<Title, CirculationError> {
        let title = self
            .env
            .atomically("release_copy", || self.try_adjust(title_id, Self::stage_checkin))
            .await?;

        tracing::info!(
            title_id = %title.id,
            available = title.available_copies,
            "Copy released"
        );
        self.env.publish([stock_adjusted(&title)]).await;
        Ok(title)
    }

    async fn try_adjust(
        &self,
        title_id: TitleId,
        stage: fn(UnitOfWork, &Versioned<Title>) -> Result<(UnitOfWork, Title), CirculationError>,
    ) -> Result<Title, CirculationError> {
        let current = self.load(title_id).await?;
        let (unit, next) = stage(UnitOfWork::new(), &current)?;
        self.env.store.commit(unit).await?;
        Ok(next)
    }

    /// Current stock of a title.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::NotFound`] for an unknown title.
    pub async fn availability(&self, title_id: TitleId) -> Result<Availability, CirculationError> {
        let title = self.load(title_id).await?;
        Ok(Availability {
            title_id,
            total_copies: title.total_copies,
            available_copies: title.available_copies,
        })
    }
}

fn stock_adjusted(title: &Title) -> CirculationEvent {
    CirculationEvent::StockAdjusted {
        title_id: title.id,
        available_copies: title.available_copies,
        total_copies: title.total_copies,
    }
}
