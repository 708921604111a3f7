//! Reservation queue: per-title FIFO waitlists and copy allocation.
//!
//! Placing a reservation never holds a copy. Copies are only taken off the shelf
//! when [`ReservationQueue::allocate_next`] turns the first eligible reservation
//! into a loan, so cancelling a reservation has no effect on the counters.

use crate::environment::CirculationEnvironment;
use crate::error::{CirculationError, EntityKind};
use crate::events::CirculationEvent;
use crate::inventory::InventoryLedger;
use crate::metrics;
use crate::plans::PlanResolver;
use crate::store::{RecordFilter, ReservationFilter, UnitOfWork};
use crate::types::{
    BorrowRecord, MemberId, Reservation, ReservationId, ReservationStatus, TitleId,
};
use circulation_core::version::Versioned;
use serde::{Deserialize, Serialize};

/// A copy handed to a waiting member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// The fulfilled reservation
    pub reservation: Reservation,
    /// The loan opened for it
    pub record: BorrowRecord,
}

/// Manages reservations and hands returned copies to waiting members.
#[derive(Clone, Debug)]
pub struct ReservationQueue {
    env: CirculationEnvironment,
    ledger: InventoryLedger,
    plans: PlanResolver,
}

impl ReservationQueue {
    /// Creates a reservation queue over `env`
    #[must_use]
    pub fn new(env: CirculationEnvironment) -> Self {
        Self {
            ledger: InventoryLedger::new(env.clone()),
            plans: PlanResolver::new(env.clone()),
            env,
        }
    }

    /// Join the waitlist for a title.
    ///
    /// Reserving a title that has copies on the shelf is allowed.
    ///
    /// # Errors
    ///
    /// - [`CirculationError::NotFound`] for an unknown member or title
    /// - [`CirculationError::InvalidState`] if the member already has an
    ///   active reservation for the title
    pub async fn reserve(&self, member_id: MemberId, title_id: TitleId) -> Result<Reservation, CirculationError> {
        let reservation = self
            .env
            .atomically("reserve", || self.try_reserve(member_id, title_id))
            .await?;

        let position = self.queue_length(title_id).await.unwrap_or_default();
        tracing::info!(
            reservation_id = %reservation.id,
            %member_id,
            %title_id,
            position,
            "Reservation placed"
        );
        metrics::record_reservation("placed");
        self.env
            .publish([CirculationEvent::ReservationPlaced {
                reservation_id: reservation.id,
                member_id,
                title_id,
                position,
            }])
            .await;
        Ok(reservation)
    }

    async fn try_reserve(&self, member_id: MemberId, title_id: TitleId) -> Result<Reservation, CirculationError> {
        let member = self
            .env
            .store
            .member(member_id)
            .await?
            .ok_or_else(|| CirculationError::not_found(EntityKind::Member, member_id))?;
        let title = self.ledger.load(title_id).await?;

        let existing = self
            .env
            .store
            .reservations(ReservationFilter::for_member(member_id))
            .await?;
        if existing
            .iter()
            .any(|r| r.title_id == title_id && r.status == ReservationStatus::Active)
        {
            return Err(CirculationError::InvalidState(format!(
                "member {member_id} already has an active reservation for title {title_id}"
            )));
        }

        if title.available_copies > 0 {
            tracing::info!(
                %title_id,
                available = title.available_copies,
                "Reservation accepted while copies are on the shelf"
            );
        }

        let reservation = Reservation::active(member_id, title_id, self.env.clock.now());
        let unit = UnitOfWork::new()
            .insert_reservation(reservation.clone())
            .guard_member(member_id, member.version);
        self.env.store.commit(unit).await?;
        Ok(reservation)
    }

    /// Withdraw an active reservation.
    ///
    /// # Errors
    ///
    /// - [`CirculationError::NotFound`] for an unknown reservation
    /// - [`CirculationError::InvalidState`] unless the reservation is active
    pub async fn cancel(&self, reservation_id: ReservationId) -> Result<Reservation, CirculationError> {
        let reservation = self
            .env
            .atomically("cancel_reservation", || self.try_cancel(reservation_id))
            .await?;

        tracing::info!(%reservation_id, member_id = %reservation.member_id, "Reservation cancelled");
        metrics::record_reservation("cancelled");
        self.env
            .publish([CirculationEvent::ReservationCancelled {
                reservation_id,
                member_id: reservation.member_id,
                title_id: reservation.title_id,
            }])
            .await;
        Ok(reservation)
    }

    async fn try_cancel(&self, reservation_id: ReservationId) -> Result<Reservation, CirculationError> {
        let current = self
            .env
            .store
            .reservation(reservation_id)
            .await?
            .ok_or_else(|| CirculationError::not_found(EntityKind::Reservation, reservation_id))?;
        let cancelled = current.cancel(self.env.clock.now())?;
        self.env
            .store
            .commit(UnitOfWork::new().update_reservation(cancelled.clone(), current.version))
            .await?;
        Ok(cancelled)
    }

    /// Give a shelved copy of `title_id` to the first eligible waiting member.
    ///
    /// Candidates are taken in reservation order. A member who already has an
    /// active loan is passed over and keeps their place. Returns `None` when no
    /// copy is on the shelf or nobody eligible is waiting.
    ///
    /// # Errors
    ///
    /// - [`CirculationError::NotFound`] for an unknown title
    /// - [`CirculationError::Store`] if the store fails or conflicts outlive
    ///   every retry
    pub async fn allocate_next(&self, title_id: TitleId) -> Result<Option<Allocation>, CirculationError> {
        let allocation = self
            .env
            .atomically("allocate_reservation", || self.try_allocate(title_id))
            .await?;

        let Some(allocation) = allocation else {
            tracing::debug!(%title_id, "No eligible reservation to fulfil");
            return Ok(None);
        };

        tracing::info!(
            reservation_id = %allocation.reservation.id,
            record_id = %allocation.record.id,
            member_id = %allocation.record.member_id,
            %title_id,
            "Reservation fulfilled"
        );
        metrics::record_reservation("fulfilled");
        self.env
            .publish([CirculationEvent::ReservationFulfilled {
                reservation_id: allocation.reservation.id,
                record_id: allocation.record.id,
                member_id: allocation.record.member_id,
                title_id,
                due_at: allocation.record.due_at,
            }])
            .await;
        Ok(Some(allocation))
    }

    async fn try_allocate(&self, title_id: TitleId) -> Result<Option<Allocation>, CirculationError> {
        let title = self.ledger.load(title_id).await?;
        if title.available_copies == 0 {
            return Ok(None);
        }

        for candidate in self.waiting(title_id).await? {
            let Some(member) = self.env.store.member(candidate.member_id).await? else {
                tracing::warn!(
                    reservation_id = %candidate.id,
                    member_id = %candidate.member_id,
                    "Reservation belongs to an unknown member, skipping"
                );
                continue;
            };

            // Member is read before their loans so the guard covers the check.
            let active = self
                .env
                .store
                .records(RecordFilter::active().member(member.id))
                .await?;
            if !active.is_empty() {
                tracing::debug!(
                    reservation_id = %candidate.id,
                    member_id = %member.id,
                    active_loans = active.len(),
                    "Member has an active loan, passing over"
                );
                continue;
            }

            let terms = self.plans.resolve(member.id).await?;
            let record = BorrowRecord::open(member.id, title_id, self.env.clock.now(), &terms)
                .from_reservation(candidate.id);
            let fulfilled = candidate.fulfil(record.id)?;

            let (unit, _) = InventoryLedger::stage_checkout(UnitOfWork::new(), &title)?;
            let unit = unit
                .update_reservation(fulfilled.clone(), candidate.version)
                .insert_record(record.clone())
                .guard_member(member.id, member.version);
            self.env.store.commit(unit).await?;

            return Ok(Some(Allocation {
                reservation: fulfilled,
                record,
            }));
        }

        Ok(None)
    }

    /// Active, unallocated reservations for a title in queue order.
    async fn waiting(&self, title_id: TitleId) -> Result<Vec<Versioned<Reservation>>, CirculationError> {
        let mut queue: Vec<_> = self
            .env
            .store
            .reservations(ReservationFilter::active_for_title(title_id))
            .await?
            .into_iter()
            .filter(|r| r.is_waiting())
            .collect();
        // Store returns creation order; the stable sort keeps it for equal timestamps.
        queue.sort_by_key(|r| r.reserved_at);
        Ok(queue)
    }

    /// The waitlist for a title, first in line first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn queue(&self, title_id: TitleId) -> Result<Vec<Reservation>, CirculationError> {
        Ok(self
            .waiting(title_id)
            .await?
            .into_iter()
            .map(Versioned::into_inner)
            .collect())
    }

    /// Number of members waiting for a title.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn queue_length(&self, title_id: TitleId) -> Result<usize, CirculationError> {
        Ok(self.waiting(title_id).await?.len())
    }

    /// Every reservation a member has made, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn reservations_for_member(&self, member_id: MemberId) -> Result<Vec<Reservation>, CirculationError> {
        let mut reservations: Vec<_> = self
            .env
            .store
            .reservations(ReservationFilter::for_member(member_id))
            .await?
            .into_iter()
            .map(Versioned::into_inner)
            .collect();
        reservations.sort_by_key(|r| r.reserved_at);
        Ok(reservations)
    }
}
