//! In-memory [`CirculationStore`] for tests, demos and single-process use.

use super::{
    Change, CirculationStore, Guard, RecordFilter, RequestFilter, ReservationFilter, StoreFuture,
    UnitOfWork, Write,
};
use crate::error::{EntityKind, StoreError};
use crate::types::{
    BorrowRecord, BorrowRequest, Entity, Member, MemberId, MembershipPlan, PlanId, RecordId,
    RequestId, Reservation, ReservationId, Title, TitleId,
};
use circulation_core::version::{Version, Versioned};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone, Debug)]
struct Row<T> {
    value: T,
    version: Version,
    /// Insertion sequence, for creation-order queries
    seq: u64,
}

type Table<K, T> = HashMap<K, Row<T>>;

#[derive(Debug, Default)]
struct Tables {
    titles: Table<TitleId, Title>,
    members: Table<MemberId, Member>,
    plans: HashMap<PlanId, MembershipPlan>,
    requests: Table<RequestId, BorrowRequest>,
    records: Table<RecordId, BorrowRecord>,
    reservations: Table<ReservationId, Reservation>,
    next_seq: u64,
}

impl Tables {
    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// `HashMap`-backed store. Commits are serialized by a single lock, so every
/// unit of work is applied atomically.
///
/// # Example
///
/// ```
/// use circulation::store::{CirculationStore, InMemoryStore};
/// use circulation::types::{Title, TitleId};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryStore::new();
/// let title = Title::new(TitleId::new(), "Dune", 3);
/// store.insert_title(title.clone())?;
///
/// let loaded = store.title(title.id).await?;
/// assert_eq!(loaded.map(|t| t.available_copies), Some(3));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a title to the catalog.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Constraint`] if the counters are inconsistent
    /// - [`StoreError::Conflict`] if the id is taken
    pub fn insert_title(&self, title: Title) -> Result<(), StoreError> {
        title
            .validate()
            .map_err(|e| StoreError::Constraint(e.to_string()))?;
        let mut tables = self.write();
        ensure_absent(&tables.titles, title.id, EntityKind::Title)?;
        let seq = tables.seq();
        tables.titles.insert(title.id, fresh_row(title, seq));
        Ok(())
    }

    /// Register a member.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the id is taken.
    pub fn insert_member(&self, member: Member) -> Result<(), StoreError> {
        let mut tables = self.write();
        ensure_absent(&tables.members, member.id, EntityKind::Member)?;
        let seq = tables.seq();
        tables.members.insert(member.id, fresh_row(member, seq));
        Ok(())
    }

    /// Add or replace a membership plan.
    pub fn upsert_plan(&self, plan: MembershipPlan) {
        self.write().plans.insert(plan.id, plan);
    }

    /// Overwrite a title's counters outside any unit of work.
    ///
    /// For stock-taking corrections; bumps the title's version.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Constraint`] if the counters are inconsistent
    /// - [`StoreError::Backend`] if the title does not exist
    pub fn restock(&self, title: Title) -> Result<(), StoreError> {
        title
            .validate()
            .map_err(|e| StoreError::Constraint(e.to_string()))?;
        let mut tables = self.write();
        let row = tables
            .titles
            .get_mut(&title.id)
            .ok_or_else(|| StoreError::Backend(format!("unknown title {}", title.id)))?;
        row.value = title;
        row.version = row.version.next();
        Ok(())
    }
}

fn fresh_row<T>(value: T, seq: u64) -> Row<T> {
    Row {
        value,
        version: Version::INITIAL,
        seq,
    }
}

fn ensure_absent<K: Eq + Hash + std::fmt::Display, T>(
    table: &Table<K, T>,
    id: K,
    entity: EntityKind,
) -> Result<(), StoreError> {
    if table.contains_key(&id) {
        return Err(StoreError::Conflict {
            entity,
            id: id.to_string(),
        });
    }
    Ok(())
}

fn load<K: Eq + Hash, T: Clone>(table: &Table<K, T>, id: &K) -> Option<Versioned<T>> {
    table
        .get(id)
        .map(|row| Versioned::new(row.value.clone(), row.version))
}

fn select<K, T: Clone>(table: &Table<K, T>, keep: impl Fn(&T) -> bool) -> Vec<Versioned<T>> {
    let mut rows: Vec<&Row<T>> = table.values().filter(|row| keep(&row.value)).collect();
    rows.sort_by_key(|row| row.seq);
    rows.into_iter()
        .map(|row| Versioned::new(row.value.clone(), row.version))
        .collect()
}

/// Check a staged write against the current row version.
fn check<T: Entity>(table: &Table<T::Id, T>, write: &Write<T>) -> Result<(), StoreError> {
    let id = write.id();
    let current = table.get(&id).map(|row| row.version);
    if current == write.expected {
        Ok(())
    } else {
        Err(StoreError::Conflict {
            entity: T::KIND,
            id: id.to_string(),
        })
    }
}

fn apply<T: Entity>(table: &mut Table<T::Id, T>, write: Write<T>, seq: u64) {
    let id = write.id();
    match table.get_mut(&id) {
        Some(row) => {
            row.value = write.value;
            row.version = row.version.next();
        }
        None => {
            table.insert(id, fresh_row(write.value, seq));
        }
    }
}

impl Tables {
    fn validate(&self, unit: &UnitOfWork) -> Result<(), StoreError> {
        for change in unit.changes() {
            match change {
                Change::Title(write) => {
                    check(&self.titles, write)?;
                    write
                        .value
                        .validate()
                        .map_err(|e| StoreError::Constraint(e.to_string()))?;
                }
                Change::Request(write) => check(&self.requests, write)?,
                Change::Record(write) => check(&self.records, write)?,
                Change::Reservation(write) => check(&self.reservations, write)?,
            }
        }

        for guard in unit.guards() {
            match guard {
                Guard::Member { member_id, version } => {
                    let current = self.members.get(member_id).map(|row| row.version);
                    if current != Some(*version) {
                        return Err(StoreError::Conflict {
                            entity: EntityKind::Member,
                            id: member_id.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, unit: UnitOfWork) {
        let mut touched_members = HashSet::new();

        for change in unit.changes {
            let seq = self.seq();
            match change {
                Change::Title(write) => apply(&mut self.titles, write, seq),
                Change::Request(write) => apply(&mut self.requests, write, seq),
                Change::Record(write) => {
                    touched_members.insert(write.value.member_id);
                    apply(&mut self.records, write, seq);
                }
                Change::Reservation(write) => {
                    touched_members.insert(write.value.member_id);
                    apply(&mut self.reservations, write, seq);
                }
            }
        }

        for member_id in touched_members {
            if let Some(row) = self.members.get_mut(&member_id) {
                row.version = row.version.next();
            }
        }
    }
}

impl CirculationStore for InMemoryStore {
    fn title(&self, id: TitleId) -> StoreFuture<'_, Option<Versioned<Title>>> {
        let row = load(&self.read().titles, &id);
        Box::pin(async move { Ok(row) })
    }

    fn member(&self, id: MemberId) -> StoreFuture<'_, Option<Versioned<Member>>> {
        let row = load(&self.read().members, &id);
        Box::pin(async move { Ok(row) })
    }

    fn plan(&self, id: PlanId) -> StoreFuture<'_, Option<MembershipPlan>> {
        let plan = self.read().plans.get(&id).cloned();
        Box::pin(async move { Ok(plan) })
    }

    fn request(&self, id: RequestId) -> StoreFuture<'_, Option<Versioned<BorrowRequest>>> {
        let row = load(&self.read().requests, &id);
        Box::pin(async move { Ok(row) })
    }

    fn record(&self, id: RecordId) -> StoreFuture<'_, Option<Versioned<BorrowRecord>>> {
        let row = load(&self.read().records, &id);
        Box::pin(async move { Ok(row) })
    }

    fn reservation(&self, id: ReservationId) -> StoreFuture<'_, Option<Versioned<Reservation>>> {
        let row = load(&self.read().reservations, &id);
        Box::pin(async move { Ok(row) })
    }

    fn requests(&self, filter: RequestFilter) -> StoreFuture<'_, Vec<Versioned<BorrowRequest>>> {
        let rows = select(&self.read().requests, |r| filter.matches(r));
        Box::pin(async move { Ok(rows) })
    }

    fn records(&self, filter: RecordFilter) -> StoreFuture<'_, Vec<Versioned<BorrowRecord>>> {
        let rows = select(&self.read().records, |r| filter.matches(r));
        Box::pin(async move { Ok(rows) })
    }

    fn reservations(&self, filter: ReservationFilter) -> StoreFuture<'_, Vec<Versioned<Reservation>>> {
        let rows = select(&self.read().reservations, |r| filter.matches(r));
        Box::pin(async move { Ok(rows) })
    }

    fn commit(&self, unit: UnitOfWork) -> StoreFuture<'_, ()> {
        let result = {
            let mut tables = self.write();
            tables.validate(&unit).map(|()| tables.apply(unit))
        };
        if let Err(error) = &result {
            tracing::debug!(%error, "Unit of work rejected");
        }
        Box::pin(async move { result })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{LoanStatus, Money, PlanTerms};
    use chrono::Utc;

    fn terms() -> PlanTerms {
        PlanTerms {
            plan_id: None,
            borrow_days: 14,
            renewal_days: 7,
            max_renewals: 2,
            fine_per_day: Money::units(10),
        }
    }

    #[tokio::test]
    async fn stale_write_is_rejected_and_nothing_applies() {
        let store = InMemoryStore::new();
        let title = Title::new(TitleId::new(), "Dune", 2);
        store.insert_title(title.clone()).unwrap();
        let member = MemberId::new();

        let read = store.title(title.id).await.unwrap().unwrap();
        let first = UnitOfWork::new().update_title(read.take_copy().unwrap(), read.version);
        store.commit(first).await.unwrap();

        let record = BorrowRecord::open(member, title.id, Utc::now(), &terms());
        let stale = UnitOfWork::new()
            .insert_record(record.clone())
            .update_title(read.take_copy().unwrap(), read.version);
        let result = store.commit(stale).await;

        assert!(matches!(result, Err(StoreError::Conflict { entity: EntityKind::Title, .. })));
        assert!(store.record(record.id).await.unwrap().is_none());
        let current = store.title(title.id).await.unwrap().unwrap();
        assert_eq!(current.available_copies, 1);
        assert_eq!(current.version, Version::new(1));
    }

    #[tokio::test]
    async fn record_write_moves_member_version() {
        let store = InMemoryStore::new();
        let member = Member::new(MemberId::new(), "Asha", None);
        store.insert_member(member.clone()).unwrap();
        let before = store.member(member.id).await.unwrap().unwrap().version;

        let record = BorrowRecord::open(member.id, TitleId::new(), Utc::now(), &terms());
        store
            .commit(UnitOfWork::new().insert_record(record))
            .await
            .unwrap();

        let after = store.member(member.id).await.unwrap().unwrap().version;
        assert_eq!(after, before.next());

        let guarded = UnitOfWork::new().guard_member(member.id, before);
        assert!(store.commit(guarded).await.is_err());
    }

    #[tokio::test]
    async fn title_constraint_checked_at_commit() {
        let store = InMemoryStore::new();
        let title = Title::new(TitleId::new(), "Dune", 1);
        store.insert_title(title.clone()).unwrap();

        let broken = Title {
            available_copies: 2,
            ..title.clone()
        };
        let result = store
            .commit(UnitOfWork::new().update_title(broken, Version::INITIAL))
            .await;
        assert!(matches!(result, Err(StoreError::Constraint(_))));
    }

    #[tokio::test]
    async fn queries_return_creation_order() {
        let store = InMemoryStore::new();
        let member = MemberId::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let record = BorrowRecord::open(member, TitleId::new(), Utc::now(), &terms());
            ids.push(record.id);
            store
                .commit(UnitOfWork::new().insert_record(record))
                .await
                .unwrap();
        }

        let found: Vec<RecordId> = store
            .records(RecordFilter::for_member(member))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(found, ids);

        let returned = store
            .records(RecordFilter::with_statuses(&[LoanStatus::Returned]))
            .await
            .unwrap();
        assert!(returned.is_empty());
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let store = InMemoryStore::new();
        let request = BorrowRequest::pending(MemberId::new(), TitleId::new(), Utc::now());
        store
            .commit(UnitOfWork::new().insert_request(request.clone()))
            .await
            .unwrap();
        let again = store
            .commit(UnitOfWork::new().insert_request(request))
            .await;
        assert!(matches!(again, Err(StoreError::Conflict { .. })));
    }
}
