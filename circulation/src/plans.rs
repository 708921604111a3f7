//! Resolves the borrowing terms that apply to a member.

use crate::environment::CirculationEnvironment;
use crate::error::{CirculationError, EntityKind};
use crate::types::{MAX_RENEWALS, MemberId, MembershipPlan, PlanTerms};

/// Maps a member to their plan's terms, falling back to system defaults.
#[derive(Clone, Debug)]
pub struct PlanResolver {
    env: CirculationEnvironment,
}

impl PlanResolver {
    /// Creates a resolver over `env`
    #[must_use]
    pub const fn new(env: CirculationEnvironment) -> Self {
        Self { env }
    }

    /// Terms for `member_id`.
    ///
    /// A member without a plan, or whose plan no longer exists, gets the
    /// system defaults. A plan without its own fine rate uses the default rate.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::NotFound`] for an unknown member.
    pub async fn resolve(&self, member_id: MemberId) -> Result<PlanTerms, CirculationError> {
        let member = self
            .env
            .store
            .member(member_id)
            .await?
            .ok_or_else(|| CirculationError::not_found(EntityKind::Member, member_id))?;

        let plan = match member.plan_id {
            Some(plan_id) => {
                let plan = self.env.store.plan(plan_id).await?;
                if plan.is_none() {
                    tracing::warn!(%member_id, %plan_id, "Member plan missing, using defaults");
                }
                plan
            }
            None => None,
        };

        Ok(self.terms_for(plan.as_ref()))
    }

    /// Terms for a plan, or the defaults when there is none.
    #[must_use]
    pub fn terms_for(&self, plan: Option<&MembershipPlan>) -> PlanTerms {
        let policy = &self.env.policy;
        plan.map_or(
            PlanTerms {
                plan_id: None,
                borrow_days: policy.default_borrow_days,
                renewal_days: policy.default_renewal_days,
                max_renewals: MAX_RENEWALS,
                fine_per_day: policy.default_fine_per_day,
            },
            |plan| PlanTerms {
                plan_id: Some(plan.id),
                borrow_days: plan.borrow_days,
                renewal_days: plan.renewal_days,
                max_renewals: MAX_RENEWALS,
                fine_per_day: plan.fine_per_day.unwrap_or(policy.default_fine_per_day),
            },
        )
    }
}
