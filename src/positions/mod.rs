//! Waitlist position assignment.
//!
//! Two paths write `position`:
//!
//! - [`PositionService::recalculate_campaign`] ranks every user of a campaign
//!   from scratch under the campaign's lock and writes positions `1..=N` in
//!   one batch.
//! - [`PositionService::update_user_position`] recomputes a single user from
//!   `original_position` and their referral count, without locking.
//!
//! They score referrals differently (per-referral jumps plus a referred bonus
//! vs. a per-referral subtraction), so the two can disagree about the same
//! user until the next bulk pass.

pub mod error;
mod formula;
mod locks;
mod ranking;

use crate::store::WaitlistStore;
use error::{PositionError, Result};
use formula::formula_position;
use locks::CampaignLocks;
use log::{debug, info};
use ranking::assign_positions;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecalculationSummary {
    pub campaign_id: Uuid,
    pub users: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionUpdate {
    pub user_id: Uuid,
    pub previous: i32,
    pub current: i32,
    pub written: bool,
}

pub struct PositionService<S> {
    store: Arc<S>,
    locks: CampaignLocks,
}

impl<S> Clone for PositionService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl<S: WaitlistStore + Send + Sync + 'static> PositionService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: CampaignLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Ranks every user of the campaign and writes positions `1..=N`.
    ///
    /// At most one call per campaign runs at a time; others wait for it.
    pub async fn recalculate_campaign(&self, campaign_id: Uuid) -> Result<RecalculationSummary> {
        let _guard = self.locks.acquire(campaign_id).await;

        let config = self
            .store
            .get_campaign(campaign_id)
            .await
            .map_err(PositionError::store("get_campaign", campaign_id))?
            .ok_or(PositionError::CampaignNotFound(campaign_id))?;

        let users = self
            .store
            .list_users_for_recalculation(campaign_id)
            .await
            .map_err(PositionError::store(
                "list_users_for_recalculation",
                campaign_id,
            ))?;

        if users.is_empty() {
            debug!("Campaign {campaign_id} has no users, nothing to recalculate");
            return Ok(RecalculationSummary {
                campaign_id,
                users: 0,
            });
        }

        let assignment = assign_positions(&users, &config);

        self.store
            .bulk_write_positions(campaign_id, &assignment)
            .await
            .map_err(PositionError::store("bulk_write_positions", campaign_id))?;

        info!(
            "Recalculated positions of campaign {campaign_id} ({} users)",
            assignment.len()
        );

        Ok(RecalculationSummary {
            campaign_id,
            users: assignment.len(),
        })
    }

    /// Recomputes one user's position after their referral count changed.
    ///
    /// Skips the write when the position is unchanged.
    pub async fn update_user_position(&self, user_id: Uuid) -> Result<PositionUpdate> {
        let user = self
            .store
            .get_user(user_id)
            .await
            .map_err(PositionError::store("get_user", user_id))?
            .ok_or(PositionError::UserNotFound(user_id))?;

        let config = self
            .store
            .get_campaign(user.campaign_id)
            .await
            .map_err(PositionError::store("get_campaign", user.campaign_id))?
            .ok_or(PositionError::CampaignNotFound(user.campaign_id))?;

        let current = formula_position(&user, &config);

        if current == user.position {
            debug!("Position of user {user_id} unchanged at {current}");
            return Ok(PositionUpdate {
                user_id,
                previous: user.position,
                current,
                written: false,
            });
        }

        self.store
            .write_user_position(user_id, current)
            .await
            .map_err(PositionError::store("write_user_position", user_id))?;

        debug!(
            "Moved user {user_id} from position {} to {current}",
            user.position
        );

        Ok(PositionUpdate {
            user_id,
            previous: user.position,
            current,
            written: true,
        })
    }
}
