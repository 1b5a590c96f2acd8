//! The persistence interface the position core reads and writes through.

use crate::database::Database;
use crate::queries::{
    campaigns::{self, CampaignReferralConfig},
    waitlist_users::{self, WaitlistUser},
};
use anyhow::Result;
use uuid::Uuid;

pub trait WaitlistStore {
    fn get_campaign(
        &self,
        campaign_id: Uuid,
    ) -> impl Future<Output = Result<Option<CampaignReferralConfig>>> + Send;

    fn list_campaign_ids(&self) -> impl Future<Output = Result<Vec<Uuid>>> + Send;

    fn list_users_for_recalculation(
        &self,
        campaign_id: Uuid,
    ) -> impl Future<Output = Result<Vec<WaitlistUser>>> + Send;

    /// Must apply every pair or none of them.
    fn bulk_write_positions(
        &self,
        campaign_id: Uuid,
        positions: &[(Uuid, i32)],
    ) -> impl Future<Output = Result<()>> + Send;

    fn get_user(&self, user_id: Uuid) -> impl Future<Output = Result<Option<WaitlistUser>>> + Send;

    fn write_user_position(
        &self,
        user_id: Uuid,
        position: i32,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Returns `false` when the user does not exist.
    fn record_referral(
        &self,
        user_id: Uuid,
        verified: bool,
    ) -> impl Future<Output = Result<bool>> + Send;
}

impl WaitlistStore for Database {
    async fn get_campaign(&self, campaign_id: Uuid) -> Result<Option<CampaignReferralConfig>> {
        campaigns::get_campaign(self, campaign_id).await
    }

    async fn list_campaign_ids(&self) -> Result<Vec<Uuid>> {
        campaigns::list_campaign_ids(self).await
    }

    async fn list_users_for_recalculation(&self, campaign_id: Uuid) -> Result<Vec<WaitlistUser>> {
        waitlist_users::list_users_for_recalculation(self, campaign_id).await
    }

    async fn bulk_write_positions(&self, campaign_id: Uuid, positions: &[(Uuid, i32)]) -> Result<()> {
        waitlist_users::bulk_write_positions(self, campaign_id, positions).await
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<WaitlistUser>> {
        waitlist_users::get_user(self, user_id).await
    }

    async fn write_user_position(&self, user_id: Uuid, position: i32) -> Result<()> {
        waitlist_users::write_user_position(self, user_id, position).await
    }

    async fn record_referral(&self, user_id: Uuid, verified: bool) -> Result<bool> {
        waitlist_users::record_referral(self, user_id, verified).await
    }
}

#[cfg(test)]
pub mod memory {
    //! An in-process store that also records how it was called.

    use super::*;
    use anyhow::bail;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    pub struct InMemoryStore {
        campaigns: Mutex<HashMap<Uuid, CampaignReferralConfig>>,
        users: Mutex<HashMap<Uuid, WaitlistUser>>,
        /// Pause inside the read-sort-write window, to widen races in tests.
        pub recalculation_delay: Option<Duration>,
        pub fail_writes: AtomicBool,
        pub fail_campaign_reads: AtomicBool,
        pub fail_user_reads: AtomicBool,
        pub position_writes: AtomicUsize,
        pub bulk_writes: AtomicUsize,
        active_recalculations: Mutex<HashMap<Uuid, usize>>,
        overlap_detected: AtomicBool,
        max_concurrent_recalculations: AtomicUsize,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_recalculation_delay(delay: Duration) -> Self {
            Self {
                recalculation_delay: Some(delay),
                ..Self::default()
            }
        }

        pub fn add_campaign(&self, config: CampaignReferralConfig) {
            self.campaigns
                .lock()
                .unwrap()
                .insert(config.campaign_id, config);
        }

        pub fn add_user(&self, user: WaitlistUser) {
            self.users.lock().unwrap().insert(user.user_id, user);
        }

        pub fn user(&self, user_id: Uuid) -> WaitlistUser {
            self.users.lock().unwrap()[&user_id].clone()
        }

        /// Positions of a campaign keyed by user.
        pub fn positions(&self, campaign_id: Uuid) -> HashMap<Uuid, i32> {
            self.users
                .lock()
                .unwrap()
                .values()
                .filter(|u| u.campaign_id == campaign_id)
                .map(|u| (u.user_id, u.position))
                .collect()
        }

        /// Whether two recalculations of the same campaign were ever inside
        /// their read-sort-write window at the same time.
        pub fn overlap_detected(&self) -> bool {
            self.overlap_detected.load(Ordering::SeqCst)
        }

        /// Highest number of recalculations (any campaign) seen in flight together.
        pub fn max_concurrent_recalculations(&self) -> usize {
            self.max_concurrent_recalculations.load(Ordering::SeqCst)
        }

        fn enter_recalculation(&self, campaign_id: Uuid) {
            let mut active = self.active_recalculations.lock().unwrap();
            let count = active.entry(campaign_id).or_default();
            *count += 1;
            if *count > 1 {
                self.overlap_detected.store(true, Ordering::SeqCst);
            }
            let in_flight = active.values().sum::<usize>();
            self.max_concurrent_recalculations
                .fetch_max(in_flight, Ordering::SeqCst);
        }

        fn leave_recalculation(&self, campaign_id: Uuid) {
            let mut active = self.active_recalculations.lock().unwrap();
            if let Some(count) = active.get_mut(&campaign_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    active.remove(&campaign_id);
                }
            }
        }
    }

    impl WaitlistStore for InMemoryStore {
        async fn get_campaign(&self, campaign_id: Uuid) -> Result<Option<CampaignReferralConfig>> {
            if self.fail_campaign_reads.load(Ordering::SeqCst) {
                bail!("campaign read timed out");
            }

            Ok(self.campaigns.lock().unwrap().get(&campaign_id).cloned())
        }

        async fn list_campaign_ids(&self) -> Result<Vec<Uuid>> {
            let mut ids: Vec<_> = self.campaigns.lock().unwrap().keys().copied().collect();
            ids.sort();
            Ok(ids)
        }

        async fn list_users_for_recalculation(
            &self,
            campaign_id: Uuid,
        ) -> Result<Vec<WaitlistUser>> {
            if self.fail_user_reads.load(Ordering::SeqCst) {
                bail!("user listing timed out");
            }

            let users: Vec<_> = self
                .users
                .lock()
                .unwrap()
                .values()
                .filter(|u| u.campaign_id == campaign_id)
                .cloned()
                .collect();

            if !users.is_empty() {
                self.enter_recalculation(campaign_id);
                if let Some(delay) = self.recalculation_delay {
                    tokio::time::sleep(delay).await;
                }
            }

            Ok(users)
        }

        async fn bulk_write_positions(
            &self,
            campaign_id: Uuid,
            positions: &[(Uuid, i32)],
        ) -> Result<()> {
            let result = if self.fail_writes.load(Ordering::SeqCst) {
                Err(anyhow::anyhow!("batch rejected"))
            } else {
                let mut users = self.users.lock().unwrap();
                for (user_id, position) in positions {
                    if let Some(user) = users.get_mut(user_id) {
                        user.position = *position;
                    }
                }
                self.bulk_writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            };

            self.leave_recalculation(campaign_id);
            result
        }

        async fn get_user(&self, user_id: Uuid) -> Result<Option<WaitlistUser>> {
            if self.fail_user_reads.load(Ordering::SeqCst) {
                bail!("user read timed out");
            }

            Ok(self.users.lock().unwrap().get(&user_id).cloned())
        }

        async fn write_user_position(&self, user_id: Uuid, position: i32) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                bail!("write rejected");
            }

            let mut users = self.users.lock().unwrap();
            let Some(user) = users.get_mut(&user_id) else {
                bail!("cannot write position of unknown user {user_id}");
            };
            user.position = position;
            self.position_writes.fetch_add(1, Ordering::SeqCst);

            Ok(())
        }

        async fn record_referral(&self, user_id: Uuid, verified: bool) -> Result<bool> {
            let mut users = self.users.lock().unwrap();
            let Some(user) = users.get_mut(&user_id) else {
                return Ok(false);
            };
            (user.referral_count, user.verified_referral_count) =
                waitlist_users::next_referral_counts(
                    user_id,
                    Some(user.referral_count),
                    Some(user.verified_referral_count),
                    verified,
                )?;

            Ok(true)
        }
    }

    pub fn user(
        campaign_id: Uuid,
        created_at: DateTime<Utc>,
        referral_count: i32,
        original_position: i32,
    ) -> WaitlistUser {
        WaitlistUser {
            user_id: Uuid::new_v4(),
            campaign_id,
            created_at,
            referral_count,
            verified_referral_count: 0,
            original_position,
            position: original_position,
            referred_by: None,
        }
    }
}
