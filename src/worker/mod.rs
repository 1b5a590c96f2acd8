pub mod referrals;

use crate::positions::PositionService;
use crate::store::WaitlistStore;
use futures::{StreamExt, stream};
use log::{debug, error, info};
use std::time::Duration;
use tokio::time;

/// Periodically recalculates every campaign.
///
/// A campaign whose recalculation fails is simply picked up again on the next tick.
pub struct RecalculationScheduler<S> {
    service: PositionService<S>,
    interval: Duration,
    concurrency: usize,
}

impl<S: WaitlistStore + Send + Sync + 'static> RecalculationScheduler<S> {
    pub fn new(service: PositionService<S>, interval: Duration, concurrency: usize) -> Self {
        Self {
            service,
            interval,
            concurrency: concurrency.max(1),
        }
    }

    /// Runs one pass over all campaigns and returns how many succeeded.
    pub async fn run_once(&self) -> usize {
        let campaign_ids = match self.service.store().list_campaign_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to list campaigns for recalculation: {e:#}");
                return 0;
            }
        };

        let total = campaign_ids.len();

        let succeeded = stream::iter(campaign_ids)
            .map(|campaign_id| async move {
                match self.service.recalculate_campaign(campaign_id).await {
                    Ok(summary) => {
                        debug!(
                            "Campaign {} recalculated with {} users",
                            summary.campaign_id, summary.users
                        );
                        true
                    }
                    // Deleted since it was listed.
                    Err(e) if e.is_not_found() => {
                        info!("Skipping recalculation: {e}");
                        true
                    }
                    Err(e) => {
                        error!("Recalculation of campaign {campaign_id} failed: {e}");
                        false
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .filter(|ok| std::future::ready(*ok))
            .count()
            .await;

        info!("Recalculation pass finished: {succeeded}/{total} campaigns");

        succeeded
    }

    pub fn start(self) -> impl FnOnce() {
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        });

        let close_function = move || {
            task.abort();
            info!("RecalculationScheduler stopped");
        };

        info!("RecalculationScheduler started");

        close_function
    }
}
