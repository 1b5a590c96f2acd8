use crate::positions::PositionService;
use crate::store::WaitlistStore;
use anyhow::{Result, bail};
use futures::StreamExt;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

/// A user was credited with a referral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralEvent {
    pub referrer_id: Uuid,
    /// The referred user verified their email.
    pub verified: bool,
}

/// Applies referral events as they arrive: bumps the referrer's counts, then
/// moves the referrer with the incremental formula.
pub struct ReferralEventManager {
    sender: mpsc::UnboundedSender<ReferralEvent>,
    worker_handle: JoinHandle<()>,
}

impl ReferralEventManager {
    pub fn new<S: WaitlistStore + Send + Sync + 'static>(
        service: PositionService<S>,
        concurrency: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        let worker_handle = tokio::spawn(Self::worker(service, receiver, concurrency.max(1)));

        Self {
            sender,
            worker_handle,
        }
    }

    async fn worker<S: WaitlistStore + Send + Sync + 'static>(
        service: PositionService<S>,
        receiver: mpsc::UnboundedReceiver<ReferralEvent>,
        concurrency: usize,
    ) {
        UnboundedReceiverStream::new(receiver)
            .for_each_concurrent(concurrency, |event| {
                let service = service.clone();
                async move {
                    if let Err(e) = Self::handle_event(&service, event).await {
                        error!("Failed to apply referral event {event:?}: {e:#}");
                    }
                }
            })
            .await
    }

    async fn handle_event<S: WaitlistStore + Send + Sync + 'static>(
        service: &PositionService<S>,
        event: ReferralEvent,
    ) -> Result<()> {
        let recorded = service
            .store()
            .record_referral(event.referrer_id, event.verified)
            .await?;

        if !recorded {
            bail!("referrer {} does not exist", event.referrer_id);
        }

        // The count is already stored; a stale position is fixed by the next bulk pass.
        match service.update_user_position(event.referrer_id).await {
            Ok(update) if update.written => debug!(
                "Referral moved user {} from position {} to {}",
                update.user_id, update.previous, update.current
            ),
            Ok(_) => {}
            Err(e) => warn!(
                "Referral recorded but position of {} not updated: {e}",
                event.referrer_id
            ),
        }

        Ok(())
    }

    pub fn submit(&self, event: ReferralEvent) -> Result<()> {
        self.sender.send(event)?;

        Ok(())
    }

    /// Stops accepting events and waits for the pending ones.
    pub async fn close(self) {
        drop(self.sender);

        if let Err(e) = self.worker_handle.await {
            error!("Referral worker join error: {:?}", e);
        }
    }
}
