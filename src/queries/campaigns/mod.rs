use crate::database::{Database, preparer::CachedPreparedStatement};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound for `positions_per_referral` on the incremental path.
pub const MAX_POSITIONS_PER_REFERRAL: i32 = 100;

/// The referral settings of a campaign. Read-only for the position core.
///
/// The integer tunables are `None` when the campaign never set them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReferralConfig {
    pub campaign_id: Uuid,
    pub email_verification_required: bool,
    /// Multiplier of the incremental (formula) path.
    pub positions_per_referral: Option<i32>,
    /// One-time bonus of the bulk path for users that were referred.
    pub positions_to_jump: Option<i32>,
    /// Per-referral multiplier of the bulk path.
    pub referrer_positions_to_jump: Option<i32>,
}

impl CampaignReferralConfig {
    pub fn new(campaign_id: Uuid) -> Self {
        Self {
            campaign_id,
            email_verification_required: false,
            positions_per_referral: None,
            positions_to_jump: None,
            referrer_positions_to_jump: None,
        }
    }

    /// `positions_per_referral`, defaulting to 1 and clamped to `[1, 100]`.
    pub fn clamped_positions_per_referral(&self) -> i64 {
        self.positions_per_referral
            .unwrap_or(1)
            .clamp(1, MAX_POSITIONS_PER_REFERRAL) as i64
    }

    /// `referrer_positions_to_jump`, with unset or non-positive values read as 1.
    pub fn referrer_multiplier(&self) -> i64 {
        match self.referrer_positions_to_jump {
            Some(jump) if jump > 0 => jump as i64,
            _ => 1,
        }
    }

    /// `positions_to_jump`, or 0 when unset or non-positive.
    pub fn referred_bonus(&self) -> i64 {
        self.positions_to_jump.unwrap_or(0).max(0) as i64
    }
}

static GET_CAMPAIGN_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    SELECT campaign_id,
           email_verification_required,
           positions_per_referral,
           positions_to_jump,
           referrer_positions_to_jump
    FROM campaigns
    WHERE campaign_id = ?
    ",
);

pub async fn get_campaign(db: &Database, campaign_id: Uuid) -> Result<Option<CampaignReferralConfig>> {
    let result = GET_CAMPAIGN_QUERY
        .execute_unpaged(db, (campaign_id,))
        .await?
        .into_rows_result()?;

    let rows = result.rows::<(Uuid, Option<bool>, Option<i32>, Option<i32>, Option<i32>)>()?;

    if let Some(row) = rows.into_iter().next() {
        let (
            campaign_id,
            email_verification_required,
            positions_per_referral,
            positions_to_jump,
            referrer_positions_to_jump,
        ) = row?;

        Ok(Some(CampaignReferralConfig {
            campaign_id,
            email_verification_required: email_verification_required.unwrap_or(false),
            positions_per_referral,
            positions_to_jump,
            referrer_positions_to_jump,
        }))
    } else {
        Ok(None)
    }
}

static LIST_CAMPAIGN_IDS_QUERY: CachedPreparedStatement =
    CachedPreparedStatement::new("SELECT campaign_id FROM campaigns");

pub async fn list_campaign_ids(db: &Database) -> Result<Vec<Uuid>> {
    let result = LIST_CAMPAIGN_IDS_QUERY
        .execute_unpaged(db, ())
        .await?
        .into_rows_result()?;

    let campaign_ids = result
        .rows::<(Uuid,)>()?
        .map(|row| row.map(|(campaign_id,)| campaign_id))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(campaign_ids)
}

#[cfg(test)]
static INSERT_CAMPAIGN_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    INSERT INTO campaigns (campaign_id,
                           email_verification_required,
                           positions_per_referral,
                           positions_to_jump,
                           referrer_positions_to_jump)
    VALUES (?, ?, ?, ?, ?)
    ",
);

#[cfg(test)]
pub async fn insert_campaign(db: &Database, config: &CampaignReferralConfig) -> Result<()> {
    INSERT_CAMPAIGN_QUERY
        .execute_unpaged(
            db,
            (
                config.campaign_id,
                config.email_verification_required,
                config.positions_per_referral,
                config.positions_to_jump,
                config.referrer_positions_to_jump,
            ),
        )
        .await?;

    Ok(())
}
