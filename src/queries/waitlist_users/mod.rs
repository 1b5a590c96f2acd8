use crate::database::{Database, preparer::CachedPreparedStatement};
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use log::debug;
use scylla::value::{CqlValue, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Attempts of the compare-and-set loop in [`record_referral`].
const RECORD_REFERRAL_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistUser {
    pub user_id: Uuid,
    pub campaign_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub referral_count: i32,
    /// Subset of `referral_count` whose referred users verified their email.
    pub verified_referral_count: i32,
    /// Rank assigned at signup, before any referral bonus.
    pub original_position: i32,
    pub position: i32,
    pub referred_by: Option<Uuid>,
}

impl WaitlistUser {
    /// The referral count that counts for ranking under the campaign's verification rule.
    pub fn authoritative_referral_count(&self, email_verification_required: bool) -> i32 {
        if email_verification_required {
            self.verified_referral_count
        } else {
            self.referral_count
        }
    }
}

type WaitlistUserRow = (
    Uuid,
    Uuid,
    DateTime<Utc>,
    Option<i32>,
    Option<i32>,
    Option<i32>,
    Option<i32>,
    Option<Uuid>,
);

fn user_from_row(row: WaitlistUserRow) -> WaitlistUser {
    let (
        campaign_id,
        user_id,
        created_at,
        referral_count,
        verified_referral_count,
        original_position,
        position,
        referred_by,
    ) = row;

    let original_position = original_position.unwrap_or(0);

    WaitlistUser {
        user_id,
        campaign_id,
        created_at,
        referral_count: referral_count.unwrap_or(0),
        verified_referral_count: verified_referral_count.unwrap_or(0),
        original_position,
        position: position.unwrap_or(original_position),
        referred_by,
    }
}

static GET_USER_CAMPAIGN_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    SELECT campaign_id
    FROM waitlist_user_campaigns
    WHERE user_id = ?
    ",
);

async fn get_user_campaign_id(db: &Database, user_id: Uuid) -> Result<Option<Uuid>> {
    let result = GET_USER_CAMPAIGN_QUERY
        .execute_unpaged(db, (user_id,))
        .await?
        .into_rows_result()?;

    let campaign_id = result.maybe_first_row::<(Uuid,)>()?.map(|(id,)| id);

    Ok(campaign_id)
}

static GET_USER_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    SELECT campaign_id,
           user_id,
           created_at,
           referral_count,
           verified_referral_count,
           original_position,
           position,
           referred_by
    FROM waitlist_users
    WHERE campaign_id = ?
      AND user_id = ?
    ",
);

pub async fn get_user(db: &Database, user_id: Uuid) -> Result<Option<WaitlistUser>> {
    let Some(campaign_id) = get_user_campaign_id(db, user_id).await? else {
        return Ok(None);
    };

    let result = GET_USER_QUERY
        .execute_unpaged(db, (campaign_id, user_id))
        .await?
        .into_rows_result()?;

    Ok(result.maybe_first_row::<WaitlistUserRow>()?.map(user_from_row))
}

static LIST_CAMPAIGN_USERS_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    SELECT campaign_id,
           user_id,
           created_at,
           referral_count,
           verified_referral_count,
           original_position,
           position,
           referred_by
    FROM waitlist_users
    WHERE campaign_id = ?
    ",
);

/// Every user of a campaign, fetched page by page.
pub async fn list_users_for_recalculation(
    db: &Database,
    campaign_id: Uuid,
) -> Result<Vec<WaitlistUser>> {
    let prepared = LIST_CAMPAIGN_USERS_QUERY.get_prepared_statement(db).await?;

    let rows: Vec<WaitlistUserRow> = db
        .execute_iter(prepared, (campaign_id,))
        .await?
        .rows_stream::<WaitlistUserRow>()?
        .try_collect()
        .await?;

    Ok(rows.into_iter().map(user_from_row).collect())
}

static UPDATE_POSITION_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    UPDATE waitlist_users
    SET position = ?
    WHERE campaign_id = ?
      AND user_id = ?
    ",
);

/// Writes all positions of a campaign in one logged, single-partition batch.
pub async fn bulk_write_positions(
    db: &Database,
    campaign_id: Uuid,
    positions: &[(Uuid, i32)],
) -> Result<()> {
    let values = positions
        .iter()
        .map(|&(user_id, position)| (position, campaign_id, user_id))
        .collect::<Vec<_>>();

    // Oversized campaigns hit the server's batch size limit here.
    UPDATE_POSITION_QUERY
        .execute_batch(db, values)
        .await
        .with_context(|| {
            format!(
                "batch write of {} positions for campaign {campaign_id}",
                positions.len()
            )
        })
}

pub async fn write_user_position(db: &Database, user_id: Uuid, position: i32) -> Result<()> {
    // Updating a missing row would create it, so resolve the campaign first.
    let Some(campaign_id) = get_user_campaign_id(db, user_id).await? else {
        bail!("cannot write position of unknown user {user_id}");
    };

    UPDATE_POSITION_QUERY
        .execute_unpaged(db, (position, campaign_id, user_id))
        .await?;

    Ok(())
}

static GET_REFERRAL_COUNTS_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    SELECT referral_count,
           verified_referral_count
    FROM waitlist_users
    WHERE campaign_id = ?
      AND user_id = ?
    ",
);

static SET_REFERRAL_COUNTS_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    UPDATE waitlist_users
    SET referral_count = ?,
        verified_referral_count = ?
    WHERE campaign_id = ?
      AND user_id = ?
    IF referral_count = ?
      AND verified_referral_count = ?
    ",
);

fn lwt_applied(row: &Row) -> bool {
    matches!(row.columns.first(), Some(Some(CqlValue::Boolean(true))))
}

/// Counts after one more referral. Missing counts start from zero.
pub(crate) fn next_referral_counts(
    user_id: Uuid,
    referral_count: Option<i32>,
    verified_referral_count: Option<i32>,
    verified: bool,
) -> Result<(i32, i32)> {
    let (Some(referral_count), Some(verified_referral_count)) = (
        referral_count.unwrap_or(0).checked_add(1),
        verified_referral_count
            .unwrap_or(0)
            .checked_add(i32::from(verified)),
    ) else {
        bail!("referral count of user {user_id} overflowed");
    };

    Ok((referral_count, verified_referral_count))
}

/// Credits one referral to `user_id`, and one verified referral when `verified`.
///
/// Returns `false` when the user does not exist.
pub async fn record_referral(db: &Database, user_id: Uuid, verified: bool) -> Result<bool> {
    let Some(campaign_id) = get_user_campaign_id(db, user_id).await? else {
        return Ok(false);
    };

    for attempt in 1..=RECORD_REFERRAL_ATTEMPTS {
        // Raw column values: the condition must match a null count as null.
        let Some((stored_count, stored_verified_count)) = GET_REFERRAL_COUNTS_QUERY
            .execute_unpaged(db, (campaign_id, user_id))
            .await?
            .into_rows_result()?
            .maybe_first_row::<(Option<i32>, Option<i32>)>()?
        else {
            return Ok(false);
        };

        let (referral_count, verified_referral_count) =
            next_referral_counts(user_id, stored_count, stored_verified_count, verified)?;

        let result = SET_REFERRAL_COUNTS_QUERY
            .execute_unpaged(
                db,
                (
                    referral_count,
                    verified_referral_count,
                    campaign_id,
                    user_id,
                    stored_count,
                    stored_verified_count,
                ),
            )
            .await?
            .into_rows_result()?;

        if let Some(row) = result.maybe_first_row::<Row>()?
            && lwt_applied(&row)
        {
            return Ok(true);
        }

        debug!("Referral count of user {user_id} changed concurrently (attempt {attempt})");
    }

    bail!("gave up recording referral for user {user_id} after {RECORD_REFERRAL_ATTEMPTS} attempts")
}

#[cfg(test)]
static INSERT_USER_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    INSERT INTO waitlist_users (campaign_id,
                                user_id,
                                created_at,
                                referral_count,
                                verified_referral_count,
                                original_position,
                                position,
                                referred_by)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    ",
);

#[cfg(test)]
static INSERT_USER_CAMPAIGN_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    INSERT INTO waitlist_user_campaigns (user_id, campaign_id)
    VALUES (?, ?)
    ",
);

#[cfg(test)]
pub async fn insert_user(db: &Database, user: &WaitlistUser) -> Result<()> {
    if user.verified_referral_count > user.referral_count {
        bail!(
            "user {} has more verified referrals ({}) than referrals ({})",
            user.user_id,
            user.verified_referral_count,
            user.referral_count
        );
    }

    INSERT_USER_QUERY
        .execute_unpaged(
            db,
            (
                user.campaign_id,
                user.user_id,
                user.created_at,
                user.referral_count,
                user.verified_referral_count,
                user.original_position,
                user.position,
                user.referred_by,
            ),
        )
        .await?;

    INSERT_USER_CAMPAIGN_QUERY
        .execute_unpaged(db, (user.user_id, user.campaign_id))
        .await?;

    Ok(())
}
