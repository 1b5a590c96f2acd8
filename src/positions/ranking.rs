use crate::queries::{campaigns::CampaignReferralConfig, waitlist_users::WaitlistUser};
use itertools::Itertools;
use std::cmp::Reverse;
use uuid::Uuid;

/// Ranking key of the bulk recalculation. Higher is better.
pub fn effective_score(user: &WaitlistUser, config: &CampaignReferralConfig) -> i64 {
    let base_count = user.authoritative_referral_count(config.email_verification_required) as i64;
    let mut score = base_count * config.referrer_multiplier();

    if user.referred_by.is_some() {
        score += config.referred_bonus();
    }

    score
}

/// Orders `users` by score descending, then signup time, then ID, and returns
/// dense 1-based positions in that order.
pub fn assign_positions(users: &[WaitlistUser], config: &CampaignReferralConfig) -> Vec<(Uuid, i32)> {
    users
        .iter()
        .map(|user| (effective_score(user, config), user))
        .sorted_by_key(|(score, user)| (Reverse(*score), user.created_at, user.user_id))
        .zip(1..)
        .map(|((_, user), position)| (user.user_id, position))
        .collect()
}
