use crate::queries::{campaigns::CampaignReferralConfig, waitlist_users::WaitlistUser};

/// `original_position - referrals * positions_per_referral`, never better than 1.
pub fn formula_position(user: &WaitlistUser, config: &CampaignReferralConfig) -> i32 {
    let referrals = user.authoritative_referral_count(config.email_verification_required) as i64;
    let jump = referrals * config.clamped_positions_per_referral();

    // Never above `original_position`, so the conversion back cannot overflow.
    (user.original_position as i64 - jump).max(1) as i32
}
