// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Merging a server-authoritative record into the local ledger.
//!
//! The merge is conservative: within the same period each balance takes
//! whichever side leaves the user with less, so a sync race can never hand
//! out extra credits or exports.

use cardwise_core::{Tier, TierId, UserEconomy};
use chrono::{DateTime, Utc};

use crate::reset::PeriodResetScheduler;

/// Merge `remote` into `local`, judged under the local tier.
///
/// - A remote record from a later period (starting at or past the end of
///   the local period) wins: its period start and counters replace the
///   local ones.
/// - A remote record from an earlier period is ignored; the local period
///   is already ahead.
/// - Anything else is the same period, even when the two sides anchored
///   it on different days. Credits (used plus rollover) come from the side
///   with fewer credits remaining, and the export counter from the side
///   with fewer exports remaining.
///
/// The result is clamped so rollover never exceeds the local tier's cap and
/// usage never exceeds its capacity. It keeps the local tier id and is
/// stamped as synced at `now`.
pub fn reconcile_records(
    local: &UserEconomy,
    remote: &UserEconomy,
    tier: &Tier,
    now: DateTime<Utc>,
) -> UserEconomy {
    let mut merged = local.clone();

    if starts_after_period_of(remote, local) {
        merged.period_start = remote.period_start;
        merged.credits_used_this_month = remote.credits_used_this_month;
        merged.rollover_credits = remote.rollover_credits;
        merged.exports_used_this_month = remote.exports_used_this_month;
    } else if !starts_after_period_of(local, remote) {
        if remote.credits_remaining(tier) < local.credits_remaining(tier) {
            merged.credits_used_this_month = remote.credits_used_this_month;
            merged.rollover_credits = remote.rollover_credits;
        }
        if remote.exports_remaining(tier) < local.exports_remaining(tier) {
            merged.exports_used_this_month = remote.exports_used_this_month;
        }
    }

    clamp_to_tier(&mut merged, tier);
    merged.last_synced_at = now;
    merged
}

/// Fold usage charged in memory while the store was unreadable into the
/// stored record, once it can be read again.
///
/// `stored` must already be rolled forward to the current period. The
/// in-memory counters are added on top of the stored ones, so nothing
/// charged on either side is forgotten. The result carries `tier_id` and is
/// clamped under `tier`.
pub fn merge_recovered(
    stored: &UserEconomy,
    in_memory: &UserEconomy,
    tier_id: TierId,
    tier: &Tier,
) -> UserEconomy {
    let mut merged = stored.clone();
    merged.tier_id = tier_id;
    merged.credits_used_this_month = stored
        .credits_used_this_month
        .saturating_add(in_memory.credits_used_this_month);
    merged.exports_used_this_month = stored
        .exports_used_this_month
        .saturating_add(in_memory.exports_used_this_month);
    clamp_to_tier(&mut merged, tier);
    merged
}

/// Whether `a` starts at or after the end of the period `b` is in.
fn starts_after_period_of(a: &UserEconomy, b: &UserEconomy) -> bool {
    PeriodResetScheduler::next_boundary(b.period_start).is_some_and(|end| a.period_start >= end)
}

fn clamp_to_tier(economy: &mut UserEconomy, tier: &Tier) {
    economy.rollover_credits = economy.rollover_credits.min(tier.rollover_cap());
    if tier.metered {
        economy.credits_used_this_month = economy
            .credits_used_this_month
            .min(economy.credit_capacity(tier));
    }
    economy.exports_used_this_month = economy
        .exports_used_this_month
        .min(tier.monthly_export_quota);
}
