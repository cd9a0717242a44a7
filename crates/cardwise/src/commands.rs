// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subcommand implementations.
//!
//! Each command works against an [`EconomyService`] and returns the text to
//! print, so the same code paths serve the binary and its tests.

use cardwise_core::{CardwiseError, IdempotencyKey, Tier, TierId, UserEconomy, UserId};
use cardwise_economy::{
    CommitOutcome, EconomyService, EnforcementResult, ExportRequest, GenerationRequest,
    TierCatalog,
};
use serde_json::json;

fn to_json(value: &serde_json::Value) -> Result<String, CardwiseError> {
    serde_json::to_string_pretty(value).map_err(|e| CardwiseError::Internal(e.to_string()))
}

fn credits_line(economy: &UserEconomy, tier: &Tier) -> String {
    if tier.metered {
        format!(
            "{} remaining ({} used, {} rolled over)",
            economy.credits_remaining(tier),
            economy.credits_used_this_month,
            economy.rollover_credits
        )
    } else {
        format!("unlimited ({} used)", economy.credits_used_this_month)
    }
}

fn render_verdict(verdict: &EnforcementResult) -> String {
    if verdict.can_proceed {
        return format!("allowed (cost {})", verdict.cost);
    }
    let reason = verdict.block_reason.as_deref().unwrap_or("blocked");
    if verdict.suggest_upgrade {
        format!("blocked: {reason} (upgrade available)")
    } else {
        format!("blocked: {reason}")
    }
}

fn render_outcome(outcome: &CommitOutcome, json: bool) -> Result<String, CardwiseError> {
    match outcome {
        CommitOutcome::Committed(receipt) if json => to_json(&json!({
            "committed": true,
            "receipt": receipt,
        })),
        CommitOutcome::Committed(receipt) => Ok(format!(
            "committed {} (cost {}, key {}): {} credits, {} exports remaining",
            receipt.kind,
            receipt.cost,
            receipt.idempotency_key,
            receipt.credits_remaining,
            receipt.exports_remaining
        )),
        CommitOutcome::Denied { verdict, .. } if json => to_json(&json!({
            "committed": false,
            "verdict": verdict,
        })),
        CommitOutcome::Denied { verdict, .. } => Ok(render_verdict(verdict)),
    }
}

/// `cardwise tiers`: the catalog in rank order.
pub fn tiers(catalog: &TierCatalog, json: bool) -> Result<String, CardwiseError> {
    if json {
        let rows: Vec<_> = catalog
            .tiers()
            .iter()
            .map(|t| {
                json!({
                    "id": t.id,
                    "display_name": t.display_name,
                    "monthly_generation_quota": t.monthly_generation_quota,
                    "monthly_export_quota": t.monthly_export_quota,
                    "rollover_cap": t.rollover_cap(),
                    "metered": t.metered,
                    "default": t.id == catalog.default_tier().id,
                })
            })
            .collect();
        return to_json(&serde_json::Value::Array(rows));
    }

    let mut out = format!(
        "{:<12} {:<16} {:>10} {:>8} {:>9}\n",
        "ID", "NAME", "CREDITS", "EXPORTS", "ROLLOVER"
    );
    for tier in catalog.tiers() {
        let credits = if tier.metered {
            tier.monthly_generation_quota.to_string()
        } else {
            "unlimited".to_string()
        };
        let marker = if tier.id == catalog.default_tier().id { " *" } else { "" };
        out.push_str(&format!(
            "{:<12} {:<16} {:>10} {:>8} {:>9}{marker}\n",
            tier.id.to_string(),
            tier.display_name,
            credits,
            tier.monthly_export_quota,
            tier.rollover_cap()
        ));
    }
    Ok(out)
}

/// `cardwise status`: open the user (optionally on a tier) and report balances.
pub async fn status(
    service: &EconomyService,
    user: UserId,
    tier: Option<TierId>,
    json: bool,
) -> Result<String, CardwiseError> {
    service.open_user(user.clone(), tier).await?;
    let economy = service.snapshot(&user)?;
    let tier = service.current_tier(&user)?;
    let stale = service.needs_sync(&user)?;

    if json {
        return to_json(&json!({
            "economy": economy,
            "tier": tier.id,
            "metered": tier.metered,
            "credits_remaining": economy.credits_remaining(&tier),
            "exports_remaining": economy.exports_remaining(&tier),
            "needs_sync": stale,
        }));
    }

    Ok(format!(
        "user:     {}\ntier:     {} ({})\ncredits:  {}\nexports:  {} remaining ({} used)\nperiod:   since {}\nsynced:   {}{}\n",
        economy.user_id,
        tier.display_name,
        tier.id,
        credits_line(&economy, &tier),
        economy.exports_remaining(&tier),
        economy.exports_used_this_month,
        economy.period_start.to_rfc3339(),
        economy.last_synced_at.to_rfc3339(),
        if stale { " (stale)" } else { "" },
    ))
}

/// `cardwise generate`: estimate, or charge when a confirmation key is given.
pub async fn generate(
    service: &EconomyService,
    user: UserId,
    request: GenerationRequest,
    confirm: Option<IdempotencyKey>,
    json: bool,
) -> Result<String, CardwiseError> {
    service.open_user(user.clone(), None).await?;
    match confirm {
        Some(key) => {
            let outcome = service.confirm_generation(&user, &request, &key)?;
            render_outcome(&outcome, json)
        }
        None => {
            let verdict = service.can_generate_content(&user, &request)?;
            if json {
                to_json(&json!(verdict))
            } else {
                Ok(render_verdict(&verdict))
            }
        }
    }
}

/// `cardwise export`: estimate, or charge when a confirmation key is given.
pub async fn export(
    service: &EconomyService,
    user: UserId,
    request: ExportRequest,
    confirm: Option<IdempotencyKey>,
    json: bool,
) -> Result<String, CardwiseError> {
    service.open_user(user.clone(), None).await?;
    match confirm {
        Some(key) => {
            let outcome = service.confirm_export(&user, &request, &key)?;
            render_outcome(&outcome, json)
        }
        None => {
            let verdict = service.can_export_content(&user, &request)?;
            if json {
                to_json(&json!(verdict))
            } else {
                Ok(render_verdict(&verdict))
            }
        }
    }
}

/// `cardwise set-tier`: move a user to another tier.
pub async fn set_tier(
    service: &EconomyService,
    user: UserId,
    tier: TierId,
    json: bool,
) -> Result<String, CardwiseError> {
    let before = service.open_user(user.clone(), None).await?;
    let after = service.change_tier(&user, &tier)?;
    if json {
        return to_json(&json!({ "from": before.tier_id, "economy": after }));
    }
    let tier = service.current_tier(&user)?;
    Ok(format!(
        "{}: {} -> {}, credits {}",
        user,
        before.tier_id,
        after.tier_id,
        credits_line(&after, &tier)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardwise_economy::ExportKind;
    use cardwise_test_utils::TestHarness;

    fn alice() -> UserId {
        UserId::from("alice")
    }

    fn export_request() -> ExportRequest {
        ExportRequest {
            set_id: "set-1".into(),
            kind: ExportKind::Both,
            include_branding: false,
        }
    }

    #[test]
    fn tiers_lists_catalog_in_rank_order() {
        let out = tiers(&TierCatalog::default(), false).unwrap();
        let free = out.find("free").unwrap();
        let pro = out.find("pro").unwrap();
        let unlimited = out.find("unlimited").unwrap();
        assert!(free < pro && pro < unlimited);
        assert!(out.lines().any(|l| l.starts_with("free") && l.ends_with(" *")));
    }

    #[test]
    fn tiers_json_is_an_array() {
        let out = tiers(&TierCatalog::default(), true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 3);
        assert_eq!(value[0]["default"], true);
    }

    #[tokio::test]
    async fn status_reports_fresh_user() {
        let harness = TestHarness::builder().build();
        let out = status(&harness.service, alice(), None, false).await.unwrap();
        assert!(out.contains("tier:     Free (free)"));
        assert!(out.contains("credits:  5 remaining (0 used, 0 rolled over)"));
        harness.service.shutdown().await;
    }

    #[tokio::test]
    async fn estimate_does_not_charge() {
        let harness = TestHarness::builder().build();
        let out = generate(&harness.service, alice(), GenerationRequest::default(), None, false)
            .await
            .unwrap();
        assert_eq!(out, "allowed (cost 1)");
        assert_eq!(harness.service.credits_remaining(&alice()).unwrap(), 5);
        harness.service.shutdown().await;
    }

    #[tokio::test]
    async fn confirmed_generation_charges_once_per_key() {
        let harness = TestHarness::builder().build();
        for _ in 0..2 {
            let out = generate(
                &harness.service,
                alice(),
                GenerationRequest::default(),
                Some(IdempotencyKey::from("k1")),
                false,
            )
            .await
            .unwrap();
            assert!(out.starts_with("committed generation"), "{out}");
        }
        assert_eq!(harness.service.credits_remaining(&alice()).unwrap(), 4);
        harness.service.shutdown().await;
    }

    #[tokio::test]
    async fn exhausted_exports_are_reported_as_blocked() {
        let harness = TestHarness::builder().build();
        for i in 0..5 {
            let key = IdempotencyKey(format!("e{i}"));
            export(&harness.service, alice(), export_request(), Some(key), false)
                .await
                .unwrap();
        }
        let out = export(
            &harness.service,
            alice(),
            export_request(),
            Some(IdempotencyKey::from("e5")),
            true,
        )
        .await
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["committed"], false);
        assert_eq!(value["verdict"]["suggest_upgrade"], true);
        harness.service.shutdown().await;
    }

    #[tokio::test]
    async fn set_tier_moves_user() {
        let harness = TestHarness::builder().build();
        let out = set_tier(&harness.service, alice(), TierId::from("pro"), false)
            .await
            .unwrap();
        assert!(out.starts_with("alice: free -> pro"), "{out}");
        assert_eq!(harness.service.credits_remaining(&alice()).unwrap(), 100);

        let err = set_tier(&harness.service, alice(), TierId::from("gold"), false).await;
        assert!(matches!(err, Err(CardwiseError::UnknownTier { .. })));
        harness.service.shutdown().await;
    }
}
