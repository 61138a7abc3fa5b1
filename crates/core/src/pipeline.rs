//! End-to-end evaluation of one user over one window: extract, evaluate, resolve, assemble, guard.

use crate::audit::{AuditEvent, GuardrailStats};
use crate::catalog::Catalog;
use crate::config::{Settings, Strictness};
use crate::domain::persona::PersonaAssignment;
use crate::domain::records::{AccountKind, UserRecords};
use crate::domain::recommendation::RecommendationCandidate;
use crate::domain::signals::SignalSnapshot;
use crate::guardrails::{GuardContext, GuardrailAuditEntry, GuardrailChain};
use crate::persona::{evaluate, resolve, unclassified_after_violation};
use crate::recommend::{assemble, AssemblyDiagnostic};
use crate::signals::extract;
use crate::time::TimeWindow;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    pub strictness: Strictness,
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            strictness: settings.strictness(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub snapshot: SignalSnapshot,
    pub assignment: PersonaAssignment,
    pub recommendations: Vec<RecommendationCandidate>,
    pub guardrail_audit: Vec<GuardrailAuditEntry>,
    pub diagnostics: Vec<AssemblyDiagnostic>,
    pub events: Vec<AuditEvent>,
}

impl PipelineOutput {
    pub fn guardrail_stats(&self) -> GuardrailStats {
        GuardrailStats::from_entries(&self.guardrail_audit)
    }
}

#[derive(Debug)]
pub struct UserOutcome {
    pub user_id: String,
    pub window: TimeWindow,
    pub result: anyhow::Result<PipelineOutput>,
}

pub fn evaluate_user(
    records: &UserRecords,
    window: TimeWindow,
    reference_date: NaiveDate,
    catalog: &Catalog,
    options: &PipelineOptions,
) -> anyhow::Result<PipelineOutput> {
    evaluate_user_at(records, window, reference_date, catalog, options, Utc::now())
}

/// Same as [`evaluate_user`] with an explicit `assigned_at`, so replays are byte-stable.
pub fn evaluate_user_at(
    records: &UserRecords,
    window: TimeWindow,
    reference_date: NaiveDate,
    catalog: &Catalog,
    options: &PipelineOptions,
    assigned_at: DateTime<Utc>,
) -> anyhow::Result<PipelineOutput> {
    let user_id = records.user_id.as_str();
    let mut events = Vec::new();

    let snapshot = extract(
        user_id,
        &records.accounts,
        &records.transactions,
        &records.liabilities,
        window,
        reference_date,
    );
    events.push(AuditEvent::signal_computed(&snapshot));

    let evidence = evaluate(&snapshot, &catalog.personas);
    let assignment = match resolve(
        user_id,
        window,
        evidence.clone(),
        &catalog.personas,
        catalog.rank_tie_policy,
        assigned_at,
    ) {
        Ok(assignment) => assignment,
        Err(violation) => match options.strictness {
            Strictness::Strict => return Err(violation.into()),
            Strictness::Lenient => {
                tracing::warn!(
                    user_id,
                    window = %window,
                    kind = violation.kind.as_str(),
                    detail = %violation.detail,
                    "invariant violation during resolution; assigning unclassified"
                );
                unclassified_after_violation(user_id, window, evidence, &violation, assigned_at)
            }
        },
    };
    events.push(AuditEvent::persona_assigned(&assignment));
    tracing::debug!(
        user_id,
        window = %window,
        persona = %assignment.assigned_persona_id,
        reason = %assignment.prioritization_reason,
        "persona resolved"
    );

    let assembly = assemble(&assignment, catalog);
    let mut diagnostics = Vec::new();
    if let Some(diagnostic) = assembly.diagnostic {
        events.push(AuditEvent::catalog_lookup_failed(&assignment, &diagnostic));
        diagnostics.push(diagnostic);
    }

    let held_accounts: BTreeSet<AccountKind> = records.accounts.iter().map(|a| a.kind).collect();
    let ctx = GuardContext {
        user_id,
        consent: records.consent,
        assignment: &assignment,
        snapshot: &snapshot,
        held_accounts: &held_accounts,
        catalog,
    };
    let screened = GuardrailChain::default().apply_all(assembly.candidates, &ctx);
    events.extend(
        screened
            .audit
            .iter()
            .map(|entry| AuditEvent::guardrail_checked(window, entry)),
    );

    tracing::info!(
        user_id,
        window = %window,
        persona = %assignment.assigned_persona_id,
        surfaced = screened.surfaced.len(),
        withheld = screened.audit.len() - screened.surfaced.len(),
        "user evaluated"
    );

    Ok(PipelineOutput {
        snapshot,
        assignment,
        recommendations: screened.surfaced,
        guardrail_audit: screened.audit,
        diagnostics,
        events,
    })
}

/// Evaluate every (user, window) pair independently. A failure is recorded in its outcome and
/// never stops the remaining evaluations.
pub fn evaluate_batch(
    users: &[UserRecords],
    windows: &[TimeWindow],
    reference_date: NaiveDate,
    catalog: &Catalog,
    options: &PipelineOptions,
) -> Vec<UserOutcome> {
    let mut outcomes = Vec::with_capacity(users.len() * windows.len());
    for records in users {
        for &window in windows {
            let result = evaluate_user(records, window, reference_date, catalog, options);
            if let Err(err) = &result {
                tracing::warn!(
                    user_id = %records.user_id,
                    window = %window,
                    error = %format!("{err:#}"),
                    "user evaluation failed"
                );
            }
            outcomes.push(UserOutcome {
                user_id: records.user_id.clone(),
                window,
                result,
            });
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RankTiePolicy;
    use crate::error::{InvariantKind, InvariantViolation};
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn user(consent: &str) -> UserRecords {
        serde_json::from_value(json!({
            "user_id": "u1",
            "consent": consent,
            "accounts": [
                { "id": "chk", "user_id": "u1", "kind": "depository-checking", "balance": 1200.0 },
                { "id": "cc", "user_id": "u1", "kind": "credit", "balance": 3400.0, "credit_limit": 5000.0 }
            ],
            "transactions": [
                { "id": "t1", "account_id": "chk", "posted_date": "2026-03-05", "amount": 2100.0,
                  "merchant_name": "Acme Corp", "category": "Payroll" },
                { "id": "t2", "account_id": "chk", "posted_date": "2026-03-19", "amount": 2100.0,
                  "merchant_name": "Acme Corp", "category": "Payroll" },
                { "id": "t3", "account_id": "chk", "posted_date": "2026-03-10", "amount": -900.0,
                  "merchant_name": "Landlord", "category": "Rent" }
            ],
            "liabilities": [
                { "id": "l1", "account_id": "cc", "minimum_payment_only": false,
                  "is_overdue": false, "interest_charged": true, "apr": 0.2499 }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn opted_in_user_gets_recommendations_and_events() {
        let catalog = Catalog::builtin().unwrap();
        let out = evaluate_user(
            &user("opted_in"),
            TimeWindow::Days30,
            date(2026, 3, 31),
            &catalog,
            &PipelineOptions::default(),
        )
        .unwrap();
        assert_eq!(out.assignment.assigned_persona_id, "high_utilization");
        assert!(!out.recommendations.is_empty());
        assert!(out.diagnostics.is_empty());
        let names: Vec<&str> = out.events.iter().map(AuditEvent::name).collect();
        assert_eq!(names[..2], ["signal_computed", "persona_assigned"]);
        assert_eq!(
            names.iter().filter(|n| **n == "guardrail_checked").count(),
            out.guardrail_audit.len()
        );
    }

    #[test]
    fn missing_consent_yields_nothing() {
        let catalog = Catalog::builtin().unwrap();
        let out = evaluate_user(
            &user("not_recorded"),
            TimeWindow::Days30,
            date(2026, 3, 31),
            &catalog,
            &PipelineOptions::default(),
        )
        .unwrap();
        assert!(out.recommendations.is_empty());
        assert_eq!(out.guardrail_stats().withheld(), out.guardrail_audit.len() as u64);
    }

    fn tied_catalog() -> Catalog {
        let mut catalog = Catalog::builtin().unwrap();
        catalog.rank_tie_policy = RankTiePolicy::Reject;
        for def in catalog.personas.iter_mut() {
            if def.persona_id == "variable_income_budgeter" {
                def.priority_rank = 2;
                def.conditions.truncate(1);
            }
        }
        catalog
    }

    #[test]
    fn strict_mode_surfaces_invariant_violation() {
        let options = PipelineOptions {
            strictness: Strictness::Strict,
        };
        let err = evaluate_user(
            &user("opted_in"),
            TimeWindow::Days30,
            date(2026, 3, 31),
            &tied_catalog(),
            &options,
        )
        .unwrap_err();
        let violation = err.downcast_ref::<InvariantViolation>().unwrap();
        assert_eq!(violation.kind, InvariantKind::DuplicatePriorityRank);
    }

    #[test]
    fn lenient_mode_degrades_to_unclassified() {
        let out = evaluate_user(
            &user("opted_in"),
            TimeWindow::Days30,
            date(2026, 3, 31),
            &tied_catalog(),
            &PipelineOptions::default(),
        )
        .unwrap();
        assert!(out.assignment.is_unclassified());
        assert!(out.assignment.prioritization_reason.contains("duplicate_priority_rank"));
        let ids: Vec<&str> = out.recommendations.iter().map(|c| c.content_id.as_str()).collect();
        assert_eq!(ids, vec!["edu_financial_checkup", "edu_budget_basics"]);
    }

    #[test]
    fn batch_covers_every_user_and_window() {
        let catalog = Catalog::builtin().unwrap();
        let users = vec![user("opted_in"), user("opted_out")];
        let outcomes = evaluate_batch(
            &users,
            &TimeWindow::ALL,
            date(2026, 3, 31),
            &catalog,
            &PipelineOptions::default(),
        );
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
    }
}
