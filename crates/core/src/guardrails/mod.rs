//! Ordered guardrail chain.
//!
//! Each check sees the candidate as left by the previous checks and returns a `Verdict`. The
//! chain stops at the first `Drop`; the remaining checks are recorded as `not_evaluated`. A
//! `Rewrite` is recorded as failed but the corrected candidate keeps going.

mod consent;
mod disclaimer;
mod eligibility;
mod tone;

pub use consent::ConsentCheck;
pub use disclaimer::DisclaimerCheck;
pub use eligibility::EligibilityCheck;
pub use tone::{find_violations, ToneCheck, ToneViolation};

use crate::catalog::Catalog;
use crate::domain::persona::PersonaAssignment;
use crate::domain::records::{AccountKind, ConsentState};
use crate::domain::recommendation::{CheckRecord, CheckStatus, ItemType, RecommendationCandidate};
use crate::domain::signals::SignalSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Everything a check may consult. Read-only for the duration of one user's evaluation.
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    pub user_id: &'a str,
    pub consent: ConsentState,
    pub assignment: &'a PersonaAssignment,
    pub snapshot: &'a SignalSnapshot,
    pub held_accounts: &'a BTreeSet<AccountKind>,
    pub catalog: &'a Catalog,
}

impl GuardContext<'_> {
    pub fn persona_display_name(&self) -> &str {
        self.catalog
            .persona(&self.assignment.assigned_persona_id)
            .map(|p| p.display_name.as_str())
            .unwrap_or("your profile")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
    ReplaceRationale(String),
    AppendDisclaimer(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass { note: Option<String> },
    Annotate { annotation: Annotation, note: String },
    /// The candidate broke the check and was corrected; it still surfaces.
    Rewrite { annotation: Annotation, reason: String },
    Drop { reason: String },
}

pub trait Guardrail: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, candidate: &RecommendationCandidate, ctx: &GuardContext<'_>) -> Verdict;
}

/// The standard order: consent, eligibility, tone, disclaimer.
pub fn default_guardrails() -> Vec<Box<dyn Guardrail>> {
    vec![
        Box::new(ConsentCheck),
        Box::new(EligibilityCheck),
        Box::new(ToneCheck),
        Box::new(DisclaimerCheck),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailAuditEntry {
    pub user_id: String,
    pub content_id: String,
    pub item_type: ItemType,
    pub surfaced: bool,
    pub checks: Vec<CheckRecord>,
}

#[derive(Debug, Clone)]
pub struct GuardrailOutcome {
    pub candidate: RecommendationCandidate,
    pub dropped_by: Option<&'static str>,
}

impl GuardrailOutcome {
    pub fn surfaced(&self) -> bool {
        self.dropped_by.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Screened {
    pub surfaced: Vec<RecommendationCandidate>,
    pub audit: Vec<GuardrailAuditEntry>,
}

pub struct GuardrailChain {
    checks: Vec<Box<dyn Guardrail>>,
}

impl Default for GuardrailChain {
    fn default() -> Self {
        Self::new(default_guardrails())
    }
}

impl GuardrailChain {
    pub fn new(checks: Vec<Box<dyn Guardrail>>) -> Self {
        Self { checks }
    }

    pub fn check_names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    pub fn apply(
        &self,
        mut candidate: RecommendationCandidate,
        ctx: &GuardContext<'_>,
    ) -> GuardrailOutcome {
        let mut records = Vec::with_capacity(self.checks.len());
        let mut dropped_by = None;

        for check in &self.checks {
            let name = check.name();
            if dropped_by.is_some() {
                records.push(record(name, CheckStatus::NotEvaluated, None));
                continue;
            }

            match check.evaluate(&candidate, ctx) {
                Verdict::Pass { note } => records.push(record(name, CheckStatus::Passed, note)),
                Verdict::Annotate { annotation, note } => {
                    annotate(&mut candidate, annotation);
                    records.push(record(name, CheckStatus::Passed, Some(note)));
                }
                Verdict::Rewrite { annotation, reason } => {
                    tracing::debug!(
                        user_id = ctx.user_id,
                        content_id = %candidate.content_id,
                        check = name,
                        %reason,
                        "candidate rewritten by guardrail"
                    );
                    annotate(&mut candidate, annotation);
                    records.push(record(name, CheckStatus::Failed, Some(reason)));
                }
                Verdict::Drop { reason } => {
                    tracing::debug!(
                        user_id = ctx.user_id,
                        content_id = %candidate.content_id,
                        check = name,
                        %reason,
                        "candidate dropped by guardrail"
                    );
                    records.push(record(name, CheckStatus::Failed, Some(reason)));
                    dropped_by = Some(name);
                }
            }
        }

        candidate.guardrail_results = records;
        GuardrailOutcome {
            candidate,
            dropped_by,
        }
    }

    /// Screen a candidate list, keeping catalog order for survivors and an audit entry for all.
    pub fn apply_all(
        &self,
        candidates: Vec<RecommendationCandidate>,
        ctx: &GuardContext<'_>,
    ) -> Screened {
        let mut screened = Screened::default();
        for candidate in candidates {
            let outcome = self.apply(candidate, ctx);
            screened.audit.push(GuardrailAuditEntry {
                user_id: ctx.user_id.to_string(),
                content_id: outcome.candidate.content_id.clone(),
                item_type: outcome.candidate.item_type,
                surfaced: outcome.surfaced(),
                checks: outcome.candidate.guardrail_results.clone(),
            });
            if outcome.surfaced() {
                screened.surfaced.push(outcome.candidate);
            }
        }
        screened
    }
}

fn record(name: &str, status: CheckStatus, reason: Option<String>) -> CheckRecord {
    CheckRecord {
        check_name: name.to_string(),
        status,
        reason,
    }
}

fn annotate(candidate: &mut RecommendationCandidate, annotation: Annotation) {
    match annotation {
        Annotation::ReplaceRationale(text) => candidate.rationale = text,
        Annotation::AppendDisclaimer(text) => {
            if !candidate.rationale.contains(&text) {
                candidate.rationale.push_str("\n\n");
                candidate.rationale.push_str(&text);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::RankTiePolicy;
    use crate::persona::evaluator::tests::snapshot_with_utilization;
    use crate::persona::{evaluate, resolve};
    use crate::recommend::assemble;
    use crate::time::TimeWindow;
    use chrono::Utc;

    pub(crate) struct Fixture {
        pub catalog: Catalog,
        pub snapshot: SignalSnapshot,
        pub assignment: PersonaAssignment,
        pub held: BTreeSet<AccountKind>,
    }

    impl Fixture {
        pub fn high_utilization() -> Self {
            let catalog = Catalog::builtin().unwrap();
            let snapshot = snapshot_with_utilization(0.68);
            let evidence = evaluate(&snapshot, &catalog.personas);
            let assignment = resolve(
                "u1",
                TimeWindow::Days30,
                evidence,
                &catalog.personas,
                RankTiePolicy::LexicalPersonaId,
                Utc::now(),
            )
            .unwrap();
            Self {
                catalog,
                snapshot,
                assignment,
                held: BTreeSet::from([AccountKind::Checking, AccountKind::Credit]),
            }
        }

        pub fn ctx(&self, consent: ConsentState) -> GuardContext<'_> {
            GuardContext {
                user_id: "u1",
                consent,
                assignment: &self.assignment,
                snapshot: &self.snapshot,
                held_accounts: &self.held,
                catalog: &self.catalog,
            }
        }

        pub fn candidate(&self, content_id: &str) -> RecommendationCandidate {
            assemble(&self.assignment, &self.catalog)
                .candidates
                .into_iter()
                .find(|c| c.content_id == content_id)
                .unwrap()
        }
    }

    #[test]
    fn consent_failure_short_circuits_remaining_checks() {
        let fx = Fixture::high_utilization();
        let chain = GuardrailChain::default();
        let outcome = chain.apply(fx.candidate("offer_balance_transfer"), &fx.ctx(ConsentState::OptedOut));
        assert_eq!(outcome.dropped_by, Some("consent"));
        let statuses: Vec<CheckStatus> = outcome
            .candidate
            .guardrail_results
            .iter()
            .map(|r| r.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                CheckStatus::Failed,
                CheckStatus::NotEvaluated,
                CheckStatus::NotEvaluated,
                CheckStatus::NotEvaluated
            ]
        );
    }

    #[test]
    fn eligible_offer_survives_with_disclaimer() {
        let fx = Fixture::high_utilization();
        let chain = GuardrailChain::default();
        let outcome = chain.apply(fx.candidate("offer_balance_transfer"), &fx.ctx(ConsentState::OptedIn));
        assert!(outcome.surfaced());
        assert!(outcome.candidate.rationale.ends_with(&fx.catalog.disclaimer));
        assert!(outcome.candidate.guardrail_results.iter().all(|r| r.passed()));
        assert_eq!(
            chain.check_names(),
            vec!["consent", "eligibility", "tone", "disclaimer"]
        );
    }

    #[test]
    fn savings_offer_is_dropped_without_savings_account() {
        let fx = Fixture::high_utilization();
        let chain = GuardrailChain::default();
        let screened = chain.apply_all(
            assemble(&fx.assignment, &fx.catalog).candidates,
            &fx.ctx(ConsentState::OptedIn),
        );
        let ids: Vec<&str> = screened.surfaced.iter().map(|c| c.content_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["edu_credit_utilization", "edu_autopay_basics", "offer_balance_transfer"]
        );
        let dropped = screened
            .audit
            .iter()
            .find(|e| e.content_id == "offer_high_yield_savings")
            .unwrap();
        assert!(!dropped.surfaced);
        assert_eq!(
            dropped.checks[1].reason.as_deref(),
            Some("missing_required_account:depository-savings")
        );
        assert_eq!(dropped.checks[3].status, CheckStatus::NotEvaluated);
        assert_eq!(screened.audit.len(), 4);
    }

    #[test]
    fn disclaimer_is_not_appended_twice() {
        let fx = Fixture::high_utilization();
        let chain = GuardrailChain::default();
        let ctx = fx.ctx(ConsentState::OptedIn);
        let once = chain.apply(fx.candidate("offer_balance_transfer"), &ctx);
        let twice = chain.apply(once.candidate.clone(), &ctx);
        assert_eq!(once.candidate.rationale, twice.candidate.rationale);
        assert_eq!(
            twice.candidate.guardrail_results[3].reason.as_deref(),
            Some("disclaimer_present")
        );
    }
}
