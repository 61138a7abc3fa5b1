//! Audit trail emitted by a pipeline run. Plain data; persistence is the caller's concern.

use crate::domain::persona::PersonaAssignment;
use crate::domain::recommendation::CheckStatus;
use crate::domain::signals::{SignalGroup, SignalSnapshot};
use crate::guardrails::GuardrailAuditEntry;
use crate::recommend::AssemblyDiagnostic;
use crate::time::TimeWindow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    SignalComputed {
        user_id: String,
        window: TimeWindow,
        computed_at: NaiveDate,
        data_completeness: BTreeMap<SignalGroup, bool>,
        fallbacks_applied: Vec<String>,
    },
    PersonaAssigned {
        user_id: String,
        window: TimeWindow,
        assignment_id: Uuid,
        persona_id: String,
        priority: Option<u32>,
        qualifying: Vec<String>,
        reason: String,
    },
    GuardrailChecked {
        user_id: String,
        window: TimeWindow,
        content_id: String,
        surfaced: bool,
        failed_check: Option<String>,
        reason: Option<String>,
    },
    CatalogLookupFailed {
        user_id: String,
        window: TimeWindow,
        persona_id: String,
        code: String,
        detail: String,
    },
}

impl AuditEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuditEvent::SignalComputed { .. } => "signal_computed",
            AuditEvent::PersonaAssigned { .. } => "persona_assigned",
            AuditEvent::GuardrailChecked { .. } => "guardrail_checked",
            AuditEvent::CatalogLookupFailed { .. } => "catalog_lookup_failed",
        }
    }

    pub fn signal_computed(snapshot: &SignalSnapshot) -> Self {
        AuditEvent::SignalComputed {
            user_id: snapshot.user_id.clone(),
            window: snapshot.window,
            computed_at: snapshot.computed_at,
            data_completeness: snapshot.data_completeness.clone(),
            fallbacks_applied: snapshot.fallbacks_applied.clone(),
        }
    }

    pub fn persona_assigned(assignment: &PersonaAssignment) -> Self {
        AuditEvent::PersonaAssigned {
            user_id: assignment.user_id.clone(),
            window: assignment.window,
            assignment_id: assignment.assignment_id,
            persona_id: assignment.assigned_persona_id.clone(),
            priority: assignment.priority,
            qualifying: assignment.all_qualifying_persona_ids.clone(),
            reason: assignment.prioritization_reason.clone(),
        }
    }

    pub fn guardrail_checked(window: TimeWindow, entry: &GuardrailAuditEntry) -> Self {
        let failed = entry
            .checks
            .iter()
            .find(|c| c.status == CheckStatus::Failed);
        AuditEvent::GuardrailChecked {
            user_id: entry.user_id.clone(),
            window,
            content_id: entry.content_id.clone(),
            surfaced: entry.surfaced,
            failed_check: failed.map(|c| c.check_name.clone()),
            reason: failed.and_then(|c| c.reason.clone()),
        }
    }

    pub fn catalog_lookup_failed(
        assignment: &PersonaAssignment,
        diagnostic: &AssemblyDiagnostic,
    ) -> Self {
        AuditEvent::CatalogLookupFailed {
            user_id: assignment.user_id.clone(),
            window: assignment.window,
            persona_id: assignment.assigned_persona_id.clone(),
            code: diagnostic.code.clone(),
            detail: diagnostic.detail.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTally {
    pub passed: u64,
    pub failed: u64,
    pub not_evaluated: u64,
}

/// Per-check pass/fail counts, aggregated from audit entries without re-running anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailStats {
    pub candidates: u64,
    pub surfaced: u64,
    pub by_check: BTreeMap<String, CheckTally>,
    /// Failure reasons keyed by `check:reason`.
    pub failure_reasons: BTreeMap<String, u64>,
}

impl GuardrailStats {
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a GuardrailAuditEntry>,
    {
        let mut stats = Self::default();
        for entry in entries {
            stats.record(entry);
        }
        stats
    }

    pub fn record(&mut self, entry: &GuardrailAuditEntry) {
        self.candidates += 1;
        if entry.surfaced {
            self.surfaced += 1;
        }
        for check in &entry.checks {
            let tally = self.by_check.entry(check.check_name.clone()).or_default();
            match check.status {
                CheckStatus::Passed => tally.passed += 1,
                CheckStatus::Failed => {
                    tally.failed += 1;
                    let reason = check.reason.as_deref().unwrap_or("unspecified");
                    *self
                        .failure_reasons
                        .entry(format!("{}:{reason}", check.check_name))
                        .or_default() += 1;
                }
                CheckStatus::NotEvaluated => tally.not_evaluated += 1,
            }
        }
    }

    pub fn merge(&mut self, other: &GuardrailStats) {
        self.candidates += other.candidates;
        self.surfaced += other.surfaced;
        for (name, tally) in &other.by_check {
            let mine = self.by_check.entry(name.clone()).or_default();
            mine.passed += tally.passed;
            mine.failed += tally.failed;
            mine.not_evaluated += tally.not_evaluated;
        }
        for (reason, count) in &other.failure_reasons {
            *self.failure_reasons.entry(reason.clone()).or_default() += count;
        }
    }

    pub fn withheld(&self) -> u64 {
        self.candidates - self.surfaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::recommendation::{CheckRecord, ItemType};
    use serde_json::json;

    fn entry(content_id: &str, statuses: [(CheckStatus, Option<&str>); 2]) -> GuardrailAuditEntry {
        let names = ["consent", "eligibility"];
        GuardrailAuditEntry {
            user_id: "u1".to_string(),
            content_id: content_id.to_string(),
            item_type: ItemType::PartnerOffer,
            surfaced: statuses.iter().all(|(s, _)| *s != CheckStatus::Failed),
            checks: names
                .iter()
                .zip(statuses)
                .map(|(name, (status, reason))| CheckRecord {
                    check_name: name.to_string(),
                    status,
                    reason: reason.map(str::to_string),
                })
                .collect(),
        }
    }

    #[test]
    fn tallies_checks_and_reasons() {
        let entries = vec![
            entry("a", [(CheckStatus::Passed, None), (CheckStatus::Passed, Some("eligible"))]),
            entry(
                "b",
                [
                    (CheckStatus::Passed, None),
                    (CheckStatus::Failed, Some("no_eligibility_rule")),
                ],
            ),
            entry(
                "c",
                [
                    (CheckStatus::Failed, Some("consent_opted_out")),
                    (CheckStatus::NotEvaluated, None),
                ],
            ),
        ];
        let stats = GuardrailStats::from_entries(&entries);
        assert_eq!(stats.candidates, 3);
        assert_eq!(stats.surfaced, 1);
        assert_eq!(stats.withheld(), 2);
        assert_eq!(
            stats.by_check["eligibility"],
            CheckTally {
                passed: 1,
                failed: 1,
                not_evaluated: 1
            }
        );
        assert_eq!(stats.failure_reasons["consent:consent_opted_out"], 1);

        let mut doubled = stats.clone();
        doubled.merge(&stats);
        assert_eq!(doubled.by_check["consent"].passed, 4);
    }

    #[test]
    fn events_serialize_with_event_tag() {
        let event = AuditEvent::CatalogLookupFailed {
            user_id: "u1".to_string(),
            window: TimeWindow::Days30,
            persona_id: "high_utilization".to_string(),
            code: "catalog_lookup_failed".to_string(),
            detail: "no content".to_string(),
        };
        assert_eq!(event.name(), "catalog_lookup_failed");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "catalog_lookup_failed",
                "user_id": "u1",
                "window": "30d",
                "persona_id": "high_utilization",
                "code": "catalog_lookup_failed",
                "detail": "no content"
            })
        );
    }
}
