use crate::catalog::RankTiePolicy;
use crate::domain::persona::{
    EvidenceMap, MatchEvidence, PersonaAssignment, PersonaDefinition, UNCLASSIFIED,
};
use crate::error::{InvariantKind, InvariantViolation};
use crate::time::TimeWindow;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Outcome of ranking the qualifying personas, before it is stamped into an assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    pub winner: Option<(String, u32)>,
    pub qualifying: Vec<String>,
    pub reason: String,
    pub warnings: Vec<String>,
}

pub fn rank(
    evidence: &EvidenceMap,
    definitions: &[PersonaDefinition],
    policy: RankTiePolicy,
) -> Result<Ranking, InvariantViolation> {
    let mut qualifying: Vec<&PersonaDefinition> = definitions
        .iter()
        .filter(|d| evidence.get(&d.persona_id).is_some_and(|e| e.matched))
        .collect();

    if qualifying.is_empty() {
        return Ok(Ranking {
            winner: None,
            qualifying: Vec::new(),
            reason: closest_miss(evidence, definitions),
            warnings: Vec::new(),
        });
    }

    qualifying.sort_by(|a, b| {
        a.priority_rank
            .cmp(&b.priority_rank)
            .then_with(|| a.persona_id.cmp(&b.persona_id))
    });

    let mut warnings = Vec::new();
    for pair in qualifying.windows(2) {
        if pair[0].priority_rank != pair[1].priority_rank {
            continue;
        }
        let detail = format!(
            "personas {} and {} share priority_rank {}",
            pair[0].persona_id, pair[1].persona_id, pair[0].priority_rank
        );
        match policy {
            RankTiePolicy::Reject => {
                return Err(InvariantViolation::new(
                    InvariantKind::DuplicatePriorityRank,
                    detail,
                ));
            }
            RankTiePolicy::LexicalPersonaId => {
                warnings.push(format!("data quality: {detail}; tie broken by persona_id"));
            }
        }
    }

    let winner = qualifying[0];
    let outranked: Vec<String> = qualifying[1..]
        .iter()
        .map(|d| {
            if d.priority_rank == winner.priority_rank {
                format!(
                    "{} (priority_rank {}, tie broken by persona_id)",
                    d.persona_id, d.priority_rank
                )
            } else {
                format!("{} (priority_rank {})", d.persona_id, d.priority_rank)
            }
        })
        .collect();

    let reason = if outranked.is_empty() {
        format!(
            "{} assigned (priority_rank {}); no competing personas qualified",
            winner.persona_id, winner.priority_rank
        )
    } else {
        format!(
            "{} assigned (priority_rank {}); out-ranked: {}",
            winner.persona_id,
            winner.priority_rank,
            outranked.join(", ")
        )
    };

    Ok(Ranking {
        winner: Some((winner.persona_id.clone(), winner.priority_rank)),
        qualifying: qualifying.iter().map(|d| d.persona_id.clone()).collect(),
        reason,
        warnings,
    })
}

/// Resolve one (user, window) evaluation into an assignment. Each call yields a fresh
/// `assignment_id`; winner, priority and reason depend only on the evidence and definitions.
pub fn resolve(
    user_id: &str,
    window: TimeWindow,
    evidence: EvidenceMap,
    definitions: &[PersonaDefinition],
    policy: RankTiePolicy,
    assigned_at: DateTime<Utc>,
) -> Result<PersonaAssignment, InvariantViolation> {
    let ranking = rank(&evidence, definitions, policy)?;
    let (assigned_persona_id, priority) = match ranking.winner {
        Some((id, rank)) => (id, Some(rank)),
        None => (UNCLASSIFIED.to_string(), None),
    };

    Ok(PersonaAssignment {
        assignment_id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        window,
        assigned_persona_id,
        priority,
        all_qualifying_persona_ids: ranking.qualifying,
        match_evidence: evidence,
        prioritization_reason: ranking.reason,
        warnings: ranking.warnings,
        assigned_at,
    })
}

/// Safe outcome used when ranking hit an invariant violation in a lenient run.
pub fn unclassified_after_violation(
    user_id: &str,
    window: TimeWindow,
    evidence: EvidenceMap,
    violation: &InvariantViolation,
    assigned_at: DateTime<Utc>,
) -> PersonaAssignment {
    PersonaAssignment {
        assignment_id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        window,
        assigned_persona_id: UNCLASSIFIED.to_string(),
        priority: None,
        all_qualifying_persona_ids: Vec::new(),
        match_evidence: evidence,
        prioritization_reason: format!("unclassified after {violation}"),
        warnings: vec![violation.to_string()],
        assigned_at,
    }
}

/// Best-effort diagnostic naming the persona that came closest to matching.
fn closest_miss(evidence: &EvidenceMap, definitions: &[PersonaDefinition]) -> String {
    let closest = definitions
        .iter()
        .filter_map(|d| evidence.get(&d.persona_id).map(|e| (d, e)))
        .filter(|(_, e)| !e.outcomes.is_empty())
        .max_by(|(da, ea), (db, eb)| {
            match_fraction(ea)
                .total_cmp(&match_fraction(eb))
                // Prefer the higher-precedence persona on equal fractions.
                .then_with(|| db.priority_rank.cmp(&da.priority_rank))
                .then_with(|| db.persona_id.cmp(&da.persona_id))
        });

    let Some((def, ev)) = closest else {
        return "no persona matched; no persona rules were evaluated".to_string();
    };

    let unmet: Vec<String> = ev
        .outcomes
        .iter()
        .filter(|o| !o.matched)
        .map(|o| match &o.observed {
            Some(v) => format!("{} (observed {v})", o.condition),
            None => format!("{} (observed missing)", o.condition),
        })
        .collect();

    format!(
        "no persona matched; closest: {} ({}/{} conditions met; unmet: {})",
        def.persona_id,
        ev.matched_count(),
        ev.outcomes.len(),
        unmet.join("; ")
    )
}

fn match_fraction(ev: &MatchEvidence) -> f64 {
    ev.matched_count() as f64 / ev.outcomes.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signals::SignalField;
    use crate::persona::evaluator::tests::{gte, persona, snapshot_with_utilization};
    use crate::persona::evaluate;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 6, 0, 0).unwrap()
    }

    fn definitions() -> Vec<PersonaDefinition> {
        vec![
            persona("savings_builder", 5, vec![gte(SignalField::SavingsGrowthRate, 0.02)]),
            persona(
                "high_utilization",
                2,
                vec![gte(SignalField::CreditAggregateUtilization, 0.6)],
            ),
            persona("card_heavy", 3, vec![gte(SignalField::CreditMaxUtilization, 0.5)]),
        ]
    }

    #[test]
    fn lowest_rank_wins_regardless_of_definition_order() {
        let snapshot = snapshot_with_utilization(0.68);
        let mut defs = definitions();
        let forward = evaluate(&snapshot, &defs);
        let a = resolve("u1", TimeWindow::Days30, forward, &defs, RankTiePolicy::Reject, at()).unwrap();

        defs.reverse();
        let backward = evaluate(&snapshot, &defs);
        let b = resolve("u1", TimeWindow::Days30, backward, &defs, RankTiePolicy::Reject, at()).unwrap();

        assert_eq!(a.assigned_persona_id, "high_utilization");
        assert_eq!(a.priority, Some(2));
        assert_eq!(a.all_qualifying_persona_ids, vec!["high_utilization", "card_heavy"]);
        assert_eq!(a.assigned_persona_id, b.assigned_persona_id);
        assert_eq!(a.prioritization_reason, b.prioritization_reason);
        assert_eq!(
            a.prioritization_reason,
            "high_utilization assigned (priority_rank 2); out-ranked: card_heavy (priority_rank 3)"
        );
    }

    #[test]
    fn resolution_is_idempotent() {
        let snapshot = snapshot_with_utilization(0.68);
        let defs = definitions();
        let evidence = evaluate(&snapshot, &defs);
        let first = rank(&evidence, &defs, RankTiePolicy::LexicalPersonaId).unwrap();
        let second = rank(&evidence, &defs, RankTiePolicy::LexicalPersonaId).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn no_match_is_unclassified_with_closest_diagnostic() {
        let snapshot = snapshot_with_utilization(0.42);
        let defs = definitions();
        let evidence = evaluate(&snapshot, &defs);
        let a = resolve("u1", TimeWindow::Days30, evidence, &defs, RankTiePolicy::Reject, at()).unwrap();
        assert!(a.is_unclassified());
        assert_eq!(a.priority, None);
        assert!(a.all_qualifying_persona_ids.is_empty());
        assert_eq!(
            a.prioritization_reason,
            "no persona matched; closest: high_utilization (0/1 conditions met; unmet: \
             credit.aggregate_utilization >= 0.6 (observed 0.42))"
        );
    }

    #[test]
    fn equal_ranks_break_by_persona_id_with_warning() {
        let snapshot = snapshot_with_utilization(0.9);
        let defs = vec![
            persona("zeta", 1, vec![gte(SignalField::CreditAggregateUtilization, 0.6)]),
            persona("alpha", 1, vec![gte(SignalField::CreditMaxUtilization, 0.6)]),
        ];
        let evidence = evaluate(&snapshot, &defs);
        let ranking = rank(&evidence, &defs, RankTiePolicy::LexicalPersonaId).unwrap();
        assert_eq!(ranking.winner, Some(("alpha".to_string(), 1)));
        assert_eq!(ranking.warnings.len(), 1);
        assert!(ranking.reason.contains("zeta (priority_rank 1, tie broken by persona_id)"));
    }

    #[test]
    fn equal_ranks_are_rejected_when_policy_says_so() {
        let snapshot = snapshot_with_utilization(0.9);
        let defs = vec![
            persona("zeta", 1, vec![gte(SignalField::CreditAggregateUtilization, 0.6)]),
            persona("alpha", 1, vec![gte(SignalField::CreditMaxUtilization, 0.6)]),
        ];
        let evidence = evaluate(&snapshot, &defs);
        let err = rank(&evidence, &defs, RankTiePolicy::Reject).unwrap_err();
        assert_eq!(err.kind, InvariantKind::DuplicatePriorityRank);

        let fallback = unclassified_after_violation("u1", TimeWindow::Days30, evidence, &err, at());
        assert!(fallback.is_unclassified());
        assert_eq!(fallback.warnings.len(), 1);
    }
}
