use crate::domain::persona::{
    Condition, ConditionOutcome, EvidenceMap, FieldRef, MatchEvidence, PersonaDefinition,
};
use crate::domain::signals::SignalSnapshot;
use std::collections::BTreeMap;

/// Evaluate every persona. Pure and total: unknown fields and missing metrics fail their condition.
pub fn evaluate(snapshot: &SignalSnapshot, definitions: &[PersonaDefinition]) -> EvidenceMap {
    definitions
        .iter()
        .map(|def| (def.persona_id.clone(), evaluate_persona(snapshot, def)))
        .collect()
}

pub fn evaluate_persona(snapshot: &SignalSnapshot, definition: &PersonaDefinition) -> MatchEvidence {
    let outcomes: Vec<ConditionOutcome> = definition
        .conditions
        .iter()
        .map(|c| evaluate_condition(snapshot, c))
        .collect();

    let mut evidence = BTreeMap::new();
    let mut matched_conditions = Vec::new();
    for outcome in &outcomes {
        if let Some(value) = &outcome.observed {
            evidence.insert(outcome.condition.field.name().to_string(), value.clone());
        }
        if outcome.matched {
            if let Some(field) = outcome.condition.field.known() {
                if !matched_conditions.contains(&field) {
                    matched_conditions.push(field);
                }
            }
        }
    }

    MatchEvidence {
        matched: !outcomes.is_empty() && outcomes.iter().all(|o| o.matched),
        evidence,
        matched_conditions,
        outcomes,
    }
}

pub fn evaluate_condition(snapshot: &SignalSnapshot, condition: &Condition) -> ConditionOutcome {
    let observed = match &condition.field {
        FieldRef::Known(field) => snapshot.value(*field),
        FieldRef::Unresolved(_) => None,
    };
    let matched = observed
        .as_ref()
        .map(|v| condition.comparison.holds(v))
        .unwrap_or(false);

    ConditionOutcome {
        condition: condition.clone(),
        observed,
        matched,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::persona::Comparison;
    use crate::domain::signals::{
        CreditSignals, IncomeSignals, SavingsSignals, SignalField, SignalValue,
        SubscriptionSignals,
    };
    use crate::time::TimeWindow;
    use chrono::NaiveDate;

    pub(crate) fn snapshot_with_utilization(utilization: f64) -> SignalSnapshot {
        SignalSnapshot {
            user_id: "u1".to_string(),
            window: TimeWindow::Days30,
            computed_at: NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
            subscriptions: SubscriptionSignals::default(),
            savings: SavingsSignals::default(),
            credit: CreditSignals {
                card_count: 1,
                aggregate_utilization: utilization,
                max_utilization: utilization,
                high_utilization_count: u32::from(utilization >= 0.5),
                ..CreditSignals::default()
            },
            income: IncomeSignals::default(),
            data_completeness: BTreeMap::new(),
            fallbacks_applied: Vec::new(),
        }
    }

    pub(crate) fn gte(field: SignalField, value: f64) -> Condition {
        Condition {
            field: FieldRef::Known(field),
            comparison: Comparison::Gte { value },
        }
    }

    pub(crate) fn persona(id: &str, rank: u32, conditions: Vec<Condition>) -> PersonaDefinition {
        PersonaDefinition {
            persona_id: id.to_string(),
            display_name: id.to_string(),
            description: String::new(),
            priority_rank: rank,
            conditions,
        }
    }

    #[test]
    fn records_partial_evidence_on_non_match() {
        let snapshot = snapshot_with_utilization(0.68);
        let def = persona(
            "p",
            1,
            vec![
                gte(SignalField::CreditAggregateUtilization, 0.6),
                gte(SignalField::SubscriptionRecurringMerchantCount, 3.0),
            ],
        );
        let ev = evaluate_persona(&snapshot, &def);
        assert!(!ev.matched);
        assert_eq!(ev.matched_conditions, vec![SignalField::CreditAggregateUtilization]);
        assert_eq!(ev.matched_count(), 1);
        assert_eq!(
            ev.evidence.get("subscriptions.recurring_merchant_count"),
            Some(&SignalValue::Number(0.0))
        );
    }

    #[test]
    fn unresolved_and_missing_fields_fail_without_error() {
        let snapshot = snapshot_with_utilization(0.9);
        let def = persona(
            "p",
            1,
            vec![
                Condition {
                    field: FieldRef::Unresolved("credit.utilisation".to_string()),
                    comparison: Comparison::Gte { value: 0.1 },
                },
                Condition {
                    field: FieldRef::Known(SignalField::IncomeMedianPayGapDays),
                    comparison: Comparison::Lte { value: 40.0 },
                },
            ],
        );
        let ev = evaluate_persona(&snapshot, &def);
        assert!(!ev.matched);
        assert!(ev.matched_conditions.is_empty());
        assert!(ev.evidence.is_empty());
        assert!(ev.outcomes.iter().all(|o| o.observed.is_none()));
    }

    #[test]
    fn all_conditions_must_hold() {
        let snapshot = snapshot_with_utilization(0.85);
        let def = persona(
            "p",
            1,
            vec![
                gte(SignalField::CreditAggregateUtilization, 0.6),
                Condition {
                    field: FieldRef::Known(SignalField::CreditAnyOverdue),
                    comparison: Comparison::Flag { value: false },
                },
            ],
        );
        let map = evaluate(&snapshot, &[def]);
        assert!(map["p"].matched);
        assert_eq!(map["p"].matched_conditions.len(), 2);
    }
}
