use crate::domain::signals::{SignalField, SignalValue};
use crate::time::TimeWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub const UNCLASSIFIED: &str = "unclassified";

/// Closed set of comparisons a persona condition can apply to a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Comparison {
    Gte { value: f64 },
    Lte { value: f64 },
    Eq { value: SignalValue },
    Flag { value: bool },
}

impl Comparison {
    pub fn holds(&self, observed: &SignalValue) -> bool {
        match (self, observed) {
            (Comparison::Gte { value }, SignalValue::Number(n)) => n >= value,
            (Comparison::Lte { value }, SignalValue::Number(n)) => n <= value,
            (Comparison::Flag { value }, SignalValue::Flag(b)) => b == value,
            (Comparison::Eq { value }, observed) => match (value, observed) {
                (SignalValue::Number(a), SignalValue::Number(b)) => (a - b).abs() < f64::EPSILON,
                (a, b) => a == b,
            },
            _ => false,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Comparison::Gte { .. } => ">=",
            Comparison::Lte { .. } => "<=",
            Comparison::Eq { .. } | Comparison::Flag { .. } => "==",
        }
    }
}

/// A condition's target. Unresolved names survive only in lenient catalogs and never match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldRef {
    Known(SignalField),
    Unresolved(String),
}

impl FieldRef {
    pub fn name(&self) -> &str {
        match self {
            FieldRef::Known(f) => f.name(),
            FieldRef::Unresolved(s) => s,
        }
    }

    pub fn known(&self) -> Option<SignalField> {
        match self {
            FieldRef::Known(f) => Some(*f),
            FieldRef::Unresolved(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: FieldRef,
    #[serde(flatten)]
    pub comparison: Comparison,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let threshold = match &self.comparison {
            Comparison::Gte { value } | Comparison::Lte { value } => value.to_string(),
            Comparison::Eq { value } => value.to_string(),
            Comparison::Flag { value } => value.to_string(),
        };
        write!(
            f,
            "{} {} {}",
            self.field.name(),
            self.comparison.symbol(),
            threshold
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaDefinition {
    pub persona_id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    /// Lower wins.
    pub priority_rank: u32,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionOutcome {
    pub condition: Condition,
    pub observed: Option<SignalValue>,
    pub matched: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvidence {
    pub matched: bool,
    /// Observed value for every field the persona's conditions touched.
    pub evidence: BTreeMap<String, SignalValue>,
    pub matched_conditions: Vec<SignalField>,
    pub outcomes: Vec<ConditionOutcome>,
}

impl MatchEvidence {
    pub fn matched_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.matched).count()
    }
}

pub type EvidenceMap = BTreeMap<String, MatchEvidence>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaAssignment {
    pub assignment_id: Uuid,
    pub user_id: String,
    pub window: TimeWindow,
    pub assigned_persona_id: String,
    pub priority: Option<u32>,
    pub all_qualifying_persona_ids: Vec<String>,
    pub match_evidence: EvidenceMap,
    pub prioritization_reason: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub assigned_at: DateTime<Utc>,
}

impl PersonaAssignment {
    pub fn is_unclassified(&self) -> bool {
        self.assigned_persona_id == UNCLASSIFIED
    }

    pub fn winning_evidence(&self) -> Option<&MatchEvidence> {
        if self.is_unclassified() {
            return None;
        }
        self.match_evidence.get(&self.assigned_persona_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_tagged_conditions() {
        let v = json!([
            {"field": "credit.aggregate_utilization", "op": "gte", "value": 0.6},
            {"field": "credit.any_overdue", "op": "flag", "value": true},
            {"field": "income.payment_frequency", "op": "eq", "value": "irregular"},
            {"field": "credit.utilisation", "op": "lte", "value": 0.3}
        ]);
        let conditions: Vec<Condition> = serde_json::from_value(v).unwrap();
        assert_eq!(
            conditions[0].field,
            FieldRef::Known(SignalField::CreditAggregateUtilization)
        );
        assert_eq!(conditions[1].comparison, Comparison::Flag { value: true });
        assert_eq!(
            conditions[2].comparison,
            Comparison::Eq {
                value: SignalValue::Label("irregular".to_string())
            }
        );
        assert_eq!(
            conditions[3].field,
            FieldRef::Unresolved("credit.utilisation".to_string())
        );
    }

    #[test]
    fn comparison_rejects_mismatched_kinds() {
        let gte = Comparison::Gte { value: 0.5 };
        assert!(gte.holds(&SignalValue::Number(0.5)));
        assert!(!gte.holds(&SignalValue::Flag(true)));
        assert!(!Comparison::Flag { value: true }.holds(&SignalValue::Number(1.0)));
    }

    #[test]
    fn condition_display_is_compact() {
        let c = Condition {
            field: FieldRef::Known(SignalField::CreditAggregateUtilization),
            comparison: Comparison::Gte { value: 0.6 },
        };
        assert_eq!(c.to_string(), "credit.aggregate_utilization >= 0.6");
    }
}
