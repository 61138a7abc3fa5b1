//! Candidate assembly: persona → catalog content, with citations back to matched evidence.

use crate::catalog::{Catalog, ContentItem};
use crate::domain::persona::{Comparison, ConditionOutcome, PersonaAssignment};
use crate::domain::recommendation::{Citation, RecommendationCandidate};
use crate::domain::signals::SignalValue;
use serde::{Deserialize, Serialize};

/// Stands in for `{citations}`, so it must read as a clause after "because".
const NO_CITATIONS: &str = "it relates to your recent account activity";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyDiagnostic {
    pub code: String,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct Assembly {
    pub candidates: Vec<RecommendationCandidate>,
    pub diagnostic: Option<AssemblyDiagnostic>,
}

pub fn assemble(assignment: &PersonaAssignment, catalog: &Catalog) -> Assembly {
    if assignment.is_unclassified() {
        let items = catalog.generic_content();
        if items.is_empty() {
            return empty(
                "no_generic_content",
                "assignment is unclassified and the catalog has no generic content".to_string(),
            );
        }
        let candidates = items
            .into_iter()
            .map(|item| build_candidate(item, "your profile", &[]))
            .collect();
        return Assembly {
            candidates,
            diagnostic: None,
        };
    }

    let persona_id = assignment.assigned_persona_id.as_str();
    let Some(persona) = catalog.persona(persona_id) else {
        return empty(
            "catalog_lookup_failed",
            format!("persona {persona_id} is not defined in catalog {}", catalog.version),
        );
    };

    let items = catalog.content_for_persona(persona_id);
    if items.is_empty() {
        tracing::warn!(
            user_id = %assignment.user_id,
            persona = persona_id,
            catalog_version = %catalog.version,
            "no content bound to assigned persona"
        );
        return empty(
            "catalog_lookup_failed",
            format!("no content bound to persona {persona_id} in catalog {}", catalog.version),
        );
    }

    let citations = cite_matched_conditions(assignment);
    let candidates = items
        .into_iter()
        .map(|item| build_candidate(item, &persona.display_name, &citations))
        .collect();

    Assembly {
        candidates,
        diagnostic: None,
    }
}

fn empty(code: &str, detail: String) -> Assembly {
    Assembly {
        candidates: Vec::new(),
        diagnostic: Some(AssemblyDiagnostic {
            code: code.to_string(),
            detail,
        }),
    }
}

/// One citation per matched condition of the winning persona.
pub fn cite_matched_conditions(assignment: &PersonaAssignment) -> Vec<Citation> {
    let Some(evidence) = assignment.winning_evidence() else {
        return Vec::new();
    };

    evidence
        .outcomes
        .iter()
        .filter(|o| o.matched)
        .filter_map(|o| {
            let field = o.condition.field.known()?;
            Some(Citation {
                field,
                text: citation_text(o)?,
            })
        })
        .collect()
}

pub fn citation_text(outcome: &ConditionOutcome) -> Option<String> {
    let field = outcome.condition.field.known()?;
    let observed = outcome.observed.as_ref()?;
    let unit = field.unit();
    let label = field.label();

    let text = match (&outcome.condition.comparison, observed) {
        (Comparison::Gte { value }, SignalValue::Number(v)) => {
            threshold_text(label, unit.format(*v), unit.format(*value), "exceeds")
        }
        (Comparison::Lte { value }, SignalValue::Number(v)) => {
            threshold_text(label, unit.format(*v), unit.format(*value), "is below")
        }
        (Comparison::Flag { value: true }, SignalValue::Flag(_)) => format!("{label} on record"),
        (Comparison::Flag { value: false }, SignalValue::Flag(_)) => format!("no {label} on record"),
        (Comparison::Eq { .. }, SignalValue::Number(v)) => format!("{label} is {}", unit.format(*v)),
        (Comparison::Eq { .. }, v) => format!("{label} is {v}"),
        _ => return None,
    };
    Some(text)
}

/// The verb follows the printed values, so a reading that rounds to the threshold "meets" it.
fn threshold_text(label: &str, observed: String, threshold: String, beyond: &str) -> String {
    let verb = if observed == threshold { "meets" } else { beyond };
    format!("{label} {observed} {verb} {threshold} threshold")
}

fn build_candidate(
    item: &ContentItem,
    persona_name: &str,
    citations: &[Citation],
) -> RecommendationCandidate {
    let relevant: Vec<Citation> = citations
        .iter()
        .filter(|c| item.topics.contains(&c.field.group()))
        .cloned()
        .collect();

    RecommendationCandidate {
        item_type: item.item_type,
        content_id: item.content_id.clone(),
        title: item.title.clone(),
        description: item.description.clone(),
        rationale: render_rationale(&item.rationale_template, persona_name, &relevant),
        signal_citations: relevant,
        guardrail_results: Vec::new(),
    }
}

/// Fill `{persona}` and `{citations}` placeholders.
pub fn render_rationale(template: &str, persona_name: &str, citations: &[Citation]) -> String {
    let cited = if citations.is_empty() {
        NO_CITATIONS.to_string()
    } else {
        citations
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    };
    template
        .replace("{persona}", persona_name)
        .replace("{citations}", &cited)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RankTiePolicy;
    use crate::domain::persona::{Condition, FieldRef};
    use crate::domain::recommendation::ItemType;
    use crate::domain::signals::SignalField;
    use crate::persona::evaluator::tests::snapshot_with_utilization;
    use crate::persona::{evaluate, resolve};
    use crate::time::TimeWindow;
    use chrono::Utc;

    fn assignment_for(utilization: f64, catalog: &Catalog) -> PersonaAssignment {
        let snapshot = snapshot_with_utilization(utilization);
        let evidence = evaluate(&snapshot, &catalog.personas);
        resolve(
            "u1",
            TimeWindow::Days30,
            evidence,
            &catalog.personas,
            RankTiePolicy::LexicalPersonaId,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn cites_utilization_for_high_utilization_persona() {
        let catalog = Catalog::builtin().unwrap();
        let assignment = assignment_for(0.68, &catalog);
        assert_eq!(assignment.assigned_persona_id, "high_utilization");

        let assembly = assemble(&assignment, &catalog);
        assert!(assembly.diagnostic.is_none());
        let first = &assembly.candidates[0];
        assert_eq!(first.content_id, "edu_credit_utilization");
        assert_eq!(
            first.signal_citations[0].text,
            "credit utilization 68% exceeds 60% threshold"
        );
        assert_eq!(
            first.rationale,
            "We are sharing this because credit utilization 68% exceeds 60% threshold."
        );
    }

    #[test]
    fn citations_are_filtered_by_topic() {
        let catalog = Catalog::builtin().unwrap();
        let assignment = assignment_for(0.68, &catalog);
        let assembly = assemble(&assignment, &catalog);
        let savings_offer = assembly
            .candidates
            .iter()
            .find(|c| c.content_id == "offer_high_yield_savings")
            .unwrap();
        assert_eq!(savings_offer.item_type, ItemType::PartnerOffer);
        assert!(savings_offer.signal_citations.is_empty());
        assert_eq!(savings_offer.rationale, "Offered because it relates to your recent account activity.");
    }

    #[test]
    fn unclassified_gets_generic_content() {
        let catalog = Catalog::builtin().unwrap();
        let assignment = assignment_for(0.1, &catalog);
        assert!(assignment.is_unclassified());
        let assembly = assemble(&assignment, &catalog);
        let ids: Vec<&str> = assembly.candidates.iter().map(|c| c.content_id.as_str()).collect();
        assert_eq!(ids, vec!["edu_financial_checkup", "edu_budget_basics"]);
        assert!(assembly.candidates.iter().all(|c| c.signal_citations.is_empty()));
    }

    #[test]
    fn persona_without_content_yields_diagnostic() {
        let mut catalog = Catalog::builtin().unwrap();
        for item in catalog.content.values_mut() {
            item.personas.retain(|p| p != "high_utilization");
        }
        let assignment = assignment_for(0.68, &catalog);
        let assembly = assemble(&assignment, &catalog);
        assert!(assembly.candidates.is_empty());
        assert_eq!(assembly.diagnostic.unwrap().code, "catalog_lookup_failed");
    }

    #[test]
    fn renders_lte_flag_and_eq_citations() {
        let outcome = |field, comparison, observed| ConditionOutcome {
            condition: Condition {
                field: FieldRef::Known(field),
                comparison,
            },
            observed: Some(observed),
            matched: true,
        };
        assert_eq!(
            citation_text(&outcome(
                SignalField::CreditAggregateUtilization,
                Comparison::Lte { value: 0.3 },
                SignalValue::Number(0.12)
            ))
            .unwrap(),
            "credit utilization 12% is below 30% threshold"
        );
        assert_eq!(
            citation_text(&outcome(
                SignalField::CreditAnyOverdue,
                Comparison::Flag { value: true },
                SignalValue::Flag(true)
            ))
            .unwrap(),
            "overdue credit payment on record"
        );
        assert_eq!(
            citation_text(&outcome(
                SignalField::IncomePaymentFrequency,
                Comparison::Eq {
                    value: SignalValue::Label("irregular".to_string())
                },
                SignalValue::Label("irregular".to_string())
            ))
            .unwrap(),
            "pay frequency is irregular"
        );
    }

    #[test]
    fn threshold_verb_follows_displayed_values() {
        let gte = |observed| ConditionOutcome {
            condition: Condition {
                field: FieldRef::Known(SignalField::CreditAggregateUtilization),
                comparison: Comparison::Gte { value: 0.6 },
            },
            observed: Some(SignalValue::Number(observed)),
            matched: true,
        };
        assert_eq!(
            citation_text(&gte(0.6049)).unwrap(),
            "credit utilization 60% meets 60% threshold"
        );
        assert_eq!(
            citation_text(&gte(0.6)).unwrap(),
            "credit utilization 60% meets 60% threshold"
        );
        assert_eq!(
            citation_text(&gte(0.61)).unwrap(),
            "credit utilization 61% exceeds 60% threshold"
        );
    }

    #[test]
    fn uncited_rationales_read_as_sentences() {
        let catalog = Catalog::builtin().unwrap();
        for item in catalog.content.values() {
            let text = render_rationale(&item.rationale_template, "Savings Builder", &[]);
            assert!(
                text.contains("because it relates to your recent account activity"),
                "{}: {text}",
                item.content_id
            );
        }
        let neutral = render_rationale(&catalog.tone.neutral_rationale_template, "x", &[]);
        assert_eq!(
            neutral,
            "This resource may be relevant to you because it relates to your recent account activity."
        );
    }
}
