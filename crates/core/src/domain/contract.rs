use crate::catalog::{Catalog, ContentItem, EligibilityRule, RankTiePolicy, ToneRules};
use crate::config::Strictness;
use crate::domain::persona::{Comparison, Condition, FieldRef, PersonaDefinition};
use crate::domain::signals::{SignalField, ValueKind};
use crate::error::{CatalogError, InvariantKind, InvariantViolation};
use anyhow::{bail, ensure};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Catalog document as it arrives from the catalog owners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCatalog {
    pub version: String,
    #[serde(default)]
    pub rank_tie_policy: RankTiePolicy,
    pub personas: Vec<PersonaDefinition>,
    pub content: Vec<ContentItem>,
    #[serde(default)]
    pub generic_content_ids: Vec<String>,
    #[serde(default)]
    pub eligibility: Vec<EligibilityRule>,
    pub tone: ToneRules,
    pub disclaimer: String,
}

impl RawCatalog {
    pub fn validate_and_into_catalog(self, strictness: Strictness) -> anyhow::Result<Catalog> {
        let version = self.version.trim().to_string();
        ensure!(!version.is_empty(), "catalog version must be non-empty");

        let disclaimer = self.disclaimer.trim().to_string();
        ensure!(!disclaimer.is_empty(), "disclaimer must be non-empty");

        let mut warnings = Vec::new();

        let mut seen_personas = BTreeSet::new();
        let mut personas = Vec::with_capacity(self.personas.len());
        for persona in self.personas {
            personas.push(validate_persona(persona, &mut seen_personas, strictness, &mut warnings)?);
        }
        personas.sort_by(|a, b| {
            a.priority_rank
                .cmp(&b.priority_rank)
                .then_with(|| a.persona_id.cmp(&b.persona_id))
        });

        for pair in personas.windows(2) {
            if pair[0].priority_rank != pair[1].priority_rank {
                continue;
            }
            let detail = format!(
                "personas {} and {} share priority_rank {}",
                pair[0].persona_id, pair[1].persona_id, pair[0].priority_rank
            );
            match (self.rank_tie_policy, strictness) {
                (RankTiePolicy::Reject, Strictness::Strict) => {
                    return Err(
                        InvariantViolation::new(InvariantKind::DuplicatePriorityRank, detail).into(),
                    );
                }
                _ => warnings.push(detail),
            }
        }

        let mut content = BTreeMap::new();
        for item in self.content {
            let item = validate_content(item, &seen_personas)?;
            if content.contains_key(&item.content_id) {
                bail!(catalog_error("content", format!("duplicate content_id: {}", item.content_id)));
            }
            content.insert(item.content_id.clone(), item);
        }

        for id in &self.generic_content_ids {
            ensure!(
                content.contains_key(id),
                catalog_error("generic_content", format!("unknown content_id: {id}"))
            );
        }

        let mut eligibility = BTreeMap::new();
        for mut rule in self.eligibility {
            rule.content_id = rule.content_id.trim().to_string();
            ensure!(
                content.contains_key(&rule.content_id),
                catalog_error(
                    "eligibility",
                    format!("rule references unknown content_id: {}", rule.content_id)
                )
            );
            for condition in &rule.criteria {
                let context = format!("eligibility rule {}", rule.content_id);
                check_condition(condition, &context, strictness, &mut warnings)?;
            }
            if eligibility.insert(rule.content_id.clone(), rule).is_some() {
                bail!(catalog_error("eligibility", "duplicate eligibility rule".to_string()));
            }
        }

        let mut seen_categories = BTreeSet::new();
        for category in &self.tone.categories {
            ensure!(
                seen_categories.insert(category.name.trim().to_ascii_lowercase()),
                catalog_error("tone", format!("duplicate tone category: {}", category.name))
            );
            ensure!(
                category.phrases.iter().all(|p| !p.trim().is_empty()),
                catalog_error("tone", format!("empty phrase in category {}", category.name))
            );
        }
        ensure!(
            !self.tone.neutral_rationale_template.trim().is_empty(),
            catalog_error("tone", "neutral_rationale_template must be non-empty".to_string())
        );

        Ok(Catalog {
            version,
            rank_tie_policy: self.rank_tie_policy,
            personas,
            content,
            generic_content_ids: self.generic_content_ids,
            eligibility,
            tone: self.tone,
            disclaimer,
            load_warnings: warnings,
        })
    }
}

fn catalog_error(stage: &'static str, detail: String) -> CatalogError {
    CatalogError { stage, detail }
}

fn validate_persona(
    mut persona: PersonaDefinition,
    seen: &mut BTreeSet<String>,
    strictness: Strictness,
    warnings: &mut Vec<String>,
) -> anyhow::Result<PersonaDefinition> {
    persona.persona_id = persona.persona_id.trim().to_string();
    ensure!(
        !persona.persona_id.is_empty(),
        catalog_error("personas", "persona_id must be non-empty".to_string())
    );
    ensure!(
        persona.persona_id != crate::domain::persona::UNCLASSIFIED,
        catalog_error("personas", "persona_id `unclassified` is reserved".to_string())
    );
    ensure!(
        seen.insert(persona.persona_id.clone()),
        catalog_error("personas", format!("duplicate persona_id: {}", persona.persona_id))
    );
    ensure!(
        !persona.conditions.is_empty(),
        catalog_error(
            "personas",
            format!("persona {} has no conditions", persona.persona_id)
        )
    );

    let context = format!("persona {}", persona.persona_id);
    for condition in &persona.conditions {
        check_condition(condition, &context, strictness, warnings)?;
    }

    Ok(persona)
}

fn check_condition(
    condition: &Condition,
    context: &str,
    strictness: Strictness,
    warnings: &mut Vec<String>,
) -> anyhow::Result<()> {
    let violation = match &condition.field {
        FieldRef::Unresolved(name) => Some(InvariantViolation::new(
            InvariantKind::UndefinedSignalField,
            format!("{context}: condition references undefined signal field {name}"),
        )),
        FieldRef::Known(field) if !comparison_fits(&condition.comparison, *field) => {
            Some(InvariantViolation::new(
                InvariantKind::ComparisonKindMismatch,
                format!("{context}: {condition} does not fit the field's value kind"),
            ))
        }
        FieldRef::Known(_) => None,
    };

    match (violation, strictness) {
        (None, _) => Ok(()),
        (Some(v), Strictness::Strict) => Err(v.into()),
        (Some(v), Strictness::Lenient) => {
            warnings.push(format!("{v}; condition will never match"));
            Ok(())
        }
    }
}

fn comparison_fits(comparison: &Comparison, field: SignalField) -> bool {
    match comparison {
        Comparison::Gte { .. } | Comparison::Lte { .. } => field.kind() == ValueKind::Number,
        Comparison::Flag { .. } => field.kind() == ValueKind::Flag,
        Comparison::Eq { value } => value.kind() == field.kind(),
    }
}

fn validate_content(
    mut item: ContentItem,
    personas: &BTreeSet<String>,
) -> anyhow::Result<ContentItem> {
    item.content_id = item.content_id.trim().to_string();
    ensure!(
        !item.content_id.is_empty(),
        catalog_error("content", "content_id must be non-empty".to_string())
    );

    item.title = item.title.trim().to_string();
    ensure!(
        !item.title.is_empty(),
        catalog_error("content", format!("{}: title must be non-empty", item.content_id))
    );
    ensure!(
        !item.rationale_template.trim().is_empty(),
        catalog_error(
            "content",
            format!("{}: rationale_template must be non-empty", item.content_id)
        )
    );

    for persona_id in &item.personas {
        ensure!(
            personas.contains(persona_id),
            catalog_error(
                "content",
                format!("{}: bound to unknown persona {persona_id}", item.content_id)
            )
        );
    }

    Ok(item)
}
