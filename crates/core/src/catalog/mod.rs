//! Read-only rule and content catalogs.
//!
//! A catalog is loaded once per process (or per batch), wrapped in an `Arc`, and handed to every
//! pipeline call explicitly. Nothing in here is mutated after load.

use crate::config::Strictness;
use crate::domain::contract::RawCatalog;
use crate::domain::persona::{Condition, PersonaDefinition};
use crate::domain::records::AccountKind;
use crate::domain::recommendation::ItemType;
use crate::domain::signals::SignalGroup;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const BUILTIN_CATALOG: &str = include_str!("../../catalog/default.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankTiePolicy {
    /// Equal ranks are broken by persona id and reported as a data-quality warning.
    #[default]
    LexicalPersonaId,
    /// Equal ranks among qualifying personas are an invariant violation.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub content_id: String,
    pub item_type: ItemType,
    pub title: String,
    pub description: String,
    /// Supports `{persona}` and `{citations}` placeholders.
    pub rationale_template: String,
    pub topics: Vec<SignalGroup>,
    /// Lower sorts first.
    pub priority: u32,
    #[serde(default)]
    pub personas: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityRule {
    pub content_id: String,
    /// Empty means any persona, including `unclassified`.
    #[serde(default)]
    pub allowed_personas: Vec<String>,
    #[serde(default)]
    pub required_accounts: Vec<AccountKind>,
    #[serde(default)]
    pub criteria: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneSeverity {
    /// Rationale is replaced with the neutral template.
    Substitute,
    /// Candidate is withheld.
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToneCategory {
    pub name: String,
    pub severity: ToneSeverity,
    pub phrases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToneRules {
    pub categories: Vec<ToneCategory>,
    /// Supports `{persona}` and `{citations}` placeholders.
    pub neutral_rationale_template: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    pub version: String,
    pub rank_tie_policy: RankTiePolicy,
    /// Sorted by `(priority_rank, persona_id)`.
    pub personas: Vec<PersonaDefinition>,
    pub content: BTreeMap<String, ContentItem>,
    pub generic_content_ids: Vec<String>,
    pub eligibility: BTreeMap<String, EligibilityRule>,
    pub tone: ToneRules,
    pub disclaimer: String,
    /// Non-fatal findings from a lenient load.
    pub load_warnings: Vec<String>,
}

impl Catalog {
    /// The catalog shipped with the crate. Always loaded strictly.
    pub fn builtin() -> anyhow::Result<Self> {
        parse_catalog(BUILTIN_CATALOG, Strictness::Strict).context("builtin catalog is invalid")
    }

    pub fn persona(&self, persona_id: &str) -> Option<&PersonaDefinition> {
        self.personas.iter().find(|p| p.persona_id == persona_id)
    }

    /// Content bound to a persona, in catalog order (`priority`, then `content_id`).
    pub fn content_for_persona(&self, persona_id: &str) -> Vec<&ContentItem> {
        let mut items: Vec<&ContentItem> = self
            .content
            .values()
            .filter(|c| c.personas.iter().any(|p| p == persona_id))
            .collect();
        sort_content(&mut items);
        items
    }

    pub fn generic_content(&self) -> Vec<&ContentItem> {
        let mut items: Vec<&ContentItem> = self
            .generic_content_ids
            .iter()
            .filter_map(|id| self.content.get(id))
            .collect();
        sort_content(&mut items);
        items
    }
}

fn sort_content(items: &mut [&ContentItem]) {
    items.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.content_id.cmp(&b.content_id))
    });
}

pub fn parse_catalog(text: &str, strictness: Strictness) -> anyhow::Result<Catalog> {
    let raw = serde_json::from_str::<RawCatalog>(text)
        .context("catalog document is not valid JSON for the catalog schema")?;
    let catalog = raw.validate_and_into_catalog(strictness)?;

    for warning in &catalog.load_warnings {
        tracing::warn!(version = %catalog.version, %warning, "catalog loaded with warning");
    }

    Ok(catalog)
}

pub fn load_catalog(path: impl AsRef<Path>, strictness: Strictness) -> anyhow::Result<Catalog> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog {}", path.display()))?;
    let catalog = parse_catalog(&text, strictness)
        .with_context(|| format!("failed to load catalog {}", path.display()))?;

    tracing::info!(
        path = %path.display(),
        version = %catalog.version,
        personas = catalog.personas.len(),
        content = catalog.content.len(),
        "catalog loaded"
    );
    Ok(catalog)
}

/// Load from `CATALOG_PATH` when set, otherwise fall back to the builtin catalog.
pub fn load_from_settings(settings: &crate::config::Settings) -> anyhow::Result<Catalog> {
    match settings.catalog_path.as_deref() {
        Some(path) => load_catalog(path, settings.strictness()),
        None => Catalog::builtin(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_loads_strictly() {
        let catalog = Catalog::builtin().unwrap();
        assert!(catalog.load_warnings.is_empty());
        assert!(catalog.persona("high_utilization").is_some());
        let ranks: Vec<u32> = catalog.personas.iter().map(|p| p.priority_rank).collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted);
    }

    #[test]
    fn persona_content_is_ordered_by_priority_then_id() {
        let catalog = Catalog::builtin().unwrap();
        let items = catalog.content_for_persona("high_utilization");
        assert!(!items.is_empty());
        for pair in items.windows(2) {
            assert!(
                (pair[0].priority, &pair[0].content_id) <= (pair[1].priority, &pair[1].content_id)
            );
        }
    }

    #[test]
    fn generic_content_is_available() {
        let catalog = Catalog::builtin().unwrap();
        assert!(!catalog.generic_content().is_empty());
    }
}
