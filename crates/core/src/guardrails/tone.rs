use super::{Annotation, GuardContext, Guardrail, Verdict};
use crate::catalog::{ToneRules, ToneSeverity};
use crate::domain::recommendation::RecommendationCandidate;
use crate::recommend::render_rationale;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToneViolation {
    pub category: String,
    pub severity: ToneSeverity,
    pub phrase: String,
}

/// Case-insensitive phrase search on word boundaries.
pub fn find_violations(text: &str, rules: &ToneRules) -> Vec<ToneViolation> {
    let haystack = text.to_lowercase();
    let mut found = Vec::new();
    for category in &rules.categories {
        for phrase in &category.phrases {
            let needle = phrase.to_lowercase();
            if !needle.is_empty() && contains_phrase(&haystack, &needle) {
                found.push(ToneViolation {
                    category: category.name.clone(),
                    severity: category.severity,
                    phrase: phrase.clone(),
                });
            }
        }
    }
    found
}

fn contains_phrase(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}

/// Substitute-severity wording in the rationale is replaced with the neutral template. Anything
/// in the title or description, or any drop-severity category, withholds the candidate.
pub struct ToneCheck;

impl Guardrail for ToneCheck {
    fn name(&self) -> &'static str {
        "tone"
    }

    fn evaluate(&self, candidate: &RecommendationCandidate, ctx: &GuardContext<'_>) -> Verdict {
        let rules = &ctx.catalog.tone;
        let mut fixed_copy = find_violations(&candidate.title, rules);
        fixed_copy.extend(find_violations(&candidate.description, rules));
        let rationale = find_violations(&candidate.rationale, rules);

        if fixed_copy.is_empty() && rationale.is_empty() {
            return Verdict::Pass { note: None };
        }

        let worst = fixed_copy
            .iter()
            .chain(rationale.iter())
            .max_by_key(|v| v.severity)
            .map(|v| (v.severity, v.category.clone()));
        if let Some((ToneSeverity::Drop, category)) = worst {
            return Verdict::Drop {
                reason: format!("tone_violation:{category}"),
            };
        }
        if let Some(v) = fixed_copy.first() {
            return Verdict::Drop {
                reason: format!("tone_violation_in_copy:{}", v.category),
            };
        }

        let mut categories: Vec<&str> = rationale.iter().map(|v| v.category.as_str()).collect();
        categories.sort_unstable();
        categories.dedup();
        let neutral = render_rationale(
            &rules.neutral_rationale_template,
            ctx.persona_display_name(),
            &candidate.signal_citations,
        );
        Verdict::Rewrite {
            annotation: Annotation::ReplaceRationale(neutral),
            reason: format!("rationale_substituted:{}", categories.join(",")),
        }
    }
}
