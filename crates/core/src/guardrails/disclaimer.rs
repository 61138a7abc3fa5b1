use super::{Annotation, GuardContext, Guardrail, Verdict};
use crate::domain::recommendation::{ItemType, RecommendationCandidate};

/// Partner offers always carry the catalog disclaimer. Never drops.
pub struct DisclaimerCheck;

impl Guardrail for DisclaimerCheck {
    fn name(&self) -> &'static str {
        "disclaimer"
    }

    fn evaluate(&self, candidate: &RecommendationCandidate, ctx: &GuardContext<'_>) -> Verdict {
        if candidate.item_type != ItemType::PartnerOffer {
            return Verdict::Pass {
                note: Some("not_required".to_string()),
            };
        }
        let disclaimer = ctx.catalog.disclaimer.trim();
        if candidate.rationale.contains(disclaimer) {
            return Verdict::Pass {
                note: Some("disclaimer_present".to_string()),
            };
        }
        Verdict::Annotate {
            annotation: Annotation::AppendDisclaimer(disclaimer.to_string()),
            note: "disclaimer_appended".to_string(),
        }
    }
}
