use super::{GuardContext, Guardrail, Verdict};
use crate::domain::records::ConsentState;
use crate::domain::recommendation::RecommendationCandidate;

/// Only an explicit opt-in lets anything through. A missing record counts as no consent.
pub struct ConsentCheck;

impl Guardrail for ConsentCheck {
    fn name(&self) -> &'static str {
        "consent"
    }

    fn evaluate(&self, _candidate: &RecommendationCandidate, ctx: &GuardContext<'_>) -> Verdict {
        match ctx.consent {
            ConsentState::OptedIn => Verdict::Pass { note: None },
            other => Verdict::Drop {
                reason: format!("consent_{}", other.as_str()),
            },
        }
    }
}
