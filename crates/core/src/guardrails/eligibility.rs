use super::{GuardContext, Guardrail, Verdict};
use crate::domain::records::ConsentState;
use crate::domain::recommendation::{ItemType, RecommendationCandidate};
use crate::persona::evaluate_condition;

/// Partner offers need a rule, a persona match, the required accounts and every criterion to
/// hold. Education content is not subject to eligibility.
pub struct EligibilityCheck;

impl Guardrail for EligibilityCheck {
    fn name(&self) -> &'static str {
        "eligibility"
    }

    fn evaluate(&self, candidate: &RecommendationCandidate, ctx: &GuardContext<'_>) -> Verdict {
        if candidate.item_type != ItemType::PartnerOffer {
            return Verdict::Pass {
                note: Some("not_applicable".to_string()),
            };
        }
        if ctx.consent != ConsentState::OptedIn {
            return reject("consent_opted_out".to_string());
        }

        let Some(rule) = ctx.catalog.eligibility.get(&candidate.content_id) else {
            return reject("no_eligibility_rule".to_string());
        };

        let persona = &ctx.assignment.assigned_persona_id;
        if !rule.allowed_personas.is_empty() && !rule.allowed_personas.contains(persona) {
            return reject("no_persona_match".to_string());
        }

        if let Some(missing) = rule
            .required_accounts
            .iter()
            .find(|kind| !ctx.held_accounts.contains(*kind))
        {
            return reject(format!("missing_required_account:{}", missing.as_str()));
        }

        if let Some(failed) = rule
            .criteria
            .iter()
            .map(|c| evaluate_condition(ctx.snapshot, c))
            .find(|o| !o.matched)
        {
            return reject(format!("criteria_not_met:{}", failed.condition.field.name()));
        }

        Verdict::Pass {
            note: Some("eligible".to_string()),
        }
    }
}

fn reject(reason: String) -> Verdict {
    Verdict::Drop { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::records::AccountKind;
    use crate::guardrails::tests::Fixture;

    fn reason(verdict: Verdict) -> String {
        match verdict {
            Verdict::Drop { reason } => reason,
            other => panic!("expected drop, got {other:?}"),
        }
    }

    #[test]
    fn education_is_not_applicable() {
        let fx = Fixture::high_utilization();
        let verdict = EligibilityCheck.evaluate(
            &fx.candidate("edu_credit_utilization"),
            &fx.ctx(ConsentState::OptedIn),
        );
        assert_eq!(
            verdict,
            Verdict::Pass {
                note: Some("not_applicable".to_string())
            }
        );
    }

    #[test]
    fn missing_rule_fails_closed() {
        let mut fx = Fixture::high_utilization();
        fx.catalog.eligibility.remove("offer_balance_transfer");
        let verdict = EligibilityCheck.evaluate(
            &fx.candidate("offer_balance_transfer"),
            &fx.ctx(ConsentState::OptedIn),
        );
        assert_eq!(reason(verdict), "no_eligibility_rule");
    }

    #[test]
    fn required_account_and_criteria() {
        let mut fx = Fixture::high_utilization();
        let savings = fx.candidate("offer_high_yield_savings");
        assert_eq!(
            reason(EligibilityCheck.evaluate(&savings, &fx.ctx(ConsentState::OptedIn))),
            "missing_required_account:depository-savings"
        );

        fx.held.insert(AccountKind::Savings);
        assert!(matches!(
            EligibilityCheck.evaluate(&savings, &fx.ctx(ConsentState::OptedIn)),
            Verdict::Pass { .. }
        ));

        fx.snapshot.credit.any_overdue = true;
        assert_eq!(
            reason(EligibilityCheck.evaluate(
                &fx.candidate("offer_balance_transfer"),
                &fx.ctx(ConsentState::OptedIn)
            )),
            "criteria_not_met:credit.any_overdue"
        );
    }

    #[test]
    fn persona_outside_allow_list_is_dropped() {
        let fx = Fixture::high_utilization();
        let mut tracker = fx.candidate("offer_balance_transfer");
        tracker.content_id = "offer_subscription_tracker".to_string();
        assert_eq!(
            reason(EligibilityCheck.evaluate(&tracker, &fx.ctx(ConsentState::OptedIn))),
            "no_persona_match"
        );
    }
}
