use super::{round4, WindowedRecords};
use crate::domain::records::AccountKind;
use crate::domain::signals::CreditSignals;
use std::collections::BTreeSet;

pub const HIGH_UTILIZATION: f64 = 0.5;
pub const VERY_HIGH_UTILIZATION: f64 = 0.8;

pub(super) fn compute(
    records: &WindowedRecords<'_>,
    fallbacks: &mut Vec<String>,
) -> (CreditSignals, bool) {
    let cards: Vec<_> = records.accounts_of(AccountKind::Credit).collect();
    if cards.is_empty() {
        fallbacks.push("credit: no credit accounts".to_string());
        return (CreditSignals::default(), false);
    }

    let mut signals = CreditSignals {
        card_count: cards.len() as u32,
        ..CreditSignals::default()
    };

    let mut weighted = 0.0;
    let mut weight = 0.0;
    let mut included = 0u32;
    for card in &cards {
        let limit = card.credit_limit.unwrap_or(0.0);
        if limit <= 0.0 {
            signals.excluded_card_count += 1;
            fallbacks.push(format!(
                "credit: account {} has no credit limit; excluded from utilization",
                card.id
            ));
            continue;
        }
        included += 1;

        let balance = card.balance.max(0.0);
        let utilization = balance / limit;
        weighted += balance * utilization;
        weight += balance;

        signals.max_utilization = signals.max_utilization.max(utilization);
        if utilization >= HIGH_UTILIZATION {
            signals.high_utilization_count += 1;
        }
        if utilization >= VERY_HIGH_UTILIZATION {
            signals.very_high_utilization_count += 1;
        }
    }

    // Balance-weighted mean; all-zero balances mean every card sits at 0%.
    if weight > 0.0 {
        signals.aggregate_utilization = round4(weighted / weight);
    }
    signals.max_utilization = round4(signals.max_utilization);

    let card_ids: BTreeSet<&str> = cards.iter().map(|c| c.id.as_str()).collect();
    for liability in records
        .liabilities
        .iter()
        .filter(|l| card_ids.contains(l.account_id.as_str()))
    {
        signals.any_overdue |= liability.is_overdue;
        signals.minimum_payment_only |= liability.minimum_payment_only;
        signals.interest_charged |= liability.interest_charged;
        if let Some(apr) = liability.apr {
            signals.max_apr = Some(signals.max_apr.map_or(apr, |m: f64| m.max(apr)));
        }
    }

    let complete = included > 0 && signals.excluded_card_count == 0;
    (signals, complete)
}
