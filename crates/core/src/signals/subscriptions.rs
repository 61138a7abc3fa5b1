use super::{is_transfer, round2, round4, WindowedRecords};
use crate::domain::records::Transaction;
use crate::domain::signals::SubscriptionSignals;
use std::collections::BTreeMap;

const CADENCE_TOLERANCE_DAYS: i64 = 3;
const MIN_CHARGES: usize = 2;
const WEEKS_PER_MONTH: f64 = 52.0 / 12.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cadence {
    Weekly,
    Monthly,
}

impl Cadence {
    fn period_days(self) -> i64 {
        match self {
            Cadence::Weekly => 7,
            Cadence::Monthly => 30,
        }
    }

    /// A monthly series may skip one cycle; a weekly one may not, or biweekly charges would fit.
    fn fits(self, gap_days: i64) -> bool {
        let period = self.period_days();
        if (gap_days - period).abs() <= CADENCE_TOLERANCE_DAYS {
            return true;
        }
        self == Cadence::Monthly && (gap_days - 2 * period).abs() <= CADENCE_TOLERANCE_DAYS
    }

    fn charges_per_month(self) -> f64 {
        match self {
            Cadence::Weekly => WEEKS_PER_MONTH,
            Cadence::Monthly => 1.0,
        }
    }
}

pub(super) fn compute(
    records: &WindowedRecords<'_>,
    fallbacks: &mut Vec<String>,
) -> (SubscriptionSignals, bool) {
    if records.transactions.is_empty() {
        fallbacks.push("subscriptions: no transactions in window".to_string());
        return (SubscriptionSignals::default(), false);
    }

    // Keyed by normalized merchant so grouping order is stable.
    let mut by_merchant: BTreeMap<String, Vec<&Transaction>> = BTreeMap::new();
    for txn in records.transactions.iter().copied() {
        if !txn.is_outflow() || is_transfer(txn) {
            continue;
        }
        let Some(key) = merchant_key(txn) else {
            continue;
        };
        by_merchant.entry(key).or_default().push(txn);
    }

    let mut merchants = Vec::new();
    let mut monthly_spend = 0.0;
    let mut window_spend = 0.0;
    for charges in by_merchant.values() {
        let Some(series) = detect_cadence(charges) else {
            continue;
        };
        let total: f64 = series.charges.iter().map(|t| -t.amount).sum();
        let mean_charge = total / series.charges.len() as f64;

        monthly_spend += mean_charge * series.cadence.charges_per_month();
        window_spend += total;
        merchants.push(display_name(series.charges[0]));
    }

    let total_outflow = records.total_outflow(true);
    let share = if total_outflow > 0.0 {
        round4((window_spend / total_outflow).min(1.0))
    } else {
        fallbacks.push(
            "subscriptions: no outflow in window; recurring_spend_share set to 0".to_string(),
        );
        0.0
    };

    let signals = SubscriptionSignals {
        recurring_merchant_count: merchants.len() as u32,
        monthly_recurring_spend: round2(monthly_spend),
        recurring_spend_share: share,
        recurring_merchants: merchants,
    };
    (signals, true)
}

fn merchant_key(txn: &Transaction) -> Option<String> {
    let name = txn.merchant_name.as_deref()?.trim();
    if name.is_empty() {
        return None;
    }
    Some(name.to_lowercase())
}

fn display_name(txn: &Transaction) -> String {
    txn.merchant_name
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Clone)]
struct RecurringSeries<'a> {
    cadence: Cadence,
    /// The charges that form the series; one-off purchases at the same merchant are left out.
    charges: Vec<&'a Transaction>,
}

/// Charges must be date-ordered. Finds the longest chain of charges spaced at one cadence. The
/// chain must hold at least `MIN_CHARGES` charges, more than half of the merchant's charges, and
/// mostly single-period steps.
fn detect_cadence<'a>(charges: &[&'a Transaction]) -> Option<RecurringSeries<'a>> {
    if charges.len() < MIN_CHARGES {
        return None;
    }

    [Cadence::Weekly, Cadence::Monthly]
        .into_iter()
        .filter_map(|cadence| {
            let chain = longest_chain(charges, cadence);
            let single_steps = chain
                .windows(2)
                .filter(|w| {
                    let gap = (w[1].posted_date - w[0].posted_date).num_days();
                    (gap - cadence.period_days()).abs() <= CADENCE_TOLERANCE_DAYS
                })
                .count();
            let steps = chain.len().saturating_sub(1);
            let qualifies = chain.len() >= MIN_CHARGES
                && chain.len() * 2 > charges.len()
                && single_steps * 2 > steps;
            qualifies.then_some(RecurringSeries {
                cadence,
                charges: chain,
            })
        })
        .next()
}

fn longest_chain<'a>(charges: &[&'a Transaction], cadence: Cadence) -> Vec<&'a Transaction> {
    // best[i] = (chain length ending at i, predecessor index)
    let mut best: Vec<(usize, Option<usize>)> = vec![(1, None); charges.len()];
    for i in 1..charges.len() {
        for j in 0..i {
            let gap = (charges[i].posted_date - charges[j].posted_date).num_days();
            if cadence.fits(gap) && best[j].0 + 1 > best[i].0 {
                best[i] = (best[j].0 + 1, Some(j));
            }
        }
    }

    let Some(mut at) = (0..charges.len()).max_by_key(|&i| (best[i].0, std::cmp::Reverse(i)))
    else {
        return Vec::new();
    };
    let mut chain = vec![charges[at]];
    while let Some(prev) = best[at].1 {
        chain.push(charges[prev]);
        at = prev;
    }
    chain.reverse();
    chain
}
