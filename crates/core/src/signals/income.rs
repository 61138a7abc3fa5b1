use super::{coverage_months, round2, round4, WindowedRecords, COVERAGE_CAP_MONTHS};
use crate::domain::records::{AccountKind, Transaction};
use crate::domain::signals::{IncomeSignals, PaymentFrequency};
use chrono::NaiveDate;

pub const MIN_INCOME_AMOUNT: f64 = 100.0;
const PAYROLL_MARKERS: [&str; 4] = ["payroll", "salary", "direct deposit", "paycheck"];

pub(super) fn compute(
    records: &WindowedRecords<'_>,
    fallbacks: &mut Vec<String>,
) -> (IncomeSignals, bool) {
    let deposits: Vec<&Transaction> = records
        .transactions
        .iter()
        .copied()
        .filter(|t| t.amount >= MIN_INCOME_AMOUNT)
        .filter(|t| records.account_kind(t).is_some_and(AccountKind::is_depository))
        .filter(|t| looks_like_payroll(t))
        .collect();

    if deposits.is_empty() {
        fallbacks.push("income: no payroll deposits in window".to_string());
        return (IncomeSignals::default(), false);
    }

    let mut dates: Vec<NaiveDate> = deposits.iter().map(|t| t.posted_date).collect();
    dates.dedup();

    let median_pay_gap_days = median_gap_days(&dates);
    let payment_frequency = match median_pay_gap_days {
        Some(gap) => classify_frequency(gap),
        None => {
            fallbacks.push(
                "income: fewer than two payroll dates; payment_frequency reported as irregular"
                    .to_string(),
            );
            PaymentFrequency::Irregular
        }
    };

    let amounts: Vec<f64> = deposits.iter().map(|t| t.amount).collect();
    let total: f64 = amounts.iter().sum();

    let liquid_balance: f64 = records
        .accounts_of(AccountKind::Checking)
        .map(|a| a.balance.max(0.0))
        .sum();
    let monthly_outflow = records.average_monthly_outflow_excluding_savings();
    let cash_flow_buffer_months = match coverage_months(liquid_balance, monthly_outflow) {
        Some(months) => months,
        None => {
            fallbacks.push(format!(
                "income: no non-savings outflow; cash_flow_buffer_months capped at {COVERAGE_CAP_MONTHS}"
            ));
            COVERAGE_CAP_MONTHS
        }
    };

    let signals = IncomeSignals {
        payment_count: deposits.len() as u32,
        median_pay_gap_days,
        payment_frequency,
        variability: round4(coefficient_of_variation(&amounts)),
        average_monthly_income: round2(total / records.window.months()),
        cash_flow_buffer_months,
    };
    (signals, true)
}

fn looks_like_payroll(txn: &Transaction) -> bool {
    [txn.category.as_deref(), txn.merchant_name.as_deref()]
        .into_iter()
        .flatten()
        .map(str::to_lowercase)
        .any(|s| PAYROLL_MARKERS.iter().any(|m| s.contains(m)))
}

/// Dates must be sorted and distinct.
fn median_gap_days(dates: &[NaiveDate]) -> Option<f64> {
    if dates.len() < 2 {
        return None;
    }
    let mut gaps: Vec<i64> = dates
        .windows(2)
        .map(|w| (w[1] - w[0]).num_days())
        .collect();
    gaps.sort_unstable();

    let mid = gaps.len() / 2;
    let median = if gaps.len() % 2 == 0 {
        (gaps[mid - 1] + gaps[mid]) as f64 / 2.0
    } else {
        gaps[mid] as f64
    };
    Some(median)
}

pub fn classify_frequency(median_gap_days: f64) -> PaymentFrequency {
    if median_gap_days <= 9.0 {
        PaymentFrequency::Weekly
    } else if median_gap_days <= 20.0 {
        PaymentFrequency::Biweekly
    } else if median_gap_days <= 35.0 {
        PaymentFrequency::Monthly
    } else {
        PaymentFrequency::Irregular
    }
}

/// Population standard deviation over the mean. 0 when undefined.
fn coefficient_of_variation(amounts: &[f64]) -> f64 {
    if amounts.len() < 2 {
        return 0.0;
    }
    let n = amounts.len() as f64;
    let mean = amounts.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = amounts.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / mean
}
