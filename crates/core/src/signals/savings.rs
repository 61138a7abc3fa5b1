use super::{coverage_months, round2, round4, WindowedRecords, COVERAGE_CAP_MONTHS};
use crate::domain::records::AccountKind;
use crate::domain::signals::SavingsSignals;

pub(super) fn compute(
    records: &WindowedRecords<'_>,
    fallbacks: &mut Vec<String>,
) -> (SavingsSignals, bool) {
    let savings_accounts: Vec<_> = records.accounts_of(AccountKind::Savings).collect();
    if savings_accounts.is_empty() {
        fallbacks.push("savings: no savings accounts".to_string());
        return (SavingsSignals::default(), false);
    }

    let total_balance: f64 = savings_accounts.iter().map(|a| a.balance).sum();
    let net_inflow: f64 = records
        .transactions
        .iter()
        .filter(|t| records.account_kind(t) == Some(AccountKind::Savings))
        .map(|t| t.amount)
        .sum();

    // Balances are as of the reference date, so the window opened at balance minus net inflow.
    let opening_balance = total_balance - net_inflow;
    let growth_rate = if opening_balance > 0.0 {
        round4(net_inflow / opening_balance)
    } else {
        fallbacks.push("savings: opening balance is zero; growth_rate set to 0".to_string());
        0.0
    };

    let monthly_outflow = records.average_monthly_outflow_excluding_savings();
    let emergency_fund_months = match coverage_months(total_balance, monthly_outflow) {
        Some(months) => months,
        None => {
            fallbacks.push(format!(
                "savings: no non-savings outflow; emergency_fund_months capped at {COVERAGE_CAP_MONTHS}"
            ));
            COVERAGE_CAP_MONTHS
        }
    };

    let signals = SavingsSignals {
        net_inflow: round2(net_inflow),
        growth_rate,
        emergency_fund_months,
        total_balance: round2(total_balance),
    };
    (signals, true)
}
