//! Behavioral signal extraction.
//!
//! `extract` is a total, pure function of its inputs: it never fails, never reads the clock and
//! never iterates a hash map, so identical records always serialize to identical snapshots.
//! Missing data degrades to zeroed metrics plus a completeness flag and a `fallbacks_applied`
//! entry.

mod credit;
mod income;
mod savings;
mod subscriptions;

use crate::domain::records::{Account, AccountKind, Liability, Transaction};
use crate::domain::signals::{SignalGroup, SignalSnapshot};
use crate::time::TimeWindow;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Upper bound reported for months-of-coverage metrics when there is no outflow to divide by.
pub const COVERAGE_CAP_MONTHS: f64 = 99.0;

pub fn extract(
    user_id: &str,
    accounts: &[Account],
    transactions: &[Transaction],
    liabilities: &[Liability],
    window: TimeWindow,
    reference_date: NaiveDate,
) -> SignalSnapshot {
    let records = WindowedRecords::new(accounts, transactions, liabilities, window, reference_date);
    let mut fallbacks = Vec::new();

    if records.unknown_account_refs > 0 {
        fallbacks.push(format!(
            "records: {} in-window transactions reference unknown accounts; excluded",
            records.unknown_account_refs
        ));
    }

    let (subscriptions, subscriptions_complete) = subscriptions::compute(&records, &mut fallbacks);
    let (savings, savings_complete) = savings::compute(&records, &mut fallbacks);
    let (credit, credit_complete) = credit::compute(&records, &mut fallbacks);
    let (income, income_complete) = income::compute(&records, &mut fallbacks);

    let data_completeness = BTreeMap::from([
        (SignalGroup::Subscriptions, subscriptions_complete),
        (SignalGroup::Savings, savings_complete),
        (SignalGroup::Credit, credit_complete),
        (SignalGroup::Income, income_complete),
    ]);

    tracing::debug!(
        user_id,
        window = %window,
        %reference_date,
        transactions_in_window = records.transactions.len(),
        fallbacks = fallbacks.len(),
        "signals extracted"
    );

    SignalSnapshot {
        user_id: user_id.to_string(),
        window,
        computed_at: reference_date,
        subscriptions,
        savings,
        credit,
        income,
        data_completeness,
        fallbacks_applied: fallbacks,
    }
}

/// Records narrowed to one window, with accounts indexed by id.
pub(crate) struct WindowedRecords<'a> {
    pub window: TimeWindow,
    pub accounts: BTreeMap<&'a str, &'a Account>,
    /// In-window transactions on known accounts, ordered by `(posted_date, id)`.
    pub transactions: Vec<&'a Transaction>,
    pub liabilities: &'a [Liability],
    pub unknown_account_refs: usize,
}

impl<'a> WindowedRecords<'a> {
    fn new(
        accounts: &'a [Account],
        transactions: &'a [Transaction],
        liabilities: &'a [Liability],
        window: TimeWindow,
        reference_date: NaiveDate,
    ) -> Self {
        let accounts: BTreeMap<&str, &Account> =
            accounts.iter().map(|a| (a.id.as_str(), a)).collect();

        let mut unknown_account_refs = 0;
        let mut in_window: Vec<&Transaction> = Vec::new();
        for txn in transactions {
            if !window.contains(reference_date, txn.posted_date) {
                continue;
            }
            if !accounts.contains_key(txn.account_id.as_str()) {
                unknown_account_refs += 1;
                continue;
            }
            in_window.push(txn);
        }
        in_window.sort_by(|a, b| {
            a.posted_date
                .cmp(&b.posted_date)
                .then_with(|| a.id.cmp(&b.id))
        });

        Self {
            window,
            accounts,
            transactions: in_window,
            liabilities,
            unknown_account_refs,
        }
    }

    pub fn account_kind(&self, txn: &Transaction) -> Option<AccountKind> {
        self.accounts.get(txn.account_id.as_str()).map(|a| a.kind)
    }

    pub fn accounts_of(&self, kind: AccountKind) -> impl Iterator<Item = &'a Account> + '_ {
        self.accounts.values().copied().filter(move |a| a.kind == kind)
    }

    /// Spending outflow in the window, ignoring transfers between the user's own accounts.
    pub fn total_outflow(&self, include_savings: bool) -> f64 {
        self.transactions
            .iter()
            .filter(|t| t.is_outflow() && !is_transfer(t))
            .filter(|t| include_savings || self.account_kind(t) != Some(AccountKind::Savings))
            .map(|t| -t.amount)
            .sum()
    }

    pub fn average_monthly_outflow_excluding_savings(&self) -> f64 {
        self.total_outflow(false) / self.window.months()
    }
}

pub(crate) fn is_transfer(txn: &Transaction) -> bool {
    txn.category
        .as_deref()
        .map(|c| c.to_ascii_lowercase().contains("transfer"))
        .unwrap_or(false)
}

/// `numerator / monthly_outflow` in months, capped. Returns `None` when there is no outflow.
pub(crate) fn coverage_months(numerator: f64, monthly_outflow: f64) -> Option<f64> {
    if monthly_outflow <= 0.0 {
        return None;
    }
    Some(round4((numerator / monthly_outflow).clamp(0.0, COVERAGE_CAP_MONTHS)))
}

/// Ratios are reported to four decimal places so equal inputs print equal values.
pub(crate) fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
