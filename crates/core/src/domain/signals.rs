use crate::time::TimeWindow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalGroup {
    Subscriptions,
    Savings,
    Credit,
    Income,
}

impl SignalGroup {
    pub const ALL: [SignalGroup; 4] = [
        SignalGroup::Subscriptions,
        SignalGroup::Savings,
        SignalGroup::Credit,
        SignalGroup::Income,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SignalGroup::Subscriptions => "subscriptions",
            SignalGroup::Savings => "savings",
            SignalGroup::Credit => "credit",
            SignalGroup::Income => "income",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentFrequency {
    Weekly,
    Biweekly,
    Monthly,
    Irregular,
}

impl PaymentFrequency {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentFrequency::Weekly => "weekly",
            PaymentFrequency::Biweekly => "biweekly",
            PaymentFrequency::Monthly => "monthly",
            PaymentFrequency::Irregular => "irregular",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSignals {
    pub recurring_merchant_count: u32,
    pub monthly_recurring_spend: f64,
    pub recurring_spend_share: f64,
    pub recurring_merchants: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavingsSignals {
    pub net_inflow: f64,
    pub growth_rate: f64,
    pub emergency_fund_months: f64,
    pub total_balance: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreditSignals {
    pub card_count: u32,
    pub excluded_card_count: u32,
    pub aggregate_utilization: f64,
    pub max_utilization: f64,
    pub high_utilization_count: u32,
    pub very_high_utilization_count: u32,
    pub any_overdue: bool,
    pub minimum_payment_only: bool,
    pub interest_charged: bool,
    pub max_apr: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeSignals {
    pub payment_count: u32,
    pub median_pay_gap_days: Option<f64>,
    pub payment_frequency: PaymentFrequency,
    pub variability: f64,
    pub average_monthly_income: f64,
    pub cash_flow_buffer_months: f64,
}

impl Default for IncomeSignals {
    fn default() -> Self {
        Self {
            payment_count: 0,
            median_pay_gap_days: None,
            payment_frequency: PaymentFrequency::Irregular,
            variability: 0.0,
            average_monthly_income: 0.0,
            cash_flow_buffer_months: 0.0,
        }
    }
}

/// Derived metrics for one user over one window.
///
/// `computed_at` is the supplied reference date, never the wall clock, so two extractions over the
/// same records serialize identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub user_id: String,
    pub window: TimeWindow,
    pub computed_at: NaiveDate,
    pub subscriptions: SubscriptionSignals,
    pub savings: SavingsSignals,
    pub credit: CreditSignals,
    pub income: IncomeSignals,
    pub data_completeness: BTreeMap<SignalGroup, bool>,
    pub fallbacks_applied: Vec<String>,
}

impl SignalSnapshot {
    pub fn is_complete(&self, group: SignalGroup) -> bool {
        self.data_completeness.get(&group).copied().unwrap_or(false)
    }

    /// Look up a named field. `None` means the metric could not be computed for this user.
    pub fn value(&self, field: SignalField) -> Option<SignalValue> {
        use SignalField::*;
        let v = match field {
            SubscriptionRecurringMerchantCount => {
                SignalValue::Number(self.subscriptions.recurring_merchant_count as f64)
            }
            SubscriptionMonthlyRecurringSpend => {
                SignalValue::Number(self.subscriptions.monthly_recurring_spend)
            }
            SubscriptionRecurringSpendShare => {
                SignalValue::Number(self.subscriptions.recurring_spend_share)
            }
            SavingsNetInflow => SignalValue::Number(self.savings.net_inflow),
            SavingsGrowthRate => SignalValue::Number(self.savings.growth_rate),
            SavingsEmergencyFundMonths => SignalValue::Number(self.savings.emergency_fund_months),
            SavingsTotalBalance => SignalValue::Number(self.savings.total_balance),
            CreditAggregateUtilization => SignalValue::Number(self.credit.aggregate_utilization),
            CreditMaxUtilization => SignalValue::Number(self.credit.max_utilization),
            CreditHighUtilizationCount => {
                SignalValue::Number(self.credit.high_utilization_count as f64)
            }
            CreditVeryHighUtilizationCount => {
                SignalValue::Number(self.credit.very_high_utilization_count as f64)
            }
            CreditAnyOverdue => SignalValue::Flag(self.credit.any_overdue),
            CreditMinimumPaymentOnly => SignalValue::Flag(self.credit.minimum_payment_only),
            CreditInterestCharged => SignalValue::Flag(self.credit.interest_charged),
            CreditMaxApr => SignalValue::Number(self.credit.max_apr?),
            IncomePaymentCount => SignalValue::Number(self.income.payment_count as f64),
            IncomeMedianPayGapDays => SignalValue::Number(self.income.median_pay_gap_days?),
            IncomePaymentFrequency => {
                SignalValue::Label(self.income.payment_frequency.as_str().to_string())
            }
            IncomeVariability => SignalValue::Number(self.income.variability),
            IncomeAverageMonthlyIncome => SignalValue::Number(self.income.average_monthly_income),
            IncomeCashFlowBufferMonths => SignalValue::Number(self.income.cash_flow_buffer_months),
        };
        Some(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Flag(bool),
    Number(f64),
    Label(String),
}

impl SignalValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            SignalValue::Flag(_) => ValueKind::Flag,
            SignalValue::Number(_) => ValueKind::Number,
            SignalValue::Label(_) => ValueKind::Label,
        }
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Flag(b) => write!(f, "{b}"),
            SignalValue::Number(n) => write!(f, "{n}"),
            SignalValue::Label(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Number,
    Flag,
    Label,
}

/// How a numeric field renders in citations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Ratio,
    Percent,
    Currency,
    Months,
    Days,
    Count,
    None,
}

impl Unit {
    pub fn format(self, v: f64) -> String {
        match self {
            Unit::Percent => format!("{:.0}%", v * 100.0),
            Unit::Currency => format!("${v:.2}"),
            Unit::Months => format!("{v:.1} months"),
            Unit::Days => format!("{v:.0} days"),
            Unit::Count => format!("{v:.0}"),
            Unit::Ratio => format!("{v:.2}"),
            Unit::None => format!("{v}"),
        }
    }
}

/// Every signal a persona condition may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignalField {
    SubscriptionRecurringMerchantCount,
    SubscriptionMonthlyRecurringSpend,
    SubscriptionRecurringSpendShare,
    SavingsNetInflow,
    SavingsGrowthRate,
    SavingsEmergencyFundMonths,
    SavingsTotalBalance,
    CreditAggregateUtilization,
    CreditMaxUtilization,
    CreditHighUtilizationCount,
    CreditVeryHighUtilizationCount,
    CreditAnyOverdue,
    CreditMinimumPaymentOnly,
    CreditInterestCharged,
    CreditMaxApr,
    IncomePaymentCount,
    IncomeMedianPayGapDays,
    IncomePaymentFrequency,
    IncomeVariability,
    IncomeAverageMonthlyIncome,
    IncomeCashFlowBufferMonths,
}

impl SignalField {
    pub const ALL: [SignalField; 21] = [
        SignalField::SubscriptionRecurringMerchantCount,
        SignalField::SubscriptionMonthlyRecurringSpend,
        SignalField::SubscriptionRecurringSpendShare,
        SignalField::SavingsNetInflow,
        SignalField::SavingsGrowthRate,
        SignalField::SavingsEmergencyFundMonths,
        SignalField::SavingsTotalBalance,
        SignalField::CreditAggregateUtilization,
        SignalField::CreditMaxUtilization,
        SignalField::CreditHighUtilizationCount,
        SignalField::CreditVeryHighUtilizationCount,
        SignalField::CreditAnyOverdue,
        SignalField::CreditMinimumPaymentOnly,
        SignalField::CreditInterestCharged,
        SignalField::CreditMaxApr,
        SignalField::IncomePaymentCount,
        SignalField::IncomeMedianPayGapDays,
        SignalField::IncomePaymentFrequency,
        SignalField::IncomeVariability,
        SignalField::IncomeAverageMonthlyIncome,
        SignalField::IncomeCashFlowBufferMonths,
    ];

    pub fn name(self) -> &'static str {
        use SignalField::*;
        match self {
            SubscriptionRecurringMerchantCount => "subscriptions.recurring_merchant_count",
            SubscriptionMonthlyRecurringSpend => "subscriptions.monthly_recurring_spend",
            SubscriptionRecurringSpendShare => "subscriptions.recurring_spend_share",
            SavingsNetInflow => "savings.net_inflow",
            SavingsGrowthRate => "savings.growth_rate",
            SavingsEmergencyFundMonths => "savings.emergency_fund_months",
            SavingsTotalBalance => "savings.total_balance",
            CreditAggregateUtilization => "credit.aggregate_utilization",
            CreditMaxUtilization => "credit.max_utilization",
            CreditHighUtilizationCount => "credit.high_utilization_count",
            CreditVeryHighUtilizationCount => "credit.very_high_utilization_count",
            CreditAnyOverdue => "credit.any_overdue",
            CreditMinimumPaymentOnly => "credit.minimum_payment_only",
            CreditInterestCharged => "credit.interest_charged",
            CreditMaxApr => "credit.max_apr",
            IncomePaymentCount => "income.payment_count",
            IncomeMedianPayGapDays => "income.median_pay_gap_days",
            IncomePaymentFrequency => "income.payment_frequency",
            IncomeVariability => "income.variability",
            IncomeAverageMonthlyIncome => "income.average_monthly_income",
            IncomeCashFlowBufferMonths => "income.cash_flow_buffer_months",
        }
    }

    /// Human-readable label used in citation strings.
    pub fn label(self) -> &'static str {
        use SignalField::*;
        match self {
            SubscriptionRecurringMerchantCount => "recurring merchants",
            SubscriptionMonthlyRecurringSpend => "monthly recurring spend",
            SubscriptionRecurringSpendShare => "recurring spend share",
            SavingsNetInflow => "net savings inflow",
            SavingsGrowthRate => "savings growth rate",
            SavingsEmergencyFundMonths => "emergency fund coverage",
            SavingsTotalBalance => "savings balance",
            CreditAggregateUtilization => "credit utilization",
            CreditMaxUtilization => "highest card utilization",
            CreditHighUtilizationCount => "cards at or above 50% utilization",
            CreditVeryHighUtilizationCount => "cards at or above 80% utilization",
            CreditAnyOverdue => "overdue credit payment",
            CreditMinimumPaymentOnly => "minimum-only card payments",
            CreditInterestCharged => "interest charges on a card",
            CreditMaxApr => "highest card APR",
            IncomePaymentCount => "payroll deposits",
            IncomeMedianPayGapDays => "median gap between paychecks",
            IncomePaymentFrequency => "pay frequency",
            IncomeVariability => "income variability",
            IncomeAverageMonthlyIncome => "average monthly income",
            IncomeCashFlowBufferMonths => "cash-flow buffer",
        }
    }

    pub fn group(self) -> SignalGroup {
        use SignalField::*;
        match self {
            SubscriptionRecurringMerchantCount
            | SubscriptionMonthlyRecurringSpend
            | SubscriptionRecurringSpendShare => SignalGroup::Subscriptions,
            SavingsNetInflow | SavingsGrowthRate | SavingsEmergencyFundMonths
            | SavingsTotalBalance => SignalGroup::Savings,
            CreditAggregateUtilization
            | CreditMaxUtilization
            | CreditHighUtilizationCount
            | CreditVeryHighUtilizationCount
            | CreditAnyOverdue
            | CreditMinimumPaymentOnly
            | CreditInterestCharged
            | CreditMaxApr => SignalGroup::Credit,
            IncomePaymentCount
            | IncomeMedianPayGapDays
            | IncomePaymentFrequency
            | IncomeVariability
            | IncomeAverageMonthlyIncome
            | IncomeCashFlowBufferMonths => SignalGroup::Income,
        }
    }

    pub fn kind(self) -> ValueKind {
        use SignalField::*;
        match self {
            CreditAnyOverdue | CreditMinimumPaymentOnly | CreditInterestCharged => ValueKind::Flag,
            IncomePaymentFrequency => ValueKind::Label,
            _ => ValueKind::Number,
        }
    }

    pub fn unit(self) -> Unit {
        use SignalField::*;
        match self {
            SubscriptionRecurringSpendShare
            | SavingsGrowthRate
            | CreditAggregateUtilization
            | CreditMaxUtilization
            | CreditMaxApr => Unit::Percent,
            SubscriptionMonthlyRecurringSpend
            | SavingsNetInflow
            | SavingsTotalBalance
            | IncomeAverageMonthlyIncome => Unit::Currency,
            SavingsEmergencyFundMonths | IncomeCashFlowBufferMonths => Unit::Months,
            IncomeMedianPayGapDays => Unit::Days,
            SubscriptionRecurringMerchantCount
            | CreditHighUtilizationCount
            | CreditVeryHighUtilizationCount
            | IncomePaymentCount => Unit::Count,
            IncomeVariability => Unit::Ratio,
            CreditAnyOverdue | CreditMinimumPaymentOnly | CreditInterestCharged
            | IncomePaymentFrequency => Unit::None,
        }
    }
}

impl fmt::Display for SignalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSignalField(pub String);

impl fmt::Display for UnknownSignalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown signal field: {}", self.0)
    }
}

impl std::error::Error for UnknownSignalField {}

impl FromStr for SignalField {
    type Err = UnknownSignalField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        SignalField::ALL
            .iter()
            .copied()
            .find(|f| f.name() == s)
            .ok_or_else(|| UnknownSignalField(s.to_string()))
    }
}

impl Serialize for SignalField {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for SignalField {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
