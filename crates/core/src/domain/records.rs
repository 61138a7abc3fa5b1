use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccountKind {
    #[serde(rename = "depository-checking")]
    Checking,
    #[serde(rename = "depository-savings")]
    Savings,
    #[serde(rename = "credit")]
    Credit,
    #[serde(rename = "loan")]
    Loan,
}

impl AccountKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountKind::Checking => "depository-checking",
            AccountKind::Savings => "depository-savings",
            AccountKind::Credit => "credit",
            AccountKind::Loan => "loan",
        }
    }

    pub fn is_depository(self) -> bool {
        matches!(self, AccountKind::Checking | AccountKind::Savings)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub kind: AccountKind,
    /// Current balance at the reference date. For credit accounts this is the amount owed.
    pub balance: f64,
    /// Only meaningful for credit accounts.
    #[serde(default)]
    pub credit_limit: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub account_id: String,
    pub posted_date: NaiveDate,
    /// Signed amount; positive is an inflow.
    pub amount: f64,
    #[serde(default)]
    pub merchant_name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl Transaction {
    pub fn is_outflow(&self) -> bool {
        self.amount < 0.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Liability {
    pub id: String,
    pub account_id: String,
    #[serde(default)]
    pub minimum_payment_only: bool,
    #[serde(default)]
    pub is_overdue: bool,
    #[serde(default)]
    pub interest_charged: bool,
    #[serde(default)]
    pub apr: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentState {
    OptedIn,
    OptedOut,
    #[default]
    NotRecorded,
}

impl ConsentState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsentState::OptedIn => "opted_in",
            ConsentState::OptedOut => "opted_out",
            ConsentState::NotRecorded => "not_recorded",
        }
    }
}

/// Everything the record-retrieval layer hands over for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecords {
    pub user_id: String,
    #[serde(default)]
    pub consent: ConsentState,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub liabilities: Vec<Liability>,
}
