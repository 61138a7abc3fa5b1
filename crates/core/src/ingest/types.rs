use crate::domain::records::UserRecords;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserListResponse {
    pub users: Vec<String>,
}

/// Structural checks on a delivered bundle. Missing or partial data is fine; inconsistent
/// identity is not.
pub fn validate_records(records: &UserRecords, expected_user: &str) -> Result<()> {
    anyhow::ensure!(
        records.user_id == expected_user,
        "record source user_id mismatch: expected {expected_user}, got {}",
        records.user_id
    );

    let mut account_ids = BTreeSet::new();
    for account in &records.accounts {
        anyhow::ensure!(!account.id.trim().is_empty(), "account id must be non-empty");
        anyhow::ensure!(
            account.user_id == records.user_id,
            "account {} belongs to {}, not {}",
            account.id,
            account.user_id,
            records.user_id
        );
        anyhow::ensure!(
            account_ids.insert(account.id.as_str()),
            "duplicate account id {}",
            account.id
        );
    }

    let mut txn_ids = BTreeSet::new();
    for txn in &records.transactions {
        anyhow::ensure!(!txn.id.trim().is_empty(), "transaction id must be non-empty");
        anyhow::ensure!(
            txn_ids.insert(txn.id.as_str()),
            "duplicate transaction id {}",
            txn.id
        );
        anyhow::ensure!(txn.amount.is_finite(), "transaction {} amount is not finite", txn.id);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(v: serde_json::Value) -> UserRecords {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn accepts_sparse_bundle() {
        let r = records(json!({ "user_id": "u1" }));
        assert!(validate_records(&r, "u1").is_ok());
    }

    #[test]
    fn rejects_identity_mismatches() {
        let r = records(json!({ "user_id": "u2" }));
        assert!(validate_records(&r, "u1").is_err());

        let r = records(json!({
            "user_id": "u1",
            "accounts": [
                { "id": "a", "user_id": "someone_else", "kind": "credit", "balance": 0.0 }
            ]
        }));
        let err = validate_records(&r, "u1").unwrap_err();
        assert!(err.to_string().contains("belongs to someone_else"));
    }

    #[test]
    fn rejects_duplicate_transaction_ids() {
        let r = records(json!({
            "user_id": "u1",
            "transactions": [
                { "id": "t", "account_id": "a", "posted_date": "2026-03-01", "amount": -5.0 },
                { "id": "t", "account_id": "a", "posted_date": "2026-03-02", "amount": -6.0 }
            ]
        }));
        assert!(validate_records(&r, "u1").is_err());
    }
}
