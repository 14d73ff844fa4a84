//! Subscription filter construction.
//!
//! Filter groups are only emitted when their inputs are non-empty. An absent
//! group means "no filter of this kind"; an empty group would instead ask the
//! server for every update of that kind.

use std::collections::BTreeMap;

use crate::stream::proto::{
    CommitmentLevel, SubscribeRequest, SubscribeRequestFilterAccounts,
    SubscribeRequestFilterTransactions,
};

/// Name of the account filter group in outgoing requests.
pub const ACCOUNT_FILTER_NAME: &str = "account_sub";
/// Name of the transaction filter group in outgoing requests.
pub const TRANSACTION_FILTER_NAME: &str = "transaction_sub";

/// Address lists that scope a subscription.
///
/// Lists are forwarded as given: order and duplicates are preserved.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddressFilters {
    /// Account addresses to watch.
    pub accounts: Vec<String>,
    /// Owner program addresses whose accounts should be watched.
    pub owners: Vec<String>,
    /// Addresses that must appear in a transaction for it to be delivered.
    pub signers: Vec<String>,
}

impl AddressFilters {
    /// Bundles the three address lists.
    pub fn new(accounts: Vec<String>, owners: Vec<String>, signers: Vec<String>) -> Self {
        Self {
            accounts,
            owners,
            signers,
        }
    }

    /// Returns true when no filter group would be emitted.
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.owners.is_empty() && self.signers.is_empty()
    }
}

/// Builds the single subscribe request sent at the start of a session.
pub fn build_subscribe_request(
    filters: &AddressFilters,
    commitment: Option<CommitmentLevel>,
) -> SubscribeRequest {
    let mut accounts = BTreeMap::new();
    if !filters.accounts.is_empty() || !filters.owners.is_empty() {
        accounts.insert(
            ACCOUNT_FILTER_NAME.to_string(),
            SubscribeRequestFilterAccounts {
                account: filters.accounts.clone(),
                owner: filters.owners.clone(),
            },
        );
    }

    let mut transactions = BTreeMap::new();
    if !filters.signers.is_empty() {
        transactions.insert(
            TRANSACTION_FILTER_NAME.to_string(),
            SubscribeRequestFilterTransactions {
                account_include: filters.signers.clone(),
                ..Default::default()
            },
        );
    }

    SubscribeRequest {
        accounts,
        transactions,
        commitment: commitment.map(i32::from),
    }
}

/// Renders a request as canonical JSON for logging.
pub fn render_subscribe_request(request: &SubscribeRequest) -> Result<String, serde_json::Error> {
    serde_json::to_string(request)
}
