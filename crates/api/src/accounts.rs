// Path: crates/api/src/accounts.rs

//! Read access to the account store, used by the mempool admission path.

use crate::sql::Executor;
use async_trait::async_trait;
use meridian_types::error::SqlError;

/// Balance and nonce of an account as the chain sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Account {
    /// Spendable balance.
    pub balance: i128,
    /// Last confirmed nonce; the next valid transaction carries `nonce + 1`.
    pub nonce: u64,
}

/// Read access to confirmed account state.
#[async_trait]
pub trait AccountReader: Send + Sync {
    /// The confirmed state of an account; unknown accounts are zero-valued.
    async fn get_account(&self, tx: &dyn Executor, account: &[u8]) -> Result<Account, SqlError>;
}
