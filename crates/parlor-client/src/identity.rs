//! Identity protocol seam.
//!
//! The hosted identity protocol (account discovery, login, profile and app
//! metadata) sits behind [`IdentityProvider`]. [`Directory`] is the
//! in-process implementation used for local runs and tests.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::info;

use parlor_types::{Address, PresencePayload};

/// An authenticated identity-protocol account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    /// Wallet that manages this account.
    pub owner: Address,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

impl Account {
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.trim().is_empty())
    }

    /// Username, or the address when the account has none.
    pub fn display_name(&self) -> &str {
        self.username().unwrap_or(self.address.as_str())
    }

    pub fn presence(&self) -> PresencePayload {
        PresencePayload {
            address: self.address.clone(),
            name: self.username().map(str::to_string),
            avatar: self.picture.clone(),
        }
    }
}

/// App metadata used to seed a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub address: Address,
    #[serde(default)]
    pub owner: Option<Address>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
}

pub trait IdentityProvider: Send + Sync {
    /// Accounts a wallet may sign in as.
    fn accounts_managed_by(&self, wallet: &Address) -> impl Future<Output = Result<Vec<Account>>> + Send;

    /// Sign `wallet` in as `account`, scoped to `app` when given.
    fn authenticate(
        &self,
        wallet: &Address,
        account: &Address,
        app: Option<&Address>,
    ) -> impl Future<Output = Result<Account>> + Send;

    /// Bulk account lookup. Unknown addresses are omitted.
    fn fetch_accounts(&self, addresses: &[Address]) -> impl Future<Output = Result<Vec<Account>>> + Send;

    fn fetch_app(&self, app: &Address) -> impl Future<Output = Result<Option<AppMetadata>>> + Send;

    fn fetch_admins(&self, app: &Address) -> impl Future<Output = Result<Vec<Address>>> + Send;
}

/// Sender/roster identity lookup used while building view models.
pub trait AccountLookup {
    fn account(&self, address: &Address) -> Option<&Account>;
}

impl AccountLookup for HashMap<Address, Account> {
    fn account(&self, address: &Address) -> Option<&Account> {
        self.get(address)
    }
}

/// No identities resolved yet.
impl AccountLookup for () {
    fn account(&self, _address: &Address) -> Option<&Account> {
        None
    }
}

pub fn accounts_by_address(accounts: impl IntoIterator<Item = Account>) -> HashMap<Address, Account> {
    accounts
        .into_iter()
        .map(|account| (account.address.clone(), account))
        .collect()
}

/// Admin check. Both sides are canonical [`Address`]es, so mixed-case input
/// from different sources compares equal.
pub fn is_admin(admins: &[Address], candidate: &Address) -> bool {
    admins.iter().any(|admin| admin == candidate)
}

/// Static identity directory, loadable from JSON:
///
/// ```json
/// { "accounts": [...], "apps": [...], "admins": { "0xapp": ["0xabc"] } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Directory {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub apps: Vec<AppMetadata>,
    #[serde(default)]
    pub admins: HashMap<Address, Vec<Address>>,
}

impl Directory {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading identity directory {}", path.display()))?;
        let directory = Self::from_json(&raw)?;
        info!(
            "Loaded identity directory: {} accounts, {} apps",
            directory.accounts.len(),
            directory.apps.len()
        );
        Ok(directory)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("parsing identity directory")
    }
}

impl IdentityProvider for Directory {
    async fn accounts_managed_by(&self, wallet: &Address) -> Result<Vec<Account>> {
        Ok(self
            .accounts
            .iter()
            .filter(|a| &a.owner == wallet)
            .cloned()
            .collect())
    }

    async fn authenticate(
        &self,
        wallet: &Address,
        account: &Address,
        _app: Option<&Address>,
    ) -> Result<Account> {
        self.accounts
            .iter()
            .find(|a| &a.address == account && &a.owner == wallet)
            .cloned()
            .ok_or_else(|| anyhow!("account {} is not managed by wallet {}", account, wallet))
    }

    async fn fetch_accounts(&self, addresses: &[Address]) -> Result<Vec<Account>> {
        Ok(self
            .accounts
            .iter()
            .filter(|a| addresses.contains(&a.address))
            .cloned()
            .collect())
    }

    async fn fetch_app(&self, app: &Address) -> Result<Option<AppMetadata>> {
        Ok(self.apps.iter().find(|a| &a.address == app).cloned())
    }

    async fn fetch_admins(&self, app: &Address) -> Result<Vec<Address>> {
        Ok(self.admins.get(app).cloned().unwrap_or_default())
    }
}
