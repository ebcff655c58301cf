use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::kvstore::{ACCOUNTS_KEY, CURRENT_USER_KEY, KeyValueStore, LEGACY_TASKS_KEY, tasks_key};

/// A local account. The password is kept in plaintext to stay readable by
/// existing stores; this is a known security gap, not a guarantee.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("please enter username and password")]
    EmptyCredentials,

    #[error("user '{0}' already exists; try signing in")]
    DuplicateAccount(String),

    #[error("invalid credentials; please try again")]
    InvalidCredentials,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

/// Account list and session pointer on top of a key-value store.
#[derive(Debug)]
pub struct AccountStore<S> {
    store: S,
}

impl<S: KeyValueStore> AccountStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    /// All accounts. An unreadable or corrupt list reads as empty.
    #[instrument(skip(self))]
    pub fn accounts(&self) -> Vec<Account> {
        let raw = match self.store.get(ACCOUNTS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return vec![],
            Err(err) => {
                warn!(error = %err, "failed reading accounts; treating as empty");
                return vec![];
            }
        };
        match serde_json::from_str(&raw) {
            Ok(accounts) => accounts,
            Err(err) => {
                warn!(error = %err, "corrupt accounts list; treating as empty");
                vec![]
            }
        }
    }

    fn save_accounts(&mut self, accounts: &[Account]) -> anyhow::Result<()> {
        let raw = serde_json::to_string(accounts)?;
        self.store.set(ACCOUNTS_KEY, &raw)
    }

    pub fn find_account(&self, username: &str) -> Option<Account> {
        let wanted = normalize_username(username);
        self.accounts()
            .into_iter()
            .find(|account| normalize_username(&account.username) == wanted)
    }

    #[instrument(skip(self, password))]
    pub fn create_account(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<Account, AccountError> {
        if self.find_account(username).is_some() {
            return Err(AccountError::DuplicateAccount(username.trim().to_string()));
        }

        let account = Account {
            username: username.trim().to_string(),
            password: password.to_string(),
        };
        let mut accounts = self.accounts();
        accounts.push(account.clone());
        self.save_accounts(&accounts)?;

        info!(username = %account.username, "account created");
        Ok(account)
    }

    #[instrument(skip(self, password))]
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Account, AccountError> {
        match self.find_account(username) {
            Some(account) if account.password == password => Ok(account),
            _ => {
                debug!("authentication rejected");
                Err(AccountError::InvalidCredentials)
            }
        }
    }

    pub fn current_user(&self) -> anyhow::Result<Option<String>> {
        Ok(self
            .store
            .get(CURRENT_USER_KEY)?
            .filter(|user| !user.trim().is_empty()))
    }

    #[instrument(skip(self))]
    pub fn set_session(&mut self, username: &str) -> anyhow::Result<()> {
        if username.is_empty() {
            return Ok(());
        }
        self.store.set(CURRENT_USER_KEY, username)
    }

    #[instrument(skip(self))]
    pub fn clear_session(&mut self) -> anyhow::Result<()> {
        self.store.remove(CURRENT_USER_KEY)
    }

    /// Creates an account and signs it in.
    pub fn sign_up(&mut self, username: &str, password: &str) -> Result<Account, AccountError> {
        validate_credentials(username, password)?;
        let account = self.create_account(username, password)?;
        self.start_session(&account)?;
        Ok(account)
    }

    /// Signs in as the stored spelling of the matching account.
    pub fn sign_in(&mut self, username: &str, password: &str) -> Result<Account, AccountError> {
        validate_credentials(username, password)?;
        let account = self.authenticate(username, password)?;
        self.start_session(&account)?;
        Ok(account)
    }

    pub fn sign_out(&mut self) -> anyhow::Result<()> {
        info!("signing out");
        self.clear_session()
    }

    fn start_session(&mut self, account: &Account) -> anyhow::Result<()> {
        self.set_session(&account.username)?;
        self.migrate_legacy_tasks(&account.username)?;
        info!(username = %account.username, "session started");
        Ok(())
    }

    /// Copies the pre-account task collection into `username`'s namespace
    /// when that user has none yet. The legacy copy is left in place.
    /// Returns whether a copy happened.
    #[instrument(skip(self))]
    pub fn migrate_legacy_tasks(&mut self, username: &str) -> anyhow::Result<bool> {
        let user_key = tasks_key(Some(username));
        let Some(legacy) = self.store.get(LEGACY_TASKS_KEY)? else {
            return Ok(false);
        };
        if self.store.get(&user_key)?.is_some() {
            debug!("user already has a collection; legacy copy ignored");
            return Ok(false);
        }

        self.store.set(&user_key, &legacy)?;
        info!(key = %user_key, "migrated legacy task collection");
        Ok(true)
    }
}

fn validate_credentials(username: &str, password: &str) -> Result<(), AccountError> {
    if username.trim().is_empty() || password.is_empty() {
        return Err(AccountError::EmptyCredentials);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{AccountError, AccountStore, normalize_username};
    use crate::kvstore::{KeyValueStore, MemoryStore};

    #[test]
    fn normalizes_by_trim_and_lowercase() {
        assert_eq!(normalize_username("  Alice "), "alice");
    }

    #[test]
    fn duplicate_check_is_case_insensitive() {
        let mut accounts = AccountStore::new(MemoryStore::new());
        accounts.create_account("Alice", "pw1").expect("create");

        let err = accounts
            .create_account(" alice", "other")
            .expect_err("duplicate must fail");
        assert!(matches!(err, AccountError::DuplicateAccount(_)));
        assert_eq!(accounts.accounts().len(), 1);
    }

    #[test]
    fn authenticate_requires_exact_password() {
        let mut accounts = AccountStore::new(MemoryStore::new());
        accounts.create_account("Alice", "pw1").expect("create");

        let found = accounts.authenticate("ALICE", "pw1").expect("auth");
        assert_eq!(found.username, "Alice");
        assert!(matches!(
            accounts.authenticate("alice", "PW1"),
            Err(AccountError::InvalidCredentials)
        ));
        assert!(matches!(
            accounts.authenticate("bob", "pw1"),
            Err(AccountError::InvalidCredentials)
        ));
    }

    #[test]
    fn sign_in_uses_stored_username_for_session() {
        let mut accounts = AccountStore::new(MemoryStore::new());
        accounts.sign_up("Alice", "pw1").expect("sign up");
        accounts.sign_out().expect("sign out");
        assert_eq!(accounts.current_user().expect("current"), None);

        accounts.sign_in("alice", "pw1").expect("sign in");
        assert_eq!(
            accounts.current_user().expect("current").as_deref(),
            Some("Alice")
        );
    }

    #[test]
    fn empty_credentials_are_rejected() {
        let mut accounts = AccountStore::new(MemoryStore::new());
        assert!(matches!(
            accounts.sign_up("   ", "pw"),
            Err(AccountError::EmptyCredentials)
        ));
        assert!(matches!(
            accounts.sign_in("alice", ""),
            Err(AccountError::EmptyCredentials)
        ));
        assert!(accounts.accounts().is_empty());
    }

    #[test]
    fn corrupt_account_list_reads_as_empty() {
        let mut store = MemoryStore::new();
        store.set("accounts", "{not json").expect("set");
        let accounts = AccountStore::new(store);
        assert!(accounts.accounts().is_empty());
        assert!(accounts.find_account("anyone").is_none());
    }

    #[test]
    fn legacy_collection_is_copied_once_and_never_overwrites() {
        let mut store = MemoryStore::new();
        store.set("tasks", "[\"legacy\"]").expect("seed legacy");
        store.set("tasks:Bob", "[\"bob\"]").expect("seed bob");
        let mut accounts = AccountStore::new(store);

        assert!(accounts.migrate_legacy_tasks("Alice").expect("migrate alice"));
        assert!(!accounts.migrate_legacy_tasks("Bob").expect("migrate bob"));

        let store = accounts.into_inner();
        assert_eq!(
            store.get("tasks:Alice").expect("get").as_deref(),
            Some("[\"legacy\"]")
        );
        assert_eq!(
            store.get("tasks:Bob").expect("get").as_deref(),
            Some("[\"bob\"]")
        );
        assert!(store.get("tasks").expect("get legacy").is_some());
    }
}
