use tracing::{error, info, warn};

use parlor_types::Address;

use crate::dispatch::Mutations;
use crate::error::SessionError;
use crate::identity::{Account, IdentityProvider};

/// Login flow:
/// `Disconnected -> WalletConnected -> Authenticated -> (PasskeyEnrolled) -> Ready`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Disconnected,
    WalletConnected { wallet: Address },
    Authenticated { wallet: Address, account: Account },
    PasskeyEnrolled { wallet: Address, account: Account },
    Ready { wallet: Address, account: Account },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::WalletConnected { .. } => "wallet-connected",
            Self::Authenticated { .. } => "identity-authenticated",
            Self::PasskeyEnrolled { .. } => "passkey-enrolled",
            Self::Ready { .. } => "ready",
        }
    }

    pub fn wallet(&self) -> Option<&Address> {
        match self {
            Self::Disconnected => None,
            Self::WalletConnected { wallet }
            | Self::Authenticated { wallet, .. }
            | Self::PasskeyEnrolled { wallet, .. }
            | Self::Ready { wallet, .. } => Some(wallet),
        }
    }

    fn account(&self) -> Option<&Account> {
        match self {
            Self::Authenticated { account, .. }
            | Self::PasskeyEnrolled { account, .. }
            | Self::Ready { account, .. } => Some(account),
            _ => None,
        }
    }
}

pub struct Session {
    state: SessionState,
    require_passkey: bool,
    app: Option<Address>,
}

impl Session {
    pub fn new(require_passkey: bool, app: Option<Address>) -> Self {
        Self {
            state: SessionState::Disconnected,
            require_passkey,
            app,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Account, once the flow has reached `Ready`. Subscriptions are gated on this.
    pub fn ready_account(&self) -> Option<&Account> {
        match &self.state {
            SessionState::Ready { account, .. } => Some(account),
            _ => None,
        }
    }

    /// Account, from `Authenticated` onwards.
    pub fn authenticated_account(&self) -> Option<&Account> {
        self.state.account()
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            state: self.state.name(),
            action,
        }
    }

    pub fn connect_wallet(&mut self, wallet: Address) -> Result<(), SessionError> {
        if self.state != SessionState::Disconnected {
            return Err(self.invalid("connect a wallet"));
        }
        info!("Wallet {} connected", wallet);
        self.state = SessionState::WalletConnected { wallet };
        Ok(())
    }

    pub async fn available_accounts<I: IdentityProvider>(
        &self,
        identity: &I,
    ) -> Result<Vec<Account>, SessionError> {
        let wallet = self.state.wallet().ok_or_else(|| self.invalid("list accounts"))?;
        Ok(identity.accounts_managed_by(wallet).await?)
    }

    /// Sign in as `account` and record the user in the store. On an identity
    /// error the session stays wallet-connected so the user can retry.
    pub async fn authenticate<I: IdentityProvider>(
        &mut self,
        identity: &I,
        mutations: &Mutations,
        account: &Address,
    ) -> Result<&Account, SessionError> {
        let wallet = match &self.state {
            SessionState::WalletConnected { wallet } => wallet.clone(),
            _ => return Err(self.invalid("authenticate")),
        };

        let managed = identity.accounts_managed_by(&wallet).await?;
        if !managed.iter().any(|a| &a.address == account) {
            return Err(SessionError::AccountNotAvailable(account.clone()));
        }

        let authenticated = identity
            .authenticate(&wallet, account, self.app.as_ref())
            .await
            .inspect_err(|e| warn!("Authentication as {} failed: {:#}", account, e))?;

        // Login still succeeds if the user record can't be written; joining a
        // server will report the missing user instead.
        if let Err(e) = mutations.upsert_user(&authenticated, &wallet).await {
            error!("Failed to upsert user {}: {}", authenticated.address, e);
        }

        info!("Authenticated as {}", authenticated.display_name());
        self.state = if self.require_passkey {
            SessionState::Authenticated {
                wallet,
                account: authenticated,
            }
        } else {
            SessionState::Ready {
                wallet,
                account: authenticated,
            }
        };
        self.authenticated_account()
            .ok_or_else(|| self.invalid("authenticate"))
    }

    pub fn enroll_passkey(&mut self) -> Result<(), SessionError> {
        let SessionState::Authenticated { wallet, account } = &self.state else {
            return Err(self.invalid("enroll a passkey"));
        };
        self.state = SessionState::PasskeyEnrolled {
            wallet: wallet.clone(),
            account: account.clone(),
        };
        Ok(())
    }

    /// Finish the flow after a passkey was enrolled.
    pub fn finish(&mut self) -> Result<&Account, SessionError> {
        let SessionState::PasskeyEnrolled { wallet, account } = &self.state else {
            return Err(self.invalid("finish login"));
        };
        let (wallet, account) = (wallet.clone(), account.clone());
        self.state = SessionState::Ready { wallet, account };
        self.ready_account().ok_or_else(|| self.invalid("finish login"))
    }

    /// A failed passkey ceremony sends the flow back to the start. Only
    /// valid while the passkey step is in progress.
    pub fn fail_passkey(&mut self) -> Result<(), SessionError> {
        if !matches!(
            self.state,
            SessionState::Authenticated { .. } | SessionState::PasskeyEnrolled { .. }
        ) {
            return Err(self.invalid("fail the passkey step"));
        }
        warn!("Passkey step failed in state {}, resetting", self.state.name());
        self.state = SessionState::Disconnected;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.state != SessionState::Disconnected {
            info!("Session disconnected");
        }
        self.state = SessionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parlor_db::Database;
    use parlor_types::User;
    use parlor_types::api::Filter;

    use crate::identity::Directory;

    fn addr(raw: &str) -> Address {
        Address::parse(raw).unwrap()
    }

    fn directory() -> Directory {
        Directory::from_json(
            r#"{ "accounts": [ { "address": "0xAlice", "owner": "0xWallet", "username": "alice" } ] }"#,
        )
        .unwrap()
    }

    fn fixtures() -> (Arc<Database>, Mutations) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mutations = Mutations::new(db.clone());
        (db, mutations)
    }

    #[tokio::test]
    async fn test_login_without_passkey_reaches_ready_and_upserts_user() {
        let (db, mutations) = fixtures();
        let identity = directory();
        let mut session = Session::new(false, None);

        session.connect_wallet(addr("0xWALLET")).unwrap();
        assert!(session.ready_account().is_none());

        let accounts = session.available_accounts(&identity).await.unwrap();
        assert_eq!(accounts.len(), 1);

        session
            .authenticate(&identity, &mutations, &addr("0xalice"))
            .await
            .unwrap();
        assert_eq!(session.state().name(), "ready");
        assert_eq!(session.ready_account().unwrap().username(), Some("alice"));

        let users: Vec<User> = db.fetch(&Filter::All).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].owner, addr("0xwallet"));
    }

    #[tokio::test]
    async fn test_passkey_flow_and_failure_reset() {
        let (_db, mutations) = fixtures();
        let identity = directory();
        let mut session = Session::new(true, None);

        session.connect_wallet(addr("0xwallet")).unwrap();
        session
            .authenticate(&identity, &mutations, &addr("0xalice"))
            .await
            .unwrap();
        assert_eq!(session.state().name(), "identity-authenticated");
        assert!(session.ready_account().is_none());
        assert!(session.finish().is_err());

        session.enroll_passkey().unwrap();
        session.fail_passkey().unwrap();
        assert_eq!(session.state(), &SessionState::Disconnected);

        session.connect_wallet(addr("0xwallet")).unwrap();
        session
            .authenticate(&identity, &mutations, &addr("0xalice"))
            .await
            .unwrap();
        session.enroll_passkey().unwrap();
        session.finish().unwrap();
        assert!(session.ready_account().is_some());
    }

    #[tokio::test]
    async fn test_fail_passkey_outside_passkey_step_is_invalid() {
        let (_db, mutations) = fixtures();
        let identity = directory();
        let mut session = Session::new(false, None);

        assert!(matches!(
            session.fail_passkey(),
            Err(SessionError::InvalidTransition { .. })
        ));

        session.connect_wallet(addr("0xwallet")).unwrap();
        assert!(session.fail_passkey().is_err());
        assert_eq!(session.state().name(), "wallet-connected");

        session
            .authenticate(&identity, &mutations, &addr("0xalice"))
            .await
            .unwrap();
        assert!(session.fail_passkey().is_err());
        assert_eq!(session.state().name(), "ready");
        assert!(session.finish().is_err());
    }

    #[tokio::test]
    async fn test_unmanaged_account_is_refused() {
        let (_db, mutations) = fixtures();
        let identity = directory();
        let mut session = Session::new(false, None);

        assert!(matches!(
            session.authenticate(&identity, &mutations, &addr("0xalice")).await,
            Err(SessionError::InvalidTransition { .. })
        ));

        session.connect_wallet(addr("0xother")).unwrap();
        assert!(matches!(
            session.authenticate(&identity, &mutations, &addr("0xalice")).await,
            Err(SessionError::AccountNotAvailable(_))
        ));
        assert_eq!(session.state().name(), "wallet-connected");
    }

    #[test]
    fn test_connect_twice_is_invalid() {
        let mut session = Session::new(false, None);
        session.connect_wallet(addr("0xw")).unwrap();
        assert!(session.connect_wallet(addr("0xw")).is_err());
        session.disconnect();
        assert!(session.connect_wallet(addr("0xw")).is_ok());
    }
}
