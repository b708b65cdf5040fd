use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use parlor_db::Database;
use parlor_presence::{PresenceHandle, PresenceHub, server_room};
use parlor_types::api::{Field, Filter};
use parlor_types::{Address, Channel, Message, PresencePayload, Server, ServerMember, User};

use crate::config::Config;
use crate::dispatch::Mutations;
use crate::error::{DispatchError, SelectionError, SessionError};
use crate::grouping::{MessageGroup, group_messages, sort_for_display};
use crate::identity::{Account, IdentityProvider, is_admin};
use crate::mentions::{Mentions, mentions_account};
use crate::roster::{Roster, build_roster};
use crate::selection::{Selection, SelectionStore};
use crate::session::Session;
use crate::subscription::QuerySlot;

const WINDOW_TITLE: &str = "parlor";

/// Owned, render-ready message group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupView {
    pub sender_id: Address,
    pub display_name: String,
    pub avatar: Option<String>,
    pub avatar_fallback: String,
    pub is_self: bool,
    pub messages: Vec<Message>,
}

impl From<MessageGroup<'_>> for GroupView {
    fn from(group: MessageGroup<'_>) -> Self {
        Self {
            sender_id: group.sender_id.clone(),
            display_name: group.display_name().to_string(),
            avatar: group.avatar().map(str::to_string),
            avatar_fallback: group.avatar_fallback(),
            is_self: group.is_self,
            messages: group.messages.into_iter().cloned().collect(),
        }
    }
}

/// Everything the render layer needs for one frame.
#[derive(Debug, Clone)]
pub struct ChatView {
    pub selection: Selection,
    pub servers: Vec<Server>,
    pub channels: Vec<Channel>,
    pub groups: Vec<GroupView>,
    pub roster: Roster,
    pub loading: bool,
    pub error: Option<String>,
    pub title: String,
}

/// Coordinates session, selection, live queries and presence for one client.
pub struct ChatClient<I> {
    identity: I,
    hub: PresenceHub,
    mutations: Mutations,
    session: Session,
    selection: SelectionStore,

    servers: QuerySlot<Server>,
    channels: QuerySlot<Channel>,
    messages: QuerySlot<Message>,
    members: QuerySlot<ServerMember>,
    users: QuerySlot<User>,

    presence: Option<PresenceHandle>,
    published: Option<PresencePayload>,

    /// Identity-protocol accounts resolved so far, by address
    accounts: HashMap<Address, Account>,
    requested: HashSet<Address>,
    admins: Vec<Address>,
    admins_for: Option<Address>,

    mentions: Mentions,
    scanned: HashSet<Uuid>,
}

impl<I: IdentityProvider> ChatClient<I> {
    pub fn new(config: &Config, db: Arc<Database>, hub: PresenceHub, identity: I) -> Self {
        Self {
            identity,
            hub,
            mutations: Mutations::new(db.clone()),
            session: Session::new(config.require_passkey, config.app_address.clone()),
            selection: SelectionStore::new(),
            servers: QuerySlot::new(db.clone()),
            channels: QuerySlot::new(db.clone()),
            messages: QuerySlot::new(db.clone()),
            members: QuerySlot::new(db.clone()),
            users: QuerySlot::new(db),
            presence: None,
            published: None,
            accounts: HashMap::new(),
            requested: HashSet::new(),
            admins: Vec::new(),
            admins_for: None,
            mentions: Mentions::default(),
            scanned: HashSet::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn selection(&self) -> Selection {
        self.selection.current()
    }

    pub fn mutations(&self) -> &Mutations {
        &self.mutations
    }

    pub fn accounts(&self) -> &HashMap<Address, Account> {
        &self.accounts
    }

    pub fn mentions_mut(&mut self) -> &mut Mentions {
        &mut self.mentions
    }

    /// Scope key the message subscription is currently bound to.
    pub fn message_scope(&self) -> Option<&Filter> {
        self.messages.scope()
    }

    /// Gate for rendering admin-only actions.
    pub fn can_delete_channels(&self) -> bool {
        let Some(account) = self.session.ready_account() else {
            return false;
        };
        let owns_server = self
            .selection
            .current()
            .server
            .is_some_and(|s| s.owner == account.address);
        owns_server || is_admin(&self.admins, &account.address)
    }

    fn ready_account(&self) -> Result<Account, DispatchError> {
        self.session
            .ready_account()
            .cloned()
            .ok_or(DispatchError::NotSignedIn)
    }

    // -- Session --

    pub fn connect_wallet(&mut self, wallet: Address) -> Result<(), SessionError> {
        self.session.connect_wallet(wallet)
    }

    pub async fn available_accounts(&self) -> Result<Vec<Account>, SessionError> {
        self.session.available_accounts(&self.identity).await
    }

    pub async fn login(&mut self, account: &Address) -> Result<Account, SessionError> {
        let account = self
            .session
            .authenticate(&self.identity, &self.mutations, account)
            .await?
            .clone();
        self.sync().await;
        Ok(account)
    }

    pub fn enroll_passkey(&mut self) -> Result<(), SessionError> {
        self.session.enroll_passkey()
    }

    pub async fn finish_login(&mut self) -> Result<Account, SessionError> {
        let account = self.session.finish()?.clone();
        self.sync().await;
        Ok(account)
    }

    pub async fn fail_passkey(&mut self) -> Result<(), SessionError> {
        self.session.fail_passkey()?;
        self.sync().await;
        Ok(())
    }

    pub async fn logout(&mut self) {
        self.session.disconnect();
        self.selection.select_server(None);
        self.mentions.clear();
        self.sync().await;
    }

    // -- Selection --

    pub async fn select_server(&mut self, server: Option<Server>) {
        self.selection.select_server(server);
        self.sync().await;
    }

    pub async fn select_channel(&mut self, channel: Channel) -> Result<(), SelectionError> {
        self.selection.select_channel(channel)?;
        self.sync().await;
        Ok(())
    }

    // -- Writes --

    pub async fn create_server(&mut self, draft: &mut String) -> Result<Server, DispatchError> {
        let account = self.ready_account()?;
        let server = self
            .mutations
            .create_server(&self.identity, &account, draft)
            .await?;
        self.mutations.join_server(&account, &server).await?;
        Ok(server)
    }

    pub async fn join_server(&mut self, server: &Server) -> Result<ServerMember, DispatchError> {
        let account = self.ready_account()?;
        let member = self.mutations.join_server(&account, server).await?;
        self.sync().await;
        Ok(member)
    }

    pub async fn create_channel(&mut self, draft: &mut String) -> Result<Channel, DispatchError> {
        self.ready_account()?;
        self.mutations
            .create_channel(&self.selection.current(), draft)
            .await
    }

    pub async fn send_message(&mut self, draft: &mut String) -> Result<Message, DispatchError> {
        let account = self.ready_account()?;
        self.mutations
            .send_message(&self.selection.current(), &account, draft)
            .await
    }

    pub async fn delete_channel(&mut self, channel: &Channel) -> Result<(), DispatchError> {
        let account = self.ready_account()?;
        let server = self
            .selection
            .current()
            .server
            .ok_or(DispatchError::NoServerSelected)?;
        self.mutations
            .delete_channel(&account, &self.admins, &server, channel)
            .await?;
        self.selection.forget_channel(channel.id);
        self.sync().await;
        Ok(())
    }

    // -- Coordination --

    /// Bring subscriptions, presence, resolved identities and mentions in line
    /// with the current session and selection.
    pub async fn sync(&mut self) {
        let account = self.session.ready_account().cloned();
        let selection = self.selection.current();
        let active = account.is_some();

        let server_id = selection.server_id().filter(|_| active);
        let channel_id = selection.channel_id().filter(|_| active);

        self.servers.rescope(active.then_some(Filter::All));
        self.channels
            .rescope(server_id.map(|id| Filter::eq(Field::ServerId, id)));
        self.members
            .rescope(server_id.map(|id| Filter::eq(Field::ServerId, id)));
        self.messages
            .rescope(channel_id.map(|id| Filter::eq(Field::ChannelId, id)));

        // Member user ids only exist once the membership query has landed
        self.members.settled().await;
        self.follow_members().await;

        let server = selection.server.as_ref().filter(|_| active);
        self.sync_presence(account.as_ref(), server).await;
        self.sync_admins(server).await;
        self.sync_identities().await;
        self.scan_mentions(account.as_ref()).await;
    }

    /// Keep the users query scoped to the ids in the latest membership rows.
    async fn follow_members(&mut self) {
        let scope = self.members.scope().map(|_| {
            let mut user_ids: Vec<Uuid> =
                self.members.state().data.iter().map(|m| m.user_id).collect();
            // Row order is unspecified; keep the scope key stable
            user_ids.sort();
            Filter::is_in(Field::Id, user_ids)
        });
        if self.users.rescope(scope) {
            self.users.settled().await;
        }
    }

    async fn sync_presence(&mut self, account: Option<&Account>, server: Option<&Server>) {
        let desired = server.map(|s| server_room(&s.address));

        if self.presence.as_ref().map(PresenceHandle::room) != desired.as_deref() {
            if let Some(old) = self.presence.take() {
                old.leave().await;
            }
            self.published = None;
            if let Some(room) = desired {
                self.presence = Some(self.hub.join(room).await);
            }
        }

        let (Some(handle), Some(account)) = (&self.presence, account) else {
            return;
        };
        let payload = account.presence();
        if self.published.as_ref() != Some(&payload) {
            debug!("Publishing presence for {} in {}", payload.address, handle.room());
            handle.publish(payload.clone()).await;
            self.published = Some(payload);
        }
    }

    async fn sync_admins(&mut self, server: Option<&Server>) {
        let app = server.map(|s| s.address.clone());
        if app == self.admins_for {
            return;
        }
        self.admins = match &app {
            Some(app) => self.identity.fetch_admins(app).await.unwrap_or_else(|e| {
                warn!("Failed to fetch admins for {}: {:#}", app, e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        self.admins_for = app;
    }

    async fn sync_identities(&mut self) {
        let mut wanted: Vec<Address> = self
            .messages
            .state()
            .data
            .into_iter()
            .filter_map(|m| m.sender_id)
            .chain(self.users.state().data.into_iter().map(|u| u.address))
            .collect();
        if let Some(handle) = &self.presence {
            wanted.extend(handle.peers().await.into_values().map(|p| p.address));
        }
        wanted.retain(|a| !self.requested.contains(a));
        wanted.sort();
        wanted.dedup();
        if wanted.is_empty() {
            return;
        }

        self.requested.extend(wanted.iter().cloned());
        match self.identity.fetch_accounts(&wanted).await {
            Ok(accounts) => {
                debug!("Resolved {} of {} identities", accounts.len(), wanted.len());
                for account in accounts {
                    self.accounts.insert(account.address.clone(), account);
                }
            }
            Err(e) => {
                warn!("Identity lookup failed: {:#}", e);
                // Allow a retry on the next sync
                for address in &wanted {
                    self.requested.remove(address);
                }
            }
        }
    }

    async fn scan_mentions(&mut self, account: Option<&Account>) {
        let Some(account) = account else {
            return;
        };
        let messages = self.messages.settled().await;
        for message in &messages.data {
            if self.scanned.insert(message.id) && mentions_account(message, account) {
                info!("Mentioned in message {}", message.id);
                self.mentions.add(message.id);
            }
        }
    }

    /// Snapshot the current view model. Membership changes pushed since the
    /// last `sync` are followed here.
    pub async fn view(&mut self) -> ChatView {
        self.follow_members().await;

        let selection = self.selection.current();
        let servers = self.servers.state();
        let channels = self.channels.state();
        let mut messages = self.messages.state();
        let users = self.users.state();

        let self_address = self.session.ready_account().map(|a| a.address.clone());

        sort_for_display(&mut messages.data);
        let groups: Vec<GroupView> =
            group_messages(&messages.data, &self.accounts, self_address.as_ref())
                .map(GroupView::from)
                .collect();

        let (peers, me) = match &self.presence {
            Some(handle) => (handle.peers().await, handle.me().await),
            None => (HashMap::new(), None),
        };
        let roster = build_roster(peers.values(), me.as_ref(), &users.data, self_address.as_ref());

        let mut server_list = servers.data;
        server_list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        let mut channel_list = channels.data;
        channel_list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));

        let loading = servers.loading || channels.loading || messages.loading || users.loading;
        let error = [servers.error, channels.error, messages.error, users.error]
            .into_iter()
            .flatten()
            .next();

        ChatView {
            selection,
            servers: server_list,
            channels: channel_list,
            groups,
            roster,
            loading,
            error,
            title: self.mentions.title(WINDOW_TITLE),
        }
    }
}
