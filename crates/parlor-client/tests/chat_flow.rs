/// Integration test: drive a full client session against an in-memory store
/// and check the grouped view, roster and subscription scoping it produces.

use std::sync::Arc;
use std::time::Duration;

use parlor_client::{ChatClient, ChatView, Config, Directory, DispatchError};
use parlor_db::Database;
use parlor_presence::PresenceHub;
use parlor_types::Address;

const DIRECTORY: &str = r#"{
    "accounts": [
        { "address": "0xAlice", "owner": "0xWalletA", "username": "alice" },
        { "address": "0xBob", "owner": "0xWalletB", "username": "bob" }
    ],
    "apps": [
        { "address": "0xBuilders", "name": "Builders", "owner": "0xAlice" },
        { "address": "0xGardeners", "name": "Gardeners", "owner": "0xAlice" }
    ],
    "admins": {}
}"#;

fn addr(raw: &str) -> Address {
    Address::parse(raw).unwrap()
}

fn client(db: &Arc<Database>, hub: &PresenceHub) -> ChatClient<Directory> {
    let directory = Directory::from_json(DIRECTORY).unwrap();
    ChatClient::new(&Config::default(), db.clone(), hub.clone(), directory)
}

async fn login(client: &mut ChatClient<Directory>, wallet: &str, account: &str) {
    client.connect_wallet(addr(wallet)).unwrap();
    client.login(&addr(account)).await.unwrap();
}

/// Re-sync until the view satisfies `check`.
async fn eventually<F>(client: &mut ChatClient<Directory>, check: F) -> ChatView
where
    F: Fn(&ChatView) -> bool,
{
    for _ in 0..200 {
        client.sync().await;
        let view = client.view().await;
        if check(&view) {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("view never reached the expected state");
}

#[tokio::test]
async fn two_clients_chat_in_one_channel() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let hub = PresenceHub::new();

    let mut alice = client(&db, &hub);
    let mut bob = client(&db, &hub);
    login(&mut alice, "0xWalletA", "0xAlice").await;
    login(&mut bob, "0xWalletB", "0xBob").await;

    let mut draft = "0xBuilders".to_string();
    let server = alice.create_server(&mut draft).await.unwrap();
    assert!(draft.is_empty());
    assert_eq!(server.name, "Builders");
    assert_eq!(server.owner, addr("0xalice"));

    bob.join_server(&server).await.unwrap();
    alice.select_server(Some(server.clone())).await;
    bob.select_server(Some(server.clone())).await;

    let mut draft = "general".to_string();
    let channel = alice.create_channel(&mut draft).await.unwrap();
    alice.select_channel(channel.clone()).await.unwrap();
    bob.select_channel(channel.clone()).await.unwrap();

    for text in ["hi", "anyone here?"] {
        let mut draft = text.to_string();
        alice.send_message(&mut draft).await.unwrap();
    }
    let mut draft = "hey @alice".to_string();
    bob.send_message(&mut draft).await.unwrap();

    let view = eventually(&mut bob, |v| {
        v.groups.iter().map(|g| g.messages.len()).sum::<usize>() == 3 && v.roster.len() == 2
    })
    .await;

    assert_eq!(view.groups.len(), 2);
    assert_eq!(view.groups[0].display_name, "alice");
    assert_eq!(view.groups[0].messages.len(), 2);
    assert!(!view.groups[0].is_self);
    assert_eq!(view.groups[1].display_name, "bob");
    assert!(view.groups[1].is_self);

    assert!(view.roster.online.iter().all(|e| e.is_online));
    assert_eq!(view.roster.online.len(), 2);
    assert!(view.roster.online[0].is_self);

    // Only alice was mentioned
    assert!(!bob.view().await.title.starts_with("• "));
    let alice_view = eventually(&mut alice, |v| v.title.starts_with("• ")).await;
    assert_eq!(alice_view.title, "• parlor");
}

#[tokio::test]
async fn switching_server_unbinds_message_subscription() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let hub = PresenceHub::new();
    let mut alice = client(&db, &hub);
    login(&mut alice, "0xWalletA", "0xAlice").await;

    let mut draft = "0xBuilders".to_string();
    let builders = alice.create_server(&mut draft).await.unwrap();
    let mut draft = "0xGardeners".to_string();
    let gardeners = alice.create_server(&mut draft).await.unwrap();

    alice.select_server(Some(builders.clone())).await;
    let mut draft = "general".to_string();
    let channel = alice.create_channel(&mut draft).await.unwrap();
    alice.select_channel(channel).await.unwrap();
    assert!(alice.message_scope().is_some());

    alice.select_server(Some(gardeners)).await;
    assert_eq!(alice.selection().channel, None);
    assert_eq!(alice.message_scope(), None);

    let view = alice.view().await;
    assert!(view.groups.is_empty());
}

#[tokio::test]
async fn owner_deletes_channel_and_selection_clears() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let hub = PresenceHub::new();
    let mut alice = client(&db, &hub);
    let mut bob = client(&db, &hub);
    login(&mut alice, "0xWalletA", "0xAlice").await;
    login(&mut bob, "0xWalletB", "0xBob").await;

    let mut draft = "0xBuilders".to_string();
    let server = alice.create_server(&mut draft).await.unwrap();
    bob.join_server(&server).await.unwrap();
    alice.select_server(Some(server.clone())).await;
    bob.select_server(Some(server)).await;

    let mut draft = "random".to_string();
    let channel = alice.create_channel(&mut draft).await.unwrap();
    bob.select_channel(channel.clone()).await.unwrap();

    assert!(!bob.can_delete_channels());
    let err = bob.delete_channel(&channel).await.unwrap_err();
    assert!(matches!(err, DispatchError::NotAuthorized { .. }));

    assert!(alice.can_delete_channels());
    alice.select_channel(channel.clone()).await.unwrap();
    alice.delete_channel(&channel).await.unwrap();
    assert_eq!(alice.selection().channel, None);

    let view = eventually(&mut alice, |v| v.channels.is_empty()).await;
    assert!(view.groups.is_empty());
}

#[tokio::test]
async fn logout_tears_down_presence_and_queries() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let hub = PresenceHub::new();
    let mut alice = client(&db, &hub);
    login(&mut alice, "0xWalletA", "0xAlice").await;

    let mut draft = "0xBuilders".to_string();
    let server = alice.create_server(&mut draft).await.unwrap();
    alice.select_server(Some(server)).await;
    assert_eq!(hub.connection_count("server:0xbuilders").await, 1);

    alice.logout().await;
    assert_eq!(hub.connection_count("server:0xbuilders").await, 0);

    let view = alice.view().await;
    assert!(view.servers.is_empty());
    assert!(view.roster.is_empty());

    let mut draft = "hello".to_string();
    let err = alice.send_message(&mut draft).await.unwrap_err();
    assert!(matches!(err, DispatchError::NotSignedIn));
    assert_eq!(draft, "hello");
}

#[tokio::test]
async fn roster_follows_new_members_without_resync() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let hub = PresenceHub::new();
    let mut alice = client(&db, &hub);
    let mut bob = client(&db, &hub);
    login(&mut alice, "0xWalletA", "0xAlice").await;
    login(&mut bob, "0xWalletB", "0xBob").await;

    let mut draft = "0xBuilders".to_string();
    let server = alice.create_server(&mut draft).await.unwrap();
    alice.select_server(Some(server.clone())).await;
    assert_eq!(alice.view().await.roster.len(), 1);

    bob.join_server(&server).await.unwrap();

    // Only view() from here on: the membership push alone must reach the roster
    let mut roster = alice.view().await.roster;
    for _ in 0..200 {
        if roster.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        roster = alice.view().await.roster;
    }

    assert_eq!(roster.len(), 2);
    let bob_entry = roster.offline.iter().find(|e| e.address == addr("0xbob")).unwrap();
    assert!(!bob_entry.is_online);
    assert!(roster.online[0].is_self);
}
