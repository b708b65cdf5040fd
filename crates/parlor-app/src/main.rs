use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use parlor_client::config::{DbLocation, Environment};
use parlor_client::roster::Roster;
use parlor_client::{ChatClient, ChatView, Config, Directory, SessionState};
use parlor_db::Database;
use parlor_presence::PresenceHub;
use parlor_types::Address;

const HELP: &str = "\
/wallet <address>        connect a wallet
/accounts                list accounts the wallet manages
/login <address>         sign in as an account
/passkey                 enroll a passkey, then /finish
/finish                  complete a passkey login
/logout                  disconnect
/servers                 list servers
/create-server <app>     create a server from an app address
/join <n>                join server n
/server <n>              select server n
/channel-new <name>      create a channel in the selected server
/channel <n>             select channel n
/delete-channel <n>      delete channel n
/users                   show the roster
/view                    redraw messages
/quit
anything else is sent to the selected channel";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they don't interleave with the prompt
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlor=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;

    let db = match &config.db {
        DbLocation::Memory => {
            if config.environment == Environment::Production {
                warn!("Running production with an in-memory store; nothing will persist");
            }
            Database::open_in_memory()?
        }
        DbLocation::File(path) => Database::open(path)?,
    };
    let db = Arc::new(db);

    let directory = match &config.identity_file {
        Some(path) => Directory::load(path)?,
        None => {
            warn!("PARLOR_IDENTITY_FILE not set, identity directory is empty");
            Directory::default()
        }
    };
    if config.sync_key.is_some() {
        info!("Sync key configured");
    }

    let hub = PresenceHub::new();
    let mut client = ChatClient::new(&config, db, hub, directory);
    info!("Parlor ready ({:?})", config.environment);
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Err(e) = handle(&mut client, line).await {
            println!("error: {:#}", e);
        }
    }

    client.logout().await;
    Ok(())
}

async fn handle(client: &mut ChatClient<Directory>, line: &str) -> Result<()> {
    let (command, arg) = match line.split_once(' ') {
        Some((c, a)) => (c, a.trim()),
        None => (line, ""),
    };

    match command {
        "/help" => println!("{}", HELP),
        "/wallet" => {
            client.connect_wallet(parse_address(arg)?)?;
            println!("wallet connected");
        }
        "/accounts" => {
            for account in client.available_accounts().await? {
                println!("  {}  {}", account.address, account.display_name());
            }
        }
        "/login" => {
            let account = client.login(&parse_address(arg)?).await?;
            match client.session().state() {
                SessionState::Ready { .. } => println!("signed in as {}", account.display_name()),
                _ => println!("signed in as {}, /passkey to continue", account.display_name()),
            }
        }
        "/passkey" => {
            client.enroll_passkey()?;
            println!("passkey enrolled, /finish to continue");
        }
        "/finish" => {
            let account = client.finish_login().await?;
            println!("ready as {}", account.display_name());
        }
        "/logout" => {
            client.logout().await;
            println!("signed out");
        }
        "/servers" => print_servers(&client.view().await),
        "/create-server" => {
            let mut draft = arg.to_string();
            let server = client.create_server(&mut draft).await?;
            println!("created {}", server.name);
        }
        "/join" => {
            let server = nth(&client.view().await.servers, arg)?.clone();
            client.join_server(&server).await?;
            println!("joined {}", server.name);
        }
        "/server" => {
            let server = nth(&client.view().await.servers, arg)?.clone();
            client.select_server(Some(server)).await;
            print_channels(&client.view().await);
        }
        "/channel-new" => {
            let mut draft = arg.to_string();
            let channel = client.create_channel(&mut draft).await?;
            println!("created #{}", channel.name);
        }
        "/channel" => {
            let channel = nth(&client.view().await.channels, arg)?.clone();
            client.select_channel(channel).await?;
            show_messages(client).await;
        }
        "/delete-channel" => {
            let channel = nth(&client.view().await.channels, arg)?.clone();
            client.delete_channel(&channel).await?;
            println!("deleted #{}", channel.name);
        }
        "/users" => {
            client.sync().await;
            print_roster(&client.view().await.roster, client);
        }
        "/view" => {
            client.sync().await;
            show_messages(client).await;
        }
        _ if command.starts_with('/') => return Err(anyhow!("unknown command {}, try /help", command)),
        _ => {
            let mut draft = line.to_string();
            client.send_message(&mut draft).await?;
            client.sync().await;
            show_messages(client).await;
        }
    }
    Ok(())
}

fn parse_address(raw: &str) -> Result<Address> {
    Address::parse(raw).ok_or_else(|| anyhow!("expected an address"))
}

fn nth<'a, T>(items: &'a [T], arg: &str) -> Result<&'a T> {
    let index: usize = arg.parse().context("expected an index")?;
    items
        .get(index)
        .ok_or_else(|| anyhow!("no entry {} (have {})", index, items.len()))
}

fn print_servers(view: &ChatView) {
    for (i, server) in view.servers.iter().enumerate() {
        let marker = if view.selection.server_id() == Some(server.id) { "*" } else { " " };
        println!("{} {:>2}  {}  ({})", marker, i, server.name, server.address);
    }
}

fn print_channels(view: &ChatView) {
    for (i, channel) in view.channels.iter().enumerate() {
        let marker = if view.selection.channel_id() == Some(channel.id) { "*" } else { " " };
        println!("{} {:>2}  #{}", marker, i, channel.name);
    }
}

/// Print the channel and clear the mentions it just displayed.
async fn show_messages(client: &mut ChatClient<Directory>) {
    let view = client.view().await;
    print_messages(&view);
    for message in view.groups.iter().flat_map(|g| &g.messages) {
        client.mentions_mut().mark_seen(message.id);
    }
}

fn print_messages(view: &ChatView) {
    println!("== {} ==", view.title);
    if let Some(error) = &view.error {
        println!("(error: {})", error);
    }
    for group in &view.groups {
        let who = if group.is_self { "you" } else { group.display_name.as_str() };
        println!("[{}] {}", group.avatar_fallback, who);
        for message in &group.messages {
            println!("    {}  {}", message.created_at.format("%H:%M"), message.text);
        }
    }
}

fn print_roster(roster: &Roster, client: &ChatClient<Directory>) {
    for entry in roster.entries() {
        let status = if entry.is_online { "online " } else { "offline" };
        let suffix = if entry.is_self { " (you)" } else { "" };
        println!(
            "  {}  {}{}",
            status,
            Roster::display_name(entry, client.accounts()),
            suffix
        );
    }
}
