#![deny(dead_code)] // DO NOT REMOVE THIS EVER
use anyhow::{anyhow, Result};
use chrono::Local;
use clap::Parser;
use log::{error, info, LevelFilter};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

mod utils;

use chatsync::alerts::{AlertLevel, AlertSink};
use chatsync::chat::{
    ChatClient, ConnectionState, ConversationStore, SelectOutcome, SendOutcome, StoreUpdate,
};
use chatsync::config::{self, load_config, save_config};
use chatsync::models::{Message, UserId};

/// Command line arguments for chatsync
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "chatsync: a terminal chat client with live message sync.",
    long_about = "chatsync keeps one-to-one conversations in sync over a websocket link.\n\n\
    Commands once running:\n\
    /contacts [query]   Refresh and list contacts\n\
    /open <id>          Open the conversation with a contact\n\
    /history            Print the open conversation\n\
    /quit               Log out and exit\n\
    Any other line is sent to the open conversation."
)]
struct Args {
    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Id of the logged-in user (falls back to CHATSYNC_USER_ID, then a prompt)
    #[arg(long, short)]
    user: Option<UserId>,

    /// Conversation to open right after login
    #[arg(long, short)]
    peer: Option<UserId>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[arg(long, short)]
    verbose: bool,

    /// Write the resolved configuration to the config file
    #[arg(long)]
    save_config: bool,
}

#[derive(Debug, PartialEq)]
enum Command {
    Contacts(String),
    Open(UserId),
    History,
    Quit,
    Send(String),
}

fn parse_command(line: &str) -> Result<Command, String> {
    let trimmed = line.trim();
    if !trimmed.starts_with('/') {
        return Ok(Command::Send(line.to_string()));
    }
    let (name, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (trimmed, ""),
    };
    match name {
        "/contacts" => Ok(Command::Contacts(rest.to_string())),
        "/open" => rest
            .parse::<UserId>()
            .map(Command::Open)
            .map_err(|_| format!("Usage: /open <id> (got '{}')", rest)),
        "/history" => Ok(Command::History),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("Unknown command {}", other)),
    }
}

fn format_message(message: &Message, me: UserId) -> String {
    let who = if message.sender_id == me {
        "you".to_string()
    } else {
        message.sender_id.to_string()
    };
    format!(
        "[{}] {}: {}",
        message.created_at.with_timezone(&Local).format("%H:%M:%S"),
        who,
        message.body
    )
}

/// Shows alerts inline with the transcript
struct TerminalAlerts;

impl AlertSink for TerminalAlerts {
    fn show_alert(&self, message: &str, level: AlertLevel) {
        match level {
            AlertLevel::Success => eprintln!("* {}", message),
            AlertLevel::Error => eprintln!("! {}", message),
        }
    }
}

fn prompt_user_id() -> Result<UserId> {
    let raw = env::var("CHATSYNC_USER_ID").or_else(|_| {
        eprintln!("Enter your user id:");
        utils::read_line()
    })?;
    raw.parse::<UserId>()
        .map_err(|e| anyhow!("Invalid user id '{}': {}", raw, e))
}

async fn print_updates(
    mut updates: mpsc::Receiver<StoreUpdate>,
    store: Arc<ConversationStore>,
    me: UserId,
) {
    while let Some(update) = updates.recv().await {
        match update {
            StoreUpdate::MessageAppended { message, .. } => {
                println!("{}", format_message(&message, me));
            }
            StoreUpdate::PreviewUpdated { peer, message } if message.sender_id != me => {
                let label = store
                    .conversation(peer)
                    .map(|c| c.contact.label())
                    .unwrap_or_else(|| peer.to_string());
                println!("(new message from {}: {})", label, message.body);
            }
            StoreUpdate::Reset => break,
            _ => {}
        }
    }
}

fn print_contacts(client: &ChatClient) {
    let previews = client.previews();
    for contact in client.contacts() {
        let unseen = previews
            .iter()
            .find(|p| p.contact.id == contact.id)
            .map(|p| p.unseen)
            .unwrap_or(0);
        let badge = if unseen > 0 {
            format!(" ({} unseen)", unseen)
        } else {
            String::new()
        };
        println!(
            "{:>6}  {} [{}/{}]{}",
            contact.id,
            contact.label(),
            contact.presence.as_str(),
            contact.presence.badge_variant().as_str(),
            badge
        );
    }
}

fn print_history(client: &ChatClient, me: UserId) {
    for message in client.messages() {
        println!("{}", format_message(&message, me));
    }
}

async fn open_conversation(client: &ChatClient, peer: UserId, me: UserId) {
    match client.select_conversation(peer).await {
        SelectOutcome::Loaded { messages } => {
            println!("--- conversation with {} ({} messages) ---", peer, messages);
            print_history(client, me);
        }
        SelectOutcome::Stale => info!("Selection of {} was superseded", peer),
        SelectOutcome::NoSession => error!("Not logged in"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let log_file = args.log_file.as_ref().and_then(|p| p.to_str());
    utils::setup_logging(log_file, level)?;
    info!(
        "System information: {} {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );

    if let Some(path) = &args.config {
        config::set_config_path_override(path.clone());
        info!("Config path overridden to: {}", path.display());
    }
    let engine_config = load_config(None)?;
    if args.save_config {
        let path = config::get_config_path()?;
        save_config(&engine_config, &path)?;
        println!("Config written to {}", path.display());
    }

    let me = match args.user {
        Some(id) => id,
        None => prompt_user_id()?,
    };

    let client = ChatClient::from_config(&engine_config, Arc::new(TerminalAlerts))?;
    tokio::spawn(print_updates(
        client.subscribe(),
        Arc::clone(client.store()),
        me,
    ));

    client.login(me);
    let contacts = client.refresh_directory("").await;
    println!("Logged in as {} ({} contacts)", me, contacts);

    println!("Connecting to {}... please wait...", engine_config.socket_url);
    match client.connect().await {
        ConnectionState::Connected => println!("Connected."),
        state => println!("Not connected ({:?}); messages will stay local.", state),
    }

    if let Some(peer) = args.peer {
        open_conversation(&client, peer, me).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Ok(Command::Contacts(query)) => {
                client.refresh_directory(&query).await;
                print_contacts(&client);
            }
            Ok(Command::Open(peer)) => open_conversation(&client, peer, me).await,
            Ok(Command::History) => print_history(&client, me),
            Ok(Command::Quit) => break,
            Ok(Command::Send(body)) => match client.send(&body) {
                SendOutcome::Sent(_) => {}
                SendOutcome::Undelivered { error, .. } => eprintln!("! not delivered: {}", error),
                SendOutcome::Rejected(error) => eprintln!("! {}", error),
            },
            Err(usage) => eprintln!("{}", usage),
        }
    }

    client.logout();
    info!("chatsync shutting down");
    Ok(())
}
