#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Command-line front end for the budge IMAP client

use budge::{
    Command as MailCommand, Config, Dispatcher, Envelope, Event, ImapConnector, MailboxEntry,
    Session,
};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

type MailDispatcher = Dispatcher<ImapConnector>;

#[derive(Parser)]
#[command(name = "budge")]
#[command(about = "Browse and watch an IMAP mailbox from the terminal")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List mailboxes, special folders first
    Folders,

    /// List the newest messages of a mailbox
    List {
        /// Mailbox to list (default: BUDGE_DEFAULT_FOLDER)
        #[arg(long)]
        folder: Option<String>,

        /// Number of messages to show (default: BUDGE_PAGE_SIZE)
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Show a message body by UID
    Show {
        uid: u32,

        #[arg(long)]
        folder: Option<String>,
    },

    /// Full-text search in a mailbox
    Search {
        query: String,

        #[arg(long)]
        folder: Option<String>,
    },

    /// Mark a message as read (or unread)
    Mark {
        uid: u32,

        /// Mark as unread instead
        #[arg(long)]
        unread: bool,

        #[arg(long)]
        folder: Option<String>,
    },

    /// Delete a message and expunge the mailbox
    Delete {
        uid: u32,

        #[arg(long)]
        folder: Option<String>,
    },

    /// Print a line whenever new mail arrives, until Ctrl-C
    Watch {
        #[arg(long)]
        folder: Option<String>,

        /// Poll interval in seconds (default: BUDGE_POLL_INTERVAL)
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;

    match &args.command {
        Command::List {
            limit: Some(limit), ..
        } => config.behavior.page_size = *limit,
        Command::Watch {
            interval: Some(secs),
            ..
        } => config.behavior.poll_interval = Duration::from_secs(*secs),
        _ => {}
    }
    config.validate()?;

    let connector = ImapConnector::new(&config.imap);
    let session = Arc::new(Session::new(connector, config.imap.clone(), config.reconnect));
    let (dispatcher, mut events) = Dispatcher::new(Arc::clone(&session), &config.behavior);

    request(&dispatcher, &mut events, MailCommand::Connect).await?;

    let default_folder = config.behavior.default_folder.clone();
    let folder = |f: &Option<String>| f.clone().unwrap_or_else(|| default_folder.clone());

    let result = match &args.command {
        Command::Folders => cmd_folders(&dispatcher, &mut events, &args).await,
        Command::List { folder: f, .. } => {
            cmd_list(&dispatcher, &mut events, &args, folder(f)).await
        }
        Command::Show { uid, folder: f } => {
            cmd_show(&dispatcher, &mut events, &args, folder(f), *uid).await
        }
        Command::Search { query, folder: f } => {
            cmd_search(&dispatcher, &mut events, &args, folder(f), query.clone()).await
        }
        Command::Mark {
            uid,
            unread,
            folder: f,
        } => cmd_mark(&dispatcher, &mut events, folder(f), *uid, !*unread).await,
        Command::Delete { uid, folder: f } => {
            cmd_delete(&dispatcher, &mut events, folder(f), *uid).await
        }
        Command::Watch { folder: f, .. } => {
            cmd_watch(&dispatcher, &mut events, &args, folder(f)).await
        }
    };

    dispatcher.shutdown();
    session.disconnect().await;
    result
}

/// Dispatch `command` and wait for its result event.
async fn request(
    dispatcher: &MailDispatcher,
    events: &mut mpsc::Receiver<Event>,
    command: MailCommand,
) -> anyhow::Result<Event> {
    dispatcher.dispatch(command);
    match events.recv().await {
        Some(Event::Failed(e) | Event::ConnectFailed(e)) => Err(e.into()),
        Some(event) => Ok(event),
        None => anyhow::bail!("event channel closed"),
    }
}

fn unexpected(event: &Event) -> anyhow::Error {
    anyhow::anyhow!("unexpected event: {event:?}")
}

async fn cmd_folders(
    dispatcher: &MailDispatcher,
    events: &mut mpsc::Receiver<Event>,
    args: &Args,
) -> anyhow::Result<()> {
    let entries = match request(dispatcher, events, MailCommand::LoadMailboxes).await? {
        Event::MailboxesLoaded(entries) => entries,
        other => return Err(unexpected(&other)),
    };

    if args.json {
        let names: Vec<&str> = entries.iter().filter_map(MailboxEntry::name).collect();
        println!("{}", serde_json::to_string_pretty(&names)?);
    } else {
        for entry in &entries {
            println!("{entry}");
        }
    }

    Ok(())
}

async fn cmd_list(
    dispatcher: &MailDispatcher,
    events: &mut mpsc::Receiver<Event>,
    args: &Args,
    folder: String,
) -> anyhow::Result<()> {
    let page = match request(dispatcher, events, MailCommand::OpenMailbox(folder)).await? {
        Event::PageLoaded { page, .. } => page,
        other => return Err(unexpected(&other)),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
    } else {
        print_envelope_table(&page.envelopes);
        println!("\n{} of {} message(s)", page.envelopes.len(), page.total);
    }

    Ok(())
}

async fn cmd_show(
    dispatcher: &MailDispatcher,
    events: &mut mpsc::Receiver<Event>,
    args: &Args,
    folder: String,
    uid: u32,
) -> anyhow::Result<()> {
    let command = MailCommand::LoadBody {
        mailbox: folder,
        uid,
    };
    let (mailbox, body) = match request(dispatcher, events, command).await? {
        Event::BodyLoaded { mailbox, body, .. } => (mailbox, body),
        other => return Err(unexpected(&other)),
    };

    if args.json {
        let value = serde_json::json!({ "mailbox": mailbox, "uid": uid, "body": body });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{body}");
    }

    Ok(())
}

async fn cmd_search(
    dispatcher: &MailDispatcher,
    events: &mut mpsc::Receiver<Event>,
    args: &Args,
    folder: String,
    query: String,
) -> anyhow::Result<()> {
    let command = MailCommand::Search {
        mailbox: folder,
        query,
    };
    let envelopes = match request(dispatcher, events, command).await? {
        Event::SearchLoaded { envelopes, .. } => envelopes,
        other => return Err(unexpected(&other)),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&envelopes)?);
    } else {
        print_envelope_table(&envelopes);
        println!("\n{} match(es)", envelopes.len());
    }

    Ok(())
}

async fn cmd_mark(
    dispatcher: &MailDispatcher,
    events: &mut mpsc::Receiver<Event>,
    folder: String,
    uid: u32,
    read: bool,
) -> anyhow::Result<()> {
    let command = MailCommand::MarkRead {
        mailbox: folder,
        uid,
        read,
    };
    match request(dispatcher, events, command).await? {
        Event::MarkedRead { uid, read, .. } => {
            println!("Marked {uid} as {}", if read { "read" } else { "unread" });
            Ok(())
        }
        other => Err(unexpected(&other)),
    }
}

async fn cmd_delete(
    dispatcher: &MailDispatcher,
    events: &mut mpsc::Receiver<Event>,
    folder: String,
    uid: u32,
) -> anyhow::Result<()> {
    let command = MailCommand::Delete {
        mailbox: folder,
        uid,
    };
    match request(dispatcher, events, command).await? {
        Event::Deleted { mailbox, uid } => {
            println!("Deleted {uid} from {mailbox}");
            Ok(())
        }
        other => Err(unexpected(&other)),
    }
}

async fn cmd_watch(
    dispatcher: &MailDispatcher,
    events: &mut mpsc::Receiver<Event>,
    args: &Args,
    folder: String,
) -> anyhow::Result<()> {
    dispatcher.dispatch(MailCommand::Watch(folder.clone()));
    info!(mailbox = %folder, "watching, Ctrl-C to stop");

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            event = events.recv() => event,
        };

        match event {
            Some(Event::NewMail { mailbox, count }) => {
                if args.json {
                    let value = serde_json::json!({ "mailbox": mailbox, "count": count });
                    println!("{value}");
                } else {
                    println!("New mail in {mailbox}: {count} message(s)");
                }
            }
            Some(other) => return Err(unexpected(&other)),
            None => return Ok(()),
        }
    }
}

fn print_envelope_table(envelopes: &[Envelope]) {
    if envelopes.is_empty() {
        println!("No messages found.");
        return;
    }

    let header = format!("{:<8} {:<2} {:<17} {:<30} {}", "UID", "", "Date", "From", "Subject");
    println!("{header}");
    println!("{}", "-".repeat(100));

    for env in envelopes {
        let from = env
            .from
            .first()
            .map_or_else(String::new, ToString::to_string);
        let date = env
            .date
            .map_or_else(String::new, |d| d.format("%Y-%m-%d %H:%M").to_string());
        println!(
            "{:<8} {:<2} {:<17} {:<30} {}",
            env.uid,
            status_marker(env),
            date,
            truncate(&from, 28),
            truncate(&env.subject, 40),
        );
    }
}

fn status_marker(env: &Envelope) -> &'static str {
    if env.is_unread() {
        "*"
    } else {
        ""
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
