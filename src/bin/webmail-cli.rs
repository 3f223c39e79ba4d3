#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Command-line dispatcher for the webmail gateway
//!
//! Routes one command to one gateway call and prints the result.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use webmail_gateway::{
    Contact, ContactInput, Gateway, Mailbox, MessageSummary, OutgoingMessage, ServerInfo,
};

#[derive(Parser)]
#[command(name = "webmail-cli")]
#[command(about = "Mailbox, message and contact operations for one mail account")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// JSON server-info file (defaults to IMAP_*/SMTP_* variables)
    #[arg(long, global = true)]
    server_info: Option<PathBuf>,

    /// Contacts store
    #[arg(
        long,
        global = true,
        env = "CONTACTS_DB",
        default_value = "contacts.jsonl"
    )]
    contacts: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// List mailboxes with message counts
    Mailboxes,

    /// List messages in a mailbox
    Messages {
        /// Mailbox to list
        #[arg(long, default_value = "INBOX")]
        mailbox: String,
    },

    /// Show the body of a message by id
    Show {
        /// Message id (UID)
        id: u32,

        /// Mailbox containing the message
        #[arg(long, default_value = "INBOX")]
        mailbox: String,
    },

    /// Delete a message by id
    Delete {
        /// Message id (UID)
        id: u32,

        /// Mailbox containing the message
        #[arg(long, default_value = "INBOX")]
        mailbox: String,
    },

    /// Send a message
    Send {
        #[arg(long)]
        from: String,

        /// Recipient (repeatable)
        #[arg(long, required = true)]
        to: Vec<String>,

        /// Carbon-copy recipient (repeatable)
        #[arg(long)]
        cc: Vec<String>,

        #[arg(long, default_value = "")]
        subject: String,

        #[arg(long, default_value = "")]
        body: String,
    },

    /// List contacts
    Contacts,

    /// Add a contact
    AddContact {
        #[arg(long)]
        name: String,

        /// Email address (repeatable)
        #[arg(long = "email")]
        emails: Vec<String>,

        #[arg(long, default_value = "")]
        notes: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let server = match &args.server_info {
        Some(path) => ServerInfo::from_json_file(path)?,
        None => ServerInfo::from_env()?,
    };
    let gateway = Gateway::new(server, args.contacts.clone());

    match &args.command {
        Command::Mailboxes => {
            let mailboxes = gateway.list_mailboxes().await?;
            emit(&args, &mailboxes, print_mailboxes)?;
        }
        Command::Messages { mailbox } => {
            let messages = gateway.list_messages(mailbox).await?;
            emit(&args, &messages, print_message_table)?;
        }
        Command::Show { id, mailbox } => {
            let body = gateway.get_message_body(mailbox, *id).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                println!("{}", body.text);
            }
        }
        Command::Delete { id, mailbox } => {
            gateway.delete_message(mailbox, *id).await?;
            println!("Deleted message {id} from {mailbox}");
        }
        Command::Send {
            from,
            to,
            cc,
            subject,
            body,
        } => {
            let payload = OutgoingMessage {
                from: from.clone(),
                to: to.clone(),
                cc: cc.clone(),
                subject: subject.clone(),
                body: body.clone(),
                attachments: Vec::new(),
            };
            gateway.send_message(&payload).await?;
            println!("Message sent");
        }
        Command::Contacts => {
            let contacts = gateway.list_contacts().await?;
            emit(&args, &contacts, print_contacts)?;
        }
        Command::AddContact {
            name,
            emails,
            notes,
        } => {
            let contact = gateway
                .add_contact(ContactInput {
                    name: name.clone(),
                    emails: emails.clone(),
                    notes: notes.clone(),
                })
                .await?;
            emit(&args, std::slice::from_ref(&contact), print_contacts)?;
        }
    }

    Ok(())
}

fn emit<T: serde::Serialize>(args: &Args, items: &[T], table: fn(&[T])) -> anyhow::Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(items)?);
    } else {
        table(items);
    }
    Ok(())
}

fn print_mailboxes(mailboxes: &[Mailbox]) {
    if mailboxes.is_empty() {
        println!("No mailboxes found.");
        return;
    }

    println!("{:<40} {:>8} {:>8}", "Mailbox", "Messages", "Unseen");
    println!("{}", "-".repeat(58));
    for mb in mailboxes {
        let label = format!("{}{}", "  ".repeat(mb.depth()), mb.name);
        if mb.selectable {
            println!("{:<40} {:>8} {:>8}", truncate(&label, 40), mb.messages, mb.unseen);
        } else {
            println!("{:<40} {:>8} {:>8}", truncate(&label, 40), "-", "-");
        }
    }
}

fn print_message_table(messages: &[MessageSummary]) {
    if messages.is_empty() {
        println!("No messages found.");
        return;
    }

    let header = format!(
        "{:<8} {:<6} {:<32} {:<30} {}",
        "ID", "Seen", "Date", "From", "Subject"
    );
    println!("{header}");
    println!("{}", "-".repeat(100));

    for msg in messages {
        println!(
            "{:<8} {:<6} {:<32} {:<30} {}",
            msg.id,
            if msg.is_seen() { "yes" } else { "no" },
            truncate(&msg.date, 31),
            truncate(&msg.from, 28),
            truncate(&msg.subject, 40),
        );
    }

    println!("\n{} message(s)", messages.len());
}

fn print_contacts(contacts: &[Contact]) {
    if contacts.is_empty() {
        println!("No contacts found.");
        return;
    }

    for contact in contacts {
        println!("{}  {}  <{}>", contact.id, contact.name, contact.emails.join(", "));
        if !contact.notes.is_empty() {
            println!("    {}", contact.notes);
        }
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
