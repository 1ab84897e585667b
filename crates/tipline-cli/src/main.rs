use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tipline_core::config::TiplineConfig;
use tipline_core::paths;
use tipline_core::secure_element::KeyringSlot;
use tipline_core::{
    ChatMessage, LocalPublicData, Passphrase, PassphraseGenerator, PublicData, RemoteContact,
    Sender, Session, SessionStatus, Tipline,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod spool;

use crate::spool::SpoolRelay;

#[derive(Parser, Debug)]
#[command(name = "tipline", author, version, about = "Deniable tip-line client", long_about = None)]
struct Cli {
    /// Data directory (defaults to the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Config file (defaults to <data_dir>/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Store namespace
    #[arg(long, global = true)]
    namespace: Option<String>,
    /// Passphrase; prompted for when omitted
    #[arg(long, global = true, env = "TIPLINE_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the store and config file if missing, enable background sync
    Init,
    /// Generate a new random passphrase
    Passphrase {
        #[arg(long)]
        words: Option<usize>,
    },
    /// Check that a passphrase only uses wordlist words
    Check { phrase: String },
    /// Unlock and print a summary of the chat logs
    Unlock,
    /// Queue a message for a contact
    Send { contact: i64, text: String },
    /// Print chat logs and mark them read
    Logs {
        #[arg(long)]
        contact: Option<i64>,
    },
    /// Merge pending inbound messages into the store
    Sync,
    /// Manage contacts
    Contacts {
        #[command(subcommand)]
        command: ContactCommands,
    },
    /// Set relay public and signing keys (hex)
    RelayKeys { public_key: String, signing_key: String },
    /// List queued outgoing messages
    Outbox,
    /// Manage the inbound queue
    Inbox {
        #[command(subcommand)]
        command: InboxCommands,
    },
    /// Run one background cycle, or toggle background sync
    Background {
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
    },
    /// Show whether a store exists and the background sync setting
    Status,
    /// Make the current store permanently unreadable
    Wipe,
}

#[derive(Subcommand, Debug)]
enum ContactCommands {
    /// Add or update a contact
    Add {
        id: i64,
        name: String,
        /// Public key (hex)
        public_key: String,
    },
    /// List known contacts
    List,
}

#[derive(Subcommand, Debug)]
enum InboxCommands {
    /// Queue a signed inbound packet (hex)
    Add { packet: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let (config, config_path) = load_config(&cli)?;
    match &cli.command {
        Commands::Passphrase { words } => passphrase_command(words.unwrap_or(config.passphrase_words)),
        Commands::Check { phrase } => check_command(phrase),
        command => {
            if matches!(command, Commands::Init) && write_config_if_missing(&config, &config_path)? {
                info!(path = %config_path.display(), "config written");
            }
            let app = App::open(config)?;
            run(&app, command, cli.passphrase.as_deref())
        }
    }
}

/// Resolves the settings and the file they came from. Command-line flags
/// override the file.
fn load_config(cli: &Cli) -> Result<(TiplineConfig, PathBuf)> {
    let path = match (&cli.config, &cli.data_dir) {
        (Some(file), _) => file.clone(),
        (None, Some(dir)) => paths::config_path(dir),
        (None, None) => paths::config_path(&paths::data_dir()?),
    };
    let mut config = TiplineConfig::load_or_default(&path)
        .with_context(|| format!("reading config {}", path.display()))?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    if let Some(ns) = &cli.namespace {
        config.namespace = ns.clone();
    }
    Ok((config, path))
}

/// Returns true when the file was created.
fn write_config_if_missing(config: &TiplineConfig, path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    config
        .save(path)
        .with_context(|| format!("writing config {}", path.display()))?;
    Ok(true)
}

struct App {
    tipline: Tipline,
    public: Arc<dyn PublicData>,
}

impl App {
    fn open(config: TiplineConfig) -> Result<Self> {
        let data = config.resolved_data_dir()?;
        std::fs::create_dir_all(&data)?;
        let public: Arc<dyn PublicData> = Arc::new(LocalPublicData::open(paths::public_data_path(
            &data,
            &config.namespace,
        ))?);
        let slot = Box::new(KeyringSlot::new(&config.namespace));
        let session = Session::open(&config, slot, Arc::clone(&public))?;
        let relay = Arc::new(SpoolRelay::new(spool_dir(&data), Arc::clone(&public)));
        let tipline = Tipline::new(session, relay).with_default_interval(config.sync_interval_secs);
        Ok(Self { tipline, public })
    }

    fn session(&self, passphrase: Option<&str>) -> Result<&Session> {
        let phrase = match passphrase {
            Some(p) => p.to_string(),
            None => prompt_passphrase("Passphrase: ")?,
        };
        Ok(self.tipline.create_or_unlock(&Passphrase::new(&phrase))?)
    }
}

fn spool_dir(data: &Path) -> PathBuf {
    data.join("spool")
}

fn run(app: &App, command: &Commands, passphrase: Option<&str>) -> Result<()> {
    match command {
        Commands::Init => {
            app.tipline.init()?;
            println!("Store ready; background sync every {}", describe_interval(app)?);
        }
        Commands::Unlock => {
            let session = app.session(passphrase)?;
            let logs = session.chat_logs()?;
            println!("Unlocked: {} conversation(s)", logs.len());
            for log in logs {
                let unread = if log.has_unread_message() { " (unread)" } else { "" };
                println!(
                    "  [{}] {}: {} message(s){}",
                    log.contact.id,
                    log.contact.name,
                    log.messages.len(),
                    unread
                );
            }
            session.lock();
        }
        Commands::Send { contact, text } => {
            let session = app.session(passphrase)?;
            session.send_message(*contact, ChatMessage::from_me(text.as_str(), Utc::now()))?;
            session.lock();
            println!("Queued message for contact {contact}");
        }
        Commands::Logs { contact } => {
            let session = app.session(passphrase)?;
            let now = Utc::now();
            for log in session.chat_logs()? {
                if contact.is_some_and(|id| id != log.contact.id) {
                    continue;
                }
                println!("== [{}] {} ==", log.contact.id, log.contact.name);
                for message in &log.messages {
                    let who = match message.sender {
                        Sender::Me => "me",
                        Sender::Contact(_) => log.contact.name.as_str(),
                    };
                    println!("{} {}: {}", fmt_time(message.timestamp), who, message.text);
                }
                session.mark_chat_log_opened(log.contact.id, now)?;
            }
            session.lock();
        }
        Commands::Sync => {
            let pending = app.public.drain_incoming()?.len();
            // unlocking already merges; force_sync picks up anything queued since
            let session = app.session(passphrase)?;
            session.force_sync()?;
            session.lock();
            println!("Processed {pending} pending packet(s)");
        }
        Commands::Contacts { command } => match command {
            ContactCommands::Add { id, name, public_key } => {
                app.public.add_or_update_contact(RemoteContact {
                    id: *id,
                    name: name.clone(),
                    public_key: decode_key(public_key, "public key")?,
                })?;
                println!("Contact {id} saved");
            }
            ContactCommands::List => {
                for c in app.public.list_contacts()? {
                    println!("{}\t{}\t{}", c.id, c.name, hex::encode(&c.public_key));
                }
            }
        },
        Commands::RelayKeys { public_key, signing_key } => {
            app.public.set_relay_keys(
                &decode_key(public_key, "relay public key")?,
                &decode_key(signing_key, "relay signing key")?,
            )?;
            println!("Relay keys updated");
        }
        Commands::Outbox => {
            let pending = app.public.pending_outgoing()?;
            println!("{} message(s) queued", pending.len());
            for (i, blob) in pending.iter().enumerate() {
                println!("  #{i}: {} bytes", blob.len());
            }
        }
        Commands::Inbox { command } => match command {
            InboxCommands::Add { packet } => {
                let bytes = hex::decode(packet.trim()).context("packet is not hex")?;
                app.public.add_incoming(vec![bytes])?;
                println!("Packet queued");
            }
        },
        Commands::Background { enable, disable } => {
            if *enable || *disable {
                app.tipline.set_background_enabled(*enable)?;
                println!("Background sync: {}", describe_interval(app)?);
            } else {
                app.tipline.run_background_cycle()?;
                match app.tipline.next_sync_time()? {
                    Some(at) => println!("Cycle done; next sync at {}", fmt_time(at)),
                    None => println!("Cycle done; background sync is off"),
                }
            }
        }
        Commands::Status => {
            let status = match app.tipline.status() {
                SessionStatus::Absent => "absent",
                SessionStatus::Locked => "present",
                SessionStatus::Unlocked => "unlocked",
            };
            println!("Store: {status}");
            println!("Background sync: {}", describe_interval(app)?);
        }
        Commands::Wipe => {
            wipe(app)?;
            println!("Store wiped");
        }
        Commands::Passphrase { .. } | Commands::Check { .. } => {
            return Err(anyhow!("command does not need a store"));
        }
    }
    Ok(())
}

fn wipe(app: &App) -> Result<()> {
    let confirm = prompt_line("Type WIPE to confirm: ")?;
    if confirm.trim() != "WIPE" {
        bail!("wipe cancelled");
    }
    app.tipline.wipe()?;
    info!("store wiped");
    Ok(())
}

fn passphrase_command(words: usize) -> Result<()> {
    let phrase = PassphraseGenerator::new().generate(words)?;
    println!("{}", phrase.as_str());
    Ok(())
}

fn check_command(phrase: &str) -> Result<()> {
    if PassphraseGenerator::new().is_valid(phrase) {
        println!("valid");
        Ok(())
    } else {
        bail!("passphrase contains words outside the wordlist")
    }
}

fn describe_interval(app: &App) -> Result<String> {
    Ok(match app.tipline.sync_interval()? {
        Some(d) => format!("{}s", d.num_seconds()),
        None => "off".to_string(),
    })
}

fn decode_key(text: &str, what: &str) -> Result<Vec<u8>> {
    let bytes = hex::decode(text.trim()).with_context(|| format!("{what} is not hex"))?;
    if bytes.len() != 32 {
        bail!("{what} must be 32 bytes, got {}", bytes.len());
    }
    Ok(bytes)
}

fn fmt_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn prompt_passphrase(prompt: &str) -> Result<String> {
    let phrase = rpassword::prompt_password(prompt).map_err(|e| anyhow!("passphrase prompt: {e}"))?;
    if phrase.trim().is_empty() {
        bail!("passphrase must not be empty");
    }
    Ok(phrase)
}

fn prompt_line(prompt: &str) -> Result<String> {
    use std::io::Write;
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line)
}
