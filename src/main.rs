use std::{
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::Serialize;
use tracing::info;

use storage_ledger::{
    auth::SignedEvent,
    config::LedgerConfig,
    events::{Engine, Event, TransferRouter},
    ledger::{AccountAllocation, AccountId},
    links::{LinkKey, LinkRecord, PermissiveValidator},
    logging,
    pricing::LinearCurve,
    store::{JsonFileStore, RecordStore},
};

#[derive(Parser)]
#[command(name = "storage-ledger", version, about = "Storage capacity ledger")]
struct Cli {
    /// TOML config; defaults are used when the file is absent
    #[arg(long, short, default_value = "storage-ledger.toml")]
    config: PathBuf,

    /// Override the state file from the config
    #[arg(long)]
    state: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seed the capacity ledger with the configured total supply
    Init {
        /// Reset an existing ledger's reservation total
        #[arg(long)]
        force: bool,
    },
    /// Apply signed events, one JSON object per line
    Apply { events: PathBuf },
    /// Generate an ed25519 key pair for an account
    Keygen {
        #[arg(long)]
        account: AccountId,
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Sign an event (or add a signature to a signed event) and print it as one line
    Sign {
        /// 32-byte ed25519 secret key as 64 hex characters
        #[arg(long)]
        sk_hex: String,
        #[arg(long)]
        account: AccountId,
        /// Nonce for a plain event; ignored when the input is already signed
        #[arg(long, default_value_t = 0)]
        nonce: u64,
        event: PathBuf,
    },
    /// Print an account's allocation, quota and links
    ShowAccount { account: AccountId },
    /// Print a single link record
    ShowLink { owner: AccountId, path: String },
    /// Print the full state with its merkle root
    Snapshot,
}

type FileEngine = Engine<JsonFileStore, LinearCurve, PermissiveValidator>;

fn open_engine(config: &LedgerConfig) -> Result<FileEngine> {
    let store = JsonFileStore::open(&config.state_path)
        .with_context(|| format!("opening state {}", config.state_path.display()))?;
    let curve = LinearCurve::new(config.price_unit)
        .ok_or_else(|| anyhow!("price_unit must be positive"))?;
    Ok(Engine::with_parts(
        store,
        TransferRouter::new(config.ledger_account.clone()),
        curve,
        PermissiveValidator,
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_cmd(config: &LedgerConfig, force: bool) -> Result<()> {
    let mut engine = open_engine(config)?;
    engine.genesis(config.total_supply_bytes, force)?;
    println!(
        "Initialised {} bytes → {}",
        config.total_supply_bytes,
        engine.store().path().display()
    );
    Ok(())
}

fn apply_cmd(config: &LedgerConfig, events: &Path) -> Result<()> {
    let keyring = config.load_keyring()?;
    let mut engine = open_engine(config)?;
    let file = fs::File::open(events).with_context(|| format!("opening {}", events.display()))?;

    let mut applied = 0usize;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let lineno = idx + 1;
        let signed: SignedEvent =
            serde_json::from_str(line).with_context(|| format!("line {lineno}: bad event"))?;
        engine
            .apply_signed(&signed, &keyring)
            .with_context(|| format!("line {lineno}: {} rejected", signed.event.kind()))?;
        applied += 1;
    }
    info!(applied, height = engine.store().meta()?.height, "events applied");
    println!("Applied {applied} events");
    Ok(())
}

fn keygen_cmd(account: &str, out_dir: &Path) -> Result<()> {
    let sk = SigningKey::generate(&mut OsRng);
    let pk_hex = hex::encode(sk.verifying_key().to_bytes());
    fs::create_dir_all(out_dir)?;
    fs::write(out_dir.join(format!("{account}.sk.hex")), hex::encode(sk.to_bytes()))?;
    fs::write(out_dir.join(format!("{account}.pk.hex")), &pk_hex)?;
    println!("{account} {pk_hex}");
    Ok(())
}

fn sign_cmd(sk_hex: &str, account: &str, nonce: u64, event: &Path) -> Result<()> {
    let sk_bytes = hex::decode(sk_hex.trim()).context("invalid --sk-hex")?;
    let sk_bytes: [u8; 32] = sk_bytes
        .try_into()
        .map_err(|_| anyhow!("--sk-hex must be exactly 32 bytes (64 hex)"))?;
    let sk = SigningKey::from_bytes(&sk_bytes);

    let raw = fs::read(event).with_context(|| format!("reading {}", event.display()))?;
    let mut signed = match serde_json::from_slice::<SignedEvent>(&raw) {
        Ok(signed) => signed,
        Err(_) => {
            let event: Event = serde_json::from_slice(&raw).context("not an event")?;
            SignedEvent::new(nonce, event)
        }
    };
    if signed.event == Event::Unknown {
        bail!("refusing to sign an unknown event type");
    }
    signed.sign(account, &sk)?;
    println!("{}", serde_json::to_string(&signed)?);
    Ok(())
}

#[derive(Serialize)]
struct AccountView<'a> {
    account: &'a str,
    allocation: AccountAllocation,
    quota_bytes: u64,
    available_bytes: u64,
    links: Vec<(&'a String, &'a LinkRecord)>,
}

fn show_account_cmd(config: &LedgerConfig, account: &AccountId) -> Result<()> {
    let store = JsonFileStore::open(&config.state_path)?;
    let state = store.state();
    let supply = state
        .capacity
        .as_ref()
        .map(|c| c.total_supply_bytes)
        .unwrap_or_default();
    let allocation = state.allocations.get(account).cloned().unwrap_or_default();
    print_json(&AccountView {
        account,
        quota_bytes: allocation.quota_bytes(supply),
        available_bytes: allocation.available_bytes(supply),
        allocation,
        links: state.links_of(account).collect(),
    })
}

fn show_link_cmd(config: &LedgerConfig, owner: AccountId, path: String) -> Result<()> {
    let store = JsonFileStore::open(&config.state_path)?;
    let key = LinkKey::new(owner, path);
    match store.link(&key)? {
        Some(record) => print_json(&record),
        None => bail!("link {}:{} not found", key.owner, key.path),
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = LedgerConfig::load(&cli.config)?;
    if let Some(state) = cli.state {
        config.state_path = state;
    }
    logging::init(&config.logging, cli.verbose)?;

    match cli.command {
        Command::Init { force } => init_cmd(&config, force),
        Command::Apply { events } => apply_cmd(&config, &events),
        Command::Keygen { account, out_dir } => keygen_cmd(&account, &out_dir),
        Command::Sign {
            sk_hex,
            account,
            nonce,
            event,
        } => sign_cmd(&sk_hex, &account, nonce, &event),
        Command::ShowAccount { account } => show_account_cmd(&config, &account),
        Command::ShowLink { owner, path } => show_link_cmd(&config, owner, path),
        Command::Snapshot => {
            let store = JsonFileStore::open(&config.state_path)?;
            print_json(&store.state().snapshot())
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
