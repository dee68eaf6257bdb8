//! pwsync CLI
//!
//! Run with: pwsync --from ~/vault.pwv --to bitwarden

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pwsync::error::{Result, SyncError};
use pwsync::store::{BitwardenCredentials, BitwardenStore, BwCli, StoreAdapter, VaultStore};
use pwsync::sync::{
    run, CancelFlag, ConfirmPolicy, Confirmer, Decision, IdentityResolver, Operation,
    OperationKind, Outcome, SyncConfig, SyncReport,
};
use pwsync::types::{CanonicalRecord, RecordField, SyncScope};

#[derive(Parser, Debug)]
#[command(name = "pwsync")]
#[command(about = "Synchronize credentials from one password store to another")]
#[command(version)]
struct Cli {
    /// Store to synchronize from: a vault file or the keyword `bitwarden`
    #[arg(short, long, env = "PWS_FROM")]
    from: String,

    /// Store to synchronize to; the only one that gets modified
    #[arg(short, long, env = "PWS_TO")]
    to: String,

    /// Describe the changes without applying them
    #[arg(short, long)]
    dry_run: bool,

    /// Comma separated fields identifying equivalent records
    #[arg(long, default_value = "path,title")]
    id: String,

    /// Separator between identity key parts in output
    #[arg(long, default_value = ":")]
    id_sep: String,

    /// Synchronize every record, not only those flagged with pws_sync
    #[arg(short = 'a', long)]
    sync_all: bool,

    /// Bitwarden client id of the source
    #[arg(long, env = "PWS_FROM_USERNAME")]
    from_username: Option<String>,

    /// Bitwarden client secret of the source
    #[arg(long, env = "PWS_FROM_SECRET", hide_env_values = true)]
    from_secret: Option<String>,

    /// Master password of the source
    #[arg(long, env = "PWS_FROM_MASTER_PASSWORD", hide_env_values = true)]
    from_master_password: Option<String>,

    /// Bitwarden client id of the target
    #[arg(long, env = "PWS_TO_USERNAME")]
    to_username: Option<String>,

    /// Bitwarden client secret of the target
    #[arg(long, env = "PWS_TO_SECRET", hide_env_values = true)]
    to_secret: Option<String>,

    /// Master password of the target
    #[arg(long, env = "PWS_TO_MASTER_PASSWORD", hide_env_values = true)]
    to_master_password: Option<String>,

    /// Create records without asking
    #[arg(short = 'C', long)]
    auto_create: bool,

    /// Update records without asking
    #[arg(short = 'U', long)]
    auto_update: bool,

    /// Delete records without asking
    #[arg(long)]
    auto_delete: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Log level when RUST_LOG is not set
    #[arg(short, long, env = "PWS_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Also write a JSON log file per run into this directory
    #[arg(long, env = "PWS_LOG_DIR")]
    log_dir: Option<String>,
}

/// How to reach one store
struct Access {
    username: Option<String>,
    secret: Option<String>,
    master_password: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli) {
        eprintln!("Error: cannot set up logging: {}", e);
        return ExitCode::from(2);
    }

    match sync(&cli) {
        Ok(report) => {
            if let Err(e) = print_report(&report, cli.json) {
                eprintln!("Error: {}", e);
                return ExitCode::from(2);
            }
            if report.has_failures() {
                ExitCode::from(1)
            } else if report.cancelled() {
                ExitCode::from(SyncError::Cancelled.exit_code())
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let file_layer = match &cli.log_dir {
        Some(dir) => {
            let dir = shellexpand::tilde(dir).to_string();
            std::fs::create_dir_all(&dir)?;
            let name = chrono::Local::now()
                .format("pwsync_%Y_%m_%d_%H_%M_%S.log")
                .to_string();
            let file = std::fs::File::create(Path::new(&dir).join(name))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    // stdout carries the report
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(false),
        )
        .with(file_layer)
        .with(filter)
        .init();
    Ok(())
}

fn sync(cli: &Cli) -> Result<SyncReport> {
    let resolver = IdentityResolver::parse(&cli.id)?.with_separator(&cli.id_sep);

    let config = SyncConfig {
        resolver: resolver.clone(),
        scope: if cli.sync_all {
            SyncScope::All
        } else {
            SyncScope::Flagged
        },
        dry_run: cli.dry_run,
        confirm: ConfirmPolicy {
            creates: !cli.auto_create,
            updates: !cli.auto_update,
            deletes: !cli.auto_delete,
        },
    };

    if is_bitwarden(&cli.from) && is_bitwarden(&cli.to) {
        return Err(SyncError::Config(
            "source and target are the same bitwarden account".to_string(),
        ));
    }

    let source = open_store(
        &cli.from,
        Access {
            username: cli.from_username.clone(),
            secret: cli.from_secret.clone(),
            master_password: cli.from_master_password.clone(),
        },
        &resolver,
        true,
    )?;
    let target = open_store(
        &cli.to,
        Access {
            username: cli.to_username.clone(),
            secret: cli.to_secret.clone(),
            master_password: cli.to_master_password.clone(),
        },
        &resolver,
        false,
    )?;

    let cancel = CancelFlag::new();
    watch_interrupt(cancel.clone());

    let mut confirmer = ConsoleConfirmer {
        separator: cli.id_sep.clone(),
        cancel: cancel.clone(),
    };
    run(
        source.as_ref(),
        target.as_ref(),
        &config,
        &mut confirmer,
        &cancel,
    )
}

fn is_bitwarden(spec: &str) -> bool {
    matches!(spec.to_lowercase().as_str(), "bitwarden" | "bw")
}

fn open_store(
    spec: &str,
    access: Access,
    resolver: &IdentityResolver,
    must_exist: bool,
) -> Result<Box<dyn StoreAdapter>> {
    if is_bitwarden(spec) {
        let credentials = BitwardenCredentials {
            client_id: access.username,
            client_secret: access.secret,
            master_password: access.master_password,
        };
        let store = BitwardenStore::connect(BwCli::new(), &credentials, resolver.clone())?;
        return Ok(Box::new(store));
    }

    let path = shellexpand::tilde(spec).to_string();
    if must_exist && !Path::new(&path).exists() {
        return Err(SyncError::Config(format!("vault {} does not exist", path)));
    }
    let passphrase = match access.master_password {
        Some(p) => p,
        None => prompt_line(&format!("Master password for {}: ", path))?
            .ok_or_else(|| SyncError::Config(format!("no master password for {}", path)))?,
    };
    let store = VaultStore::open(&path, &passphrase, resolver.clone())?;
    Ok(Box::new(store))
}

/// Read one line from the terminal; `None` at end of input
fn prompt_line(prompt: &str) -> Result<Option<String>> {
    eprint!("{}", prompt);
    io::stderr().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Cancel the run on the first Ctrl-C, exit on the second
fn watch_interrupt(cancel: CancelFlag) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!("Ctrl-C handling unavailable: {}", e);
                return;
            }
        };
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, stopping after the current operation");
                cancel.cancel();
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(i32::from(SyncError::Cancelled.exit_code()));
            }
        });
    });
}

/// Asks on the terminal before each gated mutation
struct ConsoleConfirmer {
    separator: String,
    cancel: CancelFlag,
}

impl Confirmer for ConsoleConfirmer {
    fn confirm(&mut self, operation: &Operation) -> Decision {
        let kind = operation.kind();
        eprintln!();
        eprintln!("{} {}", kind, operation.key().render(&self.separator));
        describe(operation);

        loop {
            let answer = match prompt_line(&format!(
                "[a]pply {kind} / [s]kip {kind} / [q]uit synchronization? "
            )) {
                Ok(Some(answer)) => answer,
                Ok(None) | Err(_) => return Decision::Skip,
            };
            if self.cancel.is_cancelled() {
                return Decision::Quit;
            }
            match answer.trim().chars().next().map(|c| c.to_ascii_lowercase()) {
                Some('a') => return Decision::Apply,
                Some('s') => return Decision::Skip,
                Some('q') => return Decision::Quit,
                _ => eprintln!("Please answer a, s or q"),
            }
        }
    }
}

fn describe(operation: &Operation) {
    match operation {
        Operation::Create { source, .. } => eprintln!("  add {}", source.label()),
        Operation::Delete { target, .. } => eprintln!("  remove {}", target.label()),
        Operation::Update {
            source,
            target,
            changed,
            ..
        }
        | Operation::Conflict {
            source,
            target,
            changed,
            ..
        } => {
            for field in changed {
                if field.is_sensitive() {
                    eprintln!("  update {:<12}: (modified)", field);
                } else {
                    eprintln!(
                        "  update {:<12}: {} -> {}",
                        field,
                        field_value(target, *field),
                        field_value(source, *field)
                    );
                }
            }
        }
        Operation::Unchanged { .. } => {}
    }
}

fn field_value(record: &CanonicalRecord, field: RecordField) -> String {
    let text = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    match field {
        RecordField::Path => record.folder(),
        RecordField::Title => record.title.clone(),
        RecordField::Username => record.username.clone(),
        RecordField::Notes => text(&record.notes),
        RecordField::Url => text(&record.url),
        RecordField::Favorite => record.favorite.to_string(),
        RecordField::Organization => text(&record.organization),
        RecordField::Collections => record
            .collections
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", "),
        RecordField::SyncEnabled => record.sync_enabled.to_string(),
        RecordField::LastModified => record
            .last_modified
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string()),
        RecordField::Secret | RecordField::Totp => "*******".to_string(),
    }
}

fn print_report(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "{} -> {}{}",
        report.source(),
        report.target(),
        if report.dry_run() { " (dry run)" } else { "" }
    );

    for kind in [
        OperationKind::Conflict,
        OperationKind::Update,
        OperationKind::Create,
        OperationKind::Delete,
    ] {
        for entry in report.entries_of(kind) {
            let mut line = format!("  {:<9} {:<8} {}", entry.kind, entry.outcome, entry.key);
            if !entry.changed.is_empty() {
                let fields: Vec<&str> = entry.changed.iter().map(|f| f.as_str()).collect();
                line.push_str(&format!(" [{}]", fields.join(", ")));
            }
            if let Some(detail) = &entry.detail {
                if entry.outcome != Outcome::Applied || !report.dry_run() {
                    line.push_str(&format!(" ({})", detail));
                }
            }
            println!("{}", line);
        }
    }

    for rejected in report.rejected() {
        println!(
            "  rejected  {}: {} ({})",
            rejected.store, rejected.label, rejected.reason
        );
    }

    let counts = report.counts();
    println!(
        "{} create, {} update, {} delete, {} conflict, {} unchanged: \
         {} applied, {} skipped, {} failed{}",
        counts.create,
        counts.update,
        counts.delete,
        counts.conflict,
        counts.unchanged,
        counts.applied,
        counts.skipped,
        counts.failed,
        if report.cancelled() { " (cancelled)" } else { "" }
    );
    Ok(())
}
