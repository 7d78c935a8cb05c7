use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use checklist_sync::config::{self, AppConfig, DEFAULT_CONFIG_FILE};
use checklist_sync::credentials::{CredentialStore, Credentials, Prompter};
use checklist_sync::fallback::LocalFallbackStore;
use checklist_sync::kv::{FileKvStore, KvStore};
use checklist_sync::reconciler::Reconciler;
use checklist_sync::record::ClientId;
use checklist_sync::remote::{GitHubStore, RecordStore};
use checklist_sync::repl::Editor;
use checklist_sync::status::StdoutSink;
use checklist_sync::{Error, Result, backup, checklist};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Directory for local settings and the fallback cache
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Never contact the remote store
    #[arg(long, global = true)]
    offline: bool,
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store a GitHub token (and optionally the target repository)
    Configure {
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        repo: Option<String>,
    },
    /// Report whether credentials are set and the repository is reachable
    Check,
    /// Edit a client's checklist interactively
    Edit {
        /// 10-digit client number (prompted when omitted)
        #[arg(long)]
        client: Option<String>,
    },
    /// Write a backup file from the local copy of a client's answers
    Export {
        #[arg(long)]
        client: String,
        /// Output file (default: avances_<client>.txt)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Load a backup file and save it for its client
    Import {
        /// Backup file produced by `export`
        path: PathBuf,
    },
}

struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn ask(&mut self, question: &str) -> Option<String> {
        print!("{question}");
        let _ = io::stdout().flush();
        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }

    fn confirm(&mut self, question: &str) -> bool {
        self.ask(&format!("{question} [y/N] "))
            .is_some_and(|a| matches!(a.to_ascii_lowercase().as_str(), "y" | "yes" | "s" | "si"))
    }
}

struct App {
    cfg: AppConfig,
    kv: Arc<dyn KvStore>,
    offline: bool,
}

impl App {
    fn load(args: &Args) -> Result<Self> {
        let mut cfg = config::load(&args.config)?;
        if let Some(dir) = args.data_dir.as_ref() {
            cfg.storage.data_dir = Some(dir.clone());
        }
        let store_path = cfg.store_path()?;
        tracing::debug!(path = %store_path.display(), "using local store");
        Ok(Self {
            cfg,
            kv: Arc::new(FileKvStore::new(store_path)),
            offline: args.offline,
        })
    }

    fn credentials(&self) -> CredentialStore {
        CredentialStore::new(self.kv.clone(), &self.cfg.remote)
    }

    fn remote(&self, creds: Option<Credentials>) -> Result<GitHubStore> {
        let creds = if self.offline { None } else { creds };
        GitHubStore::new(&self.cfg.remote, creds)
    }

    fn reconciler(&self, prompter: &mut dyn Prompter) -> Result<Reconciler> {
        let creds = if self.offline {
            None
        } else {
            self.credentials().configure(prompter)
        };
        if creds.is_none() {
            println!("WARN: no GitHub token; answers are kept locally only");
        }
        let store: Arc<dyn RecordStore> = Arc::new(self.remote(creds)?);
        Ok(Reconciler::new(
            store,
            LocalFallbackStore::new(self.kv.clone()),
            Arc::new(StdoutSink),
        )
        .with_debounce(self.cfg.sync.debounce())
        .with_items_per_page(self.cfg.checklist.items_per_page))
    }
}

fn init_logging(json: bool) {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
    }
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_logging(args.log_json);

    let app = App::load(&args)?;
    match args.cmd {
        Command::Configure { owner, repo } => cmd_configure(&app, owner, repo),
        Command::Check => cmd_check(&app),
        Command::Edit { client } => cmd_edit(&app, client),
        Command::Export { client, out } => cmd_export(&app, &client, out),
        Command::Import { path } => cmd_import(&app, &path),
    }
}

fn cmd_configure(app: &App, owner: Option<String>, repo: Option<String>) -> Result<()> {
    let store = app.credentials();
    if owner.is_some() || repo.is_some() {
        let current = store.get_credentials();
        let owner = owner
            .or_else(|| current.as_ref().map(|c| c.owner.clone()))
            .unwrap_or_else(|| app.cfg.remote.owner.clone());
        let repo = repo
            .or_else(|| current.as_ref().map(|c| c.repo.clone()))
            .unwrap_or_else(|| app.cfg.remote.repo.clone());
        store.set_target(&owner, &repo);
    }
    match store.prompt_and_store(&mut StdinPrompter) {
        Some(c) => println!("OK: credentials stored for {}/{}", c.owner, c.repo),
        None => println!("WARN: no token stored; working without GitHub"),
    }
    Ok(())
}

fn cmd_check(app: &App) -> Result<()> {
    let Some(creds) = app.credentials().get_credentials() else {
        println!("credentials: missing (run `checklist configure`)");
        return Ok(());
    };
    println!("credentials: present for {}/{}", creds.owner, creds.repo);
    let reachable = app.remote(Some(creds))?.check_connectivity();
    println!(
        "repository: {}",
        if reachable { "reachable" } else { "unreachable or no permission" }
    );
    Ok(())
}

fn prompt_client_id(prompter: &mut dyn Prompter) -> Result<ClientId> {
    loop {
        let Some(raw) = prompter.ask("Client number (10 digits): ") else {
            return Err(Error::msg("no client number given"));
        };
        match ClientId::parse(&raw) {
            Ok(id) => return Ok(id),
            Err(e) => println!("ERROR: {e}"),
        }
    }
}

fn cmd_edit(app: &App, client: Option<String>) -> Result<()> {
    let mut prompter = StdinPrompter;
    let mut rec = app.reconciler(&mut prompter)?;
    let client_id = match client {
        Some(raw) => ClientId::parse(&raw)?,
        None => prompt_client_id(&mut prompter)?,
    };
    rec.start(client_id);
    Editor::new(rec).run()
}

fn cmd_export(app: &App, client: &str, out: Option<PathBuf>) -> Result<()> {
    let client_id = ClientId::parse(client)?;
    let fields = LocalFallbackStore::new(app.kv.clone()).read(&client_id);
    let out = out.unwrap_or_else(|| PathBuf::from(backup::default_file_name(&client_id)));
    backup::write_file(&out, &client_id, &fields)?;
    println!(
        "OK: {} answers for client {client_id} written to {}",
        fields.len(),
        out.display()
    );
    Ok(())
}

fn cmd_import(app: &App, path: &Path) -> Result<()> {
    let b = backup::read_file(path)?;
    let validation = checklist::validate(&b.fields);
    println!(
        "backup for client {} with {} answers; {}",
        b.client_id,
        b.fields.len(),
        validation.summary()
    );
    let mut rec = app.reconciler(&mut StdinPrompter)?;
    rec.import_backup(b)?;
    // A failed save leaves the answers in the local fallback and is reported on stdout.
    let _ = rec.on_explicit_save();
    Ok(())
}
