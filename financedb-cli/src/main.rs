use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;
use financedb::{
    CreditCard, FinanceDao, HistoryEntry, LedgerEntry, Record, ShopItem, SoldItem, Store,
    StoreConfig, FINANCE_SCHEMA,
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::path::PathBuf;
use std::process;

/// financedb CLI: inspect and maintain a finance tracker database
#[derive(Parser)]
#[command(name = "financedb", version, about)]
struct Cli {
    /// Path to the database file (default: $FINANCEDB_PATH, then the platform data directory)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    /// Drop and recreate all tables if the file has a schema with no migration path
    #[arg(long)]
    allow_destructive_migration: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum Table {
    Entries,
    #[value(alias = "shop_items")]
    ShopItems,
    #[value(alias = "sold_items")]
    SoldItems,
    #[value(alias = "entry_history")]
    EntryHistory,
    #[value(alias = "credit_cards")]
    CreditCards,
}

#[derive(Clone, Copy, ValueEnum)]
enum LiveView {
    Entries,
    ShopItems,
    ShopTotal,
    SoldItems,
    Profits,
    History,
    CreditCards,
}

#[derive(Subcommand)]
enum Command {
    /// Show schema version, identity hash and row counts
    Status,

    /// List every row of a table
    List {
        table: Table,
    },

    /// Get a single row by id
    Get {
        table: Table,
        id: i64,
    },

    /// Look up a ledger entry by its exact name
    Entry {
        name: String,
    },

    /// Print the CREATE statements of the declared schema
    Schema,

    /// Compare the live tables against the declared schema
    Validate,

    /// Delete every row of every table
    Wipe {
        /// Confirm the wipe. Nothing is deleted without it.
        #[arg(long)]
        yes: bool,
    },

    /// Monthly profit from sold items, newest month first
    Profits,

    /// Purchase value of the current inventory
    ShopTotal,

    /// Amount changes of one ledger entry
    History {
        entry_id: i64,
    },

    /// Print a reactive query every time its tables change (Ctrl-C to stop)
    Watch {
        view: LiveView,
        /// Entry id for the history view
        #[arg(long, default_value_t = 0)]
        entry: i64,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn resolve_db_path(flag: Option<PathBuf>) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(path) = flag {
        return Ok(path);
    }
    if let Ok(path) = std::env::var("FINANCEDB_PATH") {
        return Ok(PathBuf::from(path));
    }
    let proj = ProjectDirs::from("com", "financedb", "financedb")
        .ok_or("Could not determine platform-specific data dir")?;
    let data_dir = proj.data_dir();
    std::fs::create_dir_all(data_dir)
        .map_err(|e| format!("Failed to create data dir {}: {e}", data_dir.display()))?;
    Ok(data_dir.join("finance.db"))
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Command::Schema = cli.command {
        let value = serde_json::json!({
            "version": FINANCE_SCHEMA.version,
            "identity_hash": FINANCE_SCHEMA.identity_hash(),
            "statements": FINANCE_SCHEMA.create_statements(),
        });
        return print_output(&value, &cli.format);
    }

    let path = resolve_db_path(cli.db)?;
    log::debug!("Opening {}", path.display());
    let config = StoreConfig::file(&path)
        .fallback_to_destructive_migration(cli.allow_destructive_migration);
    let store = Store::open(config)?;

    match cli.command {
        Command::Status => {
            let mut status = store.status()?;
            status["path"] = serde_json::Value::String(path.display().to_string());
            print_output(&status, &cli.format)?;
        }

        Command::List { table } => {
            let rows = match table {
                Table::Entries => to_json(&store.list::<LedgerEntry>()?)?,
                Table::ShopItems => to_json(&store.list::<ShopItem>()?)?,
                Table::SoldItems => to_json(&store.list::<SoldItem>()?)?,
                Table::EntryHistory => to_json(&store.list::<HistoryEntry>()?)?,
                Table::CreditCards => to_json(&store.list::<CreditCard>()?)?,
            };
            print_output(&rows, &cli.format)?;
        }

        Command::Get { table, id } => {
            let row = match table {
                Table::Entries => get_json::<LedgerEntry>(&store, id)?,
                Table::ShopItems => get_json::<ShopItem>(&store, id)?,
                Table::SoldItems => get_json::<SoldItem>(&store, id)?,
                Table::EntryHistory => get_json::<HistoryEntry>(&store, id)?,
                Table::CreditCards => get_json::<CreditCard>(&store, id)?,
            };
            print_output(&row, &cli.format)?;
        }

        Command::Entry { name } => {
            let entry = store
                .entry_by_name(&name)?
                .ok_or_else(|| format!("No entry named '{name}'"))?;
            print_output(&to_json(&entry)?, &cli.format)?;
        }

        Command::Schema => {}

        Command::Validate => {
            store.validate()?;
            print_output(
                &serde_json::json!({ "ok": true, "outcome": format!("{:?}", store.open_outcome()) }),
                &cli.format,
            )?;
        }

        Command::Wipe { yes } => {
            if !yes {
                return Err("Refusing to wipe without --yes".into());
            }
            store.clear_all_tables()?;
            print_output(&serde_json::json!({ "ok": true, "wiped": true }), &cli.format)?;
        }

        Command::Profits => {
            print_output(&to_json(&store.monthly_profits()?)?, &cli.format)?;
        }

        Command::ShopTotal => {
            print_output(&serde_json::json!({ "total": store.shop_total()? }), &cli.format)?;
        }

        Command::History { entry_id } => {
            print_output(&to_json(&store.history_for_entry(entry_id)?)?, &cli.format)?;
        }

        Command::Watch { view, entry } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(watch(FinanceDao::new(store), view, entry, &cli.format))?;
        }
    }

    Ok(())
}

async fn watch(
    dao: FinanceDao,
    view: LiveView,
    entry: i64,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match view {
        LiveView::Entries => follow(dao.observe_entries()?, format).await,
        LiveView::ShopItems => follow(dao.observe_shop_items()?, format).await,
        LiveView::ShopTotal => follow(dao.observe_shop_total()?, format).await,
        LiveView::SoldItems => follow(dao.observe_sold_items()?, format).await,
        LiveView::Profits => follow(dao.observe_monthly_profits()?, format).await,
        LiveView::History => follow(dao.observe_history(entry)?, format).await,
        LiveView::CreditCards => follow(dao.observe_credit_cards()?, format).await,
    }
}

/// Print each result of `live` until it ends or Ctrl-C is pressed.
async fn follow<T, S>(mut live: S, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>>
where
    T: Serialize,
    S: Stream<Item = financedb::Result<T>> + Unpin,
{
    loop {
        tokio::select! {
            item = live.next() => match item {
                Some(result) => {
                    print_output(&to_json(&result?)?, format)?;
                    if let OutputFormat::Yaml = format {
                        println!("---");
                    }
                }
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

fn get_json<R: Record + Serialize>(
    store: &Store,
    id: i64,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let row = store
        .get::<R>(id)?
        .ok_or_else(|| format!("No row with id {id} in {}", R::TABLE.name))?;
    to_json(&row)
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    Ok(serde_json::to_value(value)?)
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value)?);
        }
    }
    Ok(())
}
