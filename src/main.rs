use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use alist_lib::config::{AppConfig, ChoiceLists, DATABASE_NAME, LOG_DIR_ENV};
use alist_lib::executors::{self, AppExecutors};
use alist_lib::{
    field_values, share_text, AppState, Field, Item, ItemFilter, OrderBy, WRITE_FAILED, NO_ID,
};

#[derive(Debug, Parser)]
#[command(name = "alist", about = "Keep a personal list of things to do", version)]
struct Cli {
    /// Database file to use instead of the one in the data directory.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// JSON file with the category and status choice lists.
    #[arg(long, global = true)]
    choices: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show items, optionally filtered.
    List(ListArgs),
    /// Add a new item.
    Add(ItemArgs),
    /// Rewrite an existing item.
    Update {
        #[arg(long)]
        id: i64,
        #[command(flatten)]
        item: ItemArgs,
    },
    /// Delete items by id, or every item with `--all`.
    Delete {
        #[arg(long = "id", required_unless_present = "all")]
        ids: Vec<i64>,
        #[arg(long, conflicts_with = "ids")]
        all: bool,
    },
    /// Print the category and status choice lists.
    Choices {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args)]
struct ListArgs {
    /// Text contained in the name.
    #[arg(long, default_value = "")]
    name: String,
    /// Text contained in the description.
    #[arg(long, default_value = "")]
    description: String,
    /// Category to match; the first choice matches every category.
    #[arg(long)]
    category: Option<String>,
    /// Status to match; the first choice matches every status.
    #[arg(long)]
    status: Option<String>,
    /// Restrict to one row.
    #[arg(long)]
    row_id: Option<i64>,
    #[arg(long, default_value = "name")]
    order_by: Field,
    #[arg(long)]
    desc: bool,
    /// Emit the items as a JSON array.
    #[arg(long, conflicts_with = "share")]
    json: bool,
    /// Emit the items as share text.
    #[arg(long)]
    share: bool,
}

#[derive(Debug, Args)]
struct ItemArgs {
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long)]
    category: String,
    #[arg(long)]
    status: String,
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            1
        }
    };
    process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let log_dir = std::env::var_os(LOG_DIR_ENV).map(PathBuf::from);
    let _log_guard = alist_lib::logging::init(log_dir.as_deref())?;

    let mut config = AppConfig::from_env().context("resolve configuration")?;
    if let Some(db) = cli.db {
        config.db_path = if db.is_dir() { db.join(DATABASE_NAME) } else { db };
    }
    if let Some(path) = cli.choices {
        config.choices = ChoiceLists::load(&path)?;
    }

    let executors = AppExecutors::new(config.worker_threads)?;
    let _foreground = executors::enter_foreground();
    let state = Arc::new(AppState::new(config));

    let code = executors.run_blocking(handle_command(state, cli.command))??;
    tracing::debug!(target: "alist", event = "cli_finished", code);
    Ok(code)
}

async fn handle_command(state: Arc<AppState>, command: Commands) -> Result<i32> {
    match command {
        Commands::List(args) => list(&state, args).await,
        Commands::Add(item) => {
            let repo = state.repository().await?;
            let values = field_values(&item.name, &item.description, &item.category, &item.status);
            let id = repo.insert_item(Some(&values)).await?;
            if id == WRITE_FAILED {
                eprintln!("Insert error");
                return Ok(1);
            }
            println!("Row inserted: {id}");
            Ok(0)
        }
        Commands::Update { id, item } => {
            let repo = state.repository().await?;
            let values = field_values(&item.name, &item.description, &item.category, &item.status);
            let changed = repo.update_item(id, Some(&values)).await?;
            if changed == WRITE_FAILED {
                eprintln!("Update error");
                return Ok(1);
            }
            println!("Rows updated: {changed}");
            Ok(0)
        }
        Commands::Delete { ids, all } => {
            let repo = state.repository().await?;
            let removed = if all {
                repo.select_all().await?;
                repo.delete_current().await
            } else {
                let items: Vec<Item> = ids
                    .into_iter()
                    .map(|id| Item {
                        id,
                        ..Item::default()
                    })
                    .collect();
                repo.delete_items(&items).await
            };
            if removed == WRITE_FAILED {
                eprintln!("Delete error");
                return Ok(1);
            }
            println!("Rows deleted: {removed}");
            Ok(0)
        }
        Commands::Choices { json } => {
            let choices = state.choices();
            if json {
                println!("{}", serde_json::to_string_pretty(choices.as_ref())?);
            } else {
                println!("categories: {}", choices.categories().join(", "));
                println!("statuses: {}", choices.statuses().join(", "));
            }
            Ok(0)
        }
    }
}

async fn list(state: &AppState, args: ListArgs) -> Result<i32> {
    let repo = state.repository().await?;
    let choices = repo.choices();
    let filter = ItemFilter {
        name: args.name,
        description: args.description,
        category: args
            .category
            .unwrap_or_else(|| choices.category_placeholder().to_string()),
        status: args
            .status
            .unwrap_or_else(|| choices.status_placeholder().to_string()),
        row_id: args.row_id.unwrap_or(NO_ID),
        order_by: OrderBy::primary_with_direction(args.order_by, args.desc),
    };
    tracing::debug!(target: "alist", event = "list_filter", mode = %filter.mode(choices));

    repo.select_filtered(&filter).await?;
    let items = repo.fetch_current().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if args.share {
        print!("{}", share_text(&items));
    } else {
        for item in &items {
            println!(
                "{}\t{}\t{}\t{}\t{}",
                item.id, item.name, item.description, item.category, item.status
            );
        }
    }
    Ok(0)
}
