use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use shelf::category::{CategoryEvent, CategoryOrdering, CategoryScreen, CategoryScreenState};
use shelf::config::Config;
use shelf::library::Reconciler;
use shelf::source::{CatalogueSource, Filter, FilterList, Listing, PageError, PagingSession, SourcePager};
use shelf::storage::{Category, Database, DatabaseError};

/// Get the config directory path (~/.config/shelf/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("shelf"))
}

#[derive(Parser, Debug)]
#[command(name = "shelf", about = "Browse remote catalogues into a categorised library")]
struct Args {
    /// Reset database (delete and recreate)
    #[arg(long)]
    reset_db: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Page through a configured source and add every entry to the library
    Browse {
        /// Source name from config.toml
        source: String,

        /// Latest updates instead of popular
        #[arg(long, conflicts_with = "query")]
        latest: bool,

        /// Search query
        #[arg(long, short)]
        query: Option<String>,

        /// Search filter as name=value (repeatable)
        #[arg(long = "filter", value_name = "NAME=VALUE", requires = "query")]
        filters: Vec<Filter>,

        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },

    /// Manage categories
    #[command(subcommand)]
    Category(CategoryCommand),

    /// Put an entry into categories (no IDs clears them)
    Assign {
        entry_id: i64,
        category_ids: Vec<i64>,
    },

    /// Mark an entry as favorite
    Favorite {
        entry_id: i64,

        /// Unmark instead
        #[arg(long)]
        remove: bool,
    },
}

#[derive(Subcommand, Debug)]
enum CategoryCommand {
    List,
    Create { name: String },
    Rename { id: i64, name: String },
    Delete { id: i64 },
    Up { id: i64 },
    Down { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config = Config::load(&config_dir.join("config.toml")).context("Failed to load config")?;
    let db_path = config.resolve_database_path(&config_dir);

    if args.reset_db && db_path.exists() {
        std::fs::remove_file(&db_path).context("Failed to delete database")?;
        println!("Database reset.");
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: The library database is locked by another shelf process.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    match args.command {
        Command::Browse {
            source,
            latest,
            query,
            filters,
            pages,
        } => {
            let listing = match query {
                Some(query) => Listing::Search {
                    query,
                    filters: FilterList::new(filters),
                },
                None if latest => Listing::Latest,
                None => Listing::Popular,
            };
            browse(&config, db, &source, listing, pages).await
        }
        Command::Category(command) => run_category_command(db, command).await,
        Command::Assign {
            entry_id,
            category_ids,
        } => {
            db.set_entry_categories(entry_id, &category_ids)
                .await
                .context("Failed to assign categories")?;
            for category in db.get_categories_for_entry(entry_id).await? {
                println!("{:>6}  {}", category.id, category.name);
            }
            Ok(())
        }
        Command::Favorite { entry_id, remove } => {
            db.set_entry_favorite(entry_id, !remove, None)
                .await
                .context("Failed to update favorite")?;
            Ok(())
        }
    }
}

async fn browse(
    config: &Config,
    db: Database,
    source_name: &str,
    listing: Listing,
    pages: u32,
) -> Result<()> {
    let Some(source_config) = config.source(source_name) else {
        let known: Vec<&str> = config.sources.iter().map(|s| s.name.as_str()).collect();
        anyhow::bail!(
            "Unknown source '{}'. Configured sources: {}",
            source_name,
            if known.is_empty() {
                "none".to_string()
            } else {
                known.join(", ")
            }
        );
    };

    let client = reqwest::Client::builder()
        .user_agent(concat!("shelf/", env!("CARGO_PKG_VERSION")))
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;
    let source: Arc<dyn CatalogueSource> = Arc::new(config.build_source(source_config, client)?);
    let source_id = source.id();

    let reconciler = Reconciler::new(Arc::new(db));
    let mut session = PagingSession::new(SourcePager::new(source, listing));

    for _ in 0..pages {
        let page = match session.load_next().await {
            Ok(Some(page)) => page,
            Ok(None) | Err(PageError::NoMoreContent) => {
                println!("No more entries.");
                break;
            }
            Err(e) => return Err(e).context("Failed to load page"),
        };

        let entries = reconciler.reconcile_all(source_id, &page.data).await?;
        for entry in entries {
            let marker = if entry.favorite { "*" } else { " " };
            println!("{:>6} {} {}", entry.id, marker, entry.title);
        }
    }
    Ok(())
}

async fn run_category_command(db: Database, command: CategoryCommand) -> Result<()> {
    let engine = Arc::new(CategoryOrdering::new(Arc::new(db)));
    let (screen, mut events) = CategoryScreen::new(engine);

    let mut state = screen.state();
    let categories = tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| matches!(s, CategoryScreenState::Success { .. })),
    )
    .await
    .context("Timed out loading categories")?
    .context("Category subscription closed")?
    .categories()
    .to_vec();

    let find = |id: i64| -> Result<Category> {
        categories
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No user category with id {}", id))
    };

    match command {
        CategoryCommand::List => {
            for category in &categories {
                println!("{:>6}  {}", category.id, category.name);
            }
            return Ok(());
        }
        CategoryCommand::Create { name } => screen.create_category(&name).await,
        CategoryCommand::Rename { id, name } => screen.rename_category(&find(id)?, &name).await,
        CategoryCommand::Delete { id } => screen.delete_category(find(id)?.id).await,
        CategoryCommand::Up { id } => screen.move_up(&find(id)?).await,
        CategoryCommand::Down { id } => screen.move_down(&find(id)?).await,
    }

    report_events(&mut events)
}

fn report_events(events: &mut mpsc::Receiver<CategoryEvent>) -> Result<()> {
    let Ok(event) = events.try_recv() else {
        return Ok(());
    };
    let message = match event {
        CategoryEvent::CategoryNameConflict => "A category with that name already exists",
        CategoryEvent::InvalidName => "Category name cannot be empty",
        CategoryEvent::InternalError => "Category update failed, see log for details",
    };
    anyhow::bail!("{message}")
}
