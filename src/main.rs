// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use recognition_wall::{
    admin, group_by_rank, AffiliateRecord, Config, RankCatalog, RecordStore, SqliteStore,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "recognition-wall")]
#[command(about = "Rank recognition slideshow and affiliate registry", version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "RECOGNITION_WALL_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database, overrides the config file
    #[arg(long, env = "RECOGNITION_WALL_DB")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a delimited file; promotions are listed and skipped unless accepted
    Import {
        file: PathBuf,

        /// Apply every rank promotion found in the file
        #[arg(long)]
        accept_promotions: bool,
    },

    /// Add or update an affiliate by distributor id
    Add {
        #[arg(long)]
        distributor_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        rank: String,
        #[arg(long)]
        country: Option<String>,
        #[arg(long)]
        photo: Option<String>,
        #[arg(long)]
        quote: Option<String>,
        /// Honored (club) member
        #[arg(long)]
        club: bool,
    },

    /// Toggle visibility on the wall
    Hide { distributor_id: String },

    Delete { distributor_id: String },

    /// Delete every affiliate
    Clear {
        #[arg(long)]
        yes: bool,
    },

    /// Set a rank's pin image
    Pin { rank: String, image: String },

    /// Set the honored-member pin image
    ClubPin { image: String },

    /// Print the current display sequence as JSON
    Timeline,

    /// List affiliates grouped by rank
    List {
        #[arg(long, default_value = "")]
        search: String,
    },

    /// Run the slideshow in the terminal (default)
    Play,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Play);

    // Log lines would tear the slideshow, so play only reports warnings
    let default_filter = match command {
        Command::Play => "recognition_wall=warn",
        _ => "recognition_wall=info",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::resolve(cli.config.as_deref()).context("loading configuration")?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    let mut store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("opening database {}", config.database_path.display()))?;
    let catalog = RankCatalog::default();

    match command {
        Command::Import { file, accept_promotions } => {
            run_import(&mut store, &catalog, &config, &file, accept_promotions)?
        }
        Command::Add { distributor_id, name, rank, country, photo, quote, club } => {
            // Editing keeps the record's internal id
            let id = admin::existing_id(&store, &distributor_id)
                .context("looking up distributor id")?
                .unwrap_or_default();

            let mut record = AffiliateRecord::new(id, distributor_id, name, rank);
            record.country = country;
            record.photo_ref = photo;
            record.quote = quote;
            record.is_honored_member = club;

            let saved = admin::save_affiliate(&mut store, &catalog, record)?;
            println!("✓ Saved {} ({}) as {}", saved.display_name, saved.distributor_id, saved.rank_name);
        }
        Command::Hide { distributor_id } => {
            let record = admin::find_by_distributor_id(&store, &distributor_id)?;
            let hidden = admin::toggle_hidden(&mut store, &record.id)?;
            println!("✓ {} is now {}", record.display_name, if hidden { "hidden" } else { "visible" });
        }
        Command::Delete { distributor_id } => {
            let record = admin::find_by_distributor_id(&store, &distributor_id)?;
            admin::delete_affiliate(&mut store, &record.id)?;
            println!("✓ Deleted {}", record.display_name);
        }
        Command::Clear { yes } => {
            if !yes {
                bail!("refusing to delete every affiliate without --yes");
            }
            let removed = admin::clear_all(&mut store)?;
            println!("✓ Deleted {} affiliates", removed);
        }
        Command::Pin { rank, image } => {
            admin::set_pin(&mut store, &catalog, &rank, &image)?;
            println!("✓ Pin set for {}", rank);
        }
        Command::ClubPin { image } => {
            admin::set_club_pin(&mut store, &image)?;
            println!("✓ Club pin set");
        }
        Command::Timeline => {
            let timeline = admin::load_timeline(&store, &catalog, &config.schedule)?;
            println!("{}", serde_json::to_string_pretty(&timeline)?);
        }
        Command::List { search } => {
            let records = store.all_records()?;
            for (rank, items) in group_by_rank(&records, &catalog, &search) {
                println!("\n🏅 {} ({})", rank, items.len());
                for a in items {
                    let club = if a.is_honored_member { " ★" } else { "" };
                    let hidden = if a.hidden { " [hidden]" } else { "" };
                    println!("   {:<12} {}{}{}", a.distributor_id, a.display_name, club, hidden);
                }
            }
        }
        Command::Play => run_ui_mode(store, catalog, config)?,
    }

    Ok(())
}

fn run_import(
    store: &mut SqliteStore,
    catalog: &RankCatalog,
    config: &Config,
    file: &std::path::Path,
    accept_promotions: bool,
) -> Result<()> {
    println!("📂 Importing {}...", file.display());
    let raw = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;

    let summary = admin::import_batch(store, catalog, &raw, &config.import)?;

    println!("✓ Added: {}", summary.added);
    println!("✓ Unchanged: {}", summary.unchanged_rows);
    if summary.duplicate_rows > 0 {
        println!("⚠️  Repeated ids ignored: {}", summary.duplicate_rows);
    }
    if summary.skipped_rows > 0 {
        println!("⚠️  Rows without name or id: {}", summary.skipped_rows);
    }

    if summary.pending.is_empty() {
        return Ok(());
    }

    println!("\n🔼 Promotions found: {}", summary.pending.len());
    for conflict in summary.pending.iter() {
        println!(
            "   {:<12} {}: {} → {}",
            conflict.existing.distributor_id,
            conflict.existing.display_name,
            conflict.existing.rank_name,
            conflict.incoming.rank_name
        );
    }

    if accept_promotions {
        let updated = admin::confirm_promotions(store, &summary.pending)?;
        println!("✓ Promoted {} affiliates", updated);
    } else {
        let dropped = admin::reject_promotions(summary.pending);
        println!("✗ {} promotions not applied (re-run with --accept-promotions)", dropped);
    }

    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(store: SqliteStore, catalog: RankCatalog, config: Config) -> Result<()> {
    let mut app = ui::App::new(store, catalog, config.schedule)?;
    ui::run_ui(&mut app)
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_store: SqliteStore, _catalog: RankCatalog, _config: Config) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API: cargo run --bin recognition-server --features server");
    std::process::exit(1);
}
