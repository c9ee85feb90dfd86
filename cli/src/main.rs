mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use crate::commands::{
    RecordEdit, cmd_delete, cmd_edit, cmd_image, cmd_list, cmd_show, cmd_snap, parse_record_id,
};
use crate::config::Config;
use calsnap_core::coordinator::FoodLogCoordinator;
use calsnap_core::store::SqliteStore;
use calsnap_core::vision::{VisionClient, VisionConfig};

#[derive(Parser)]
#[command(
    name = "calsnap",
    version,
    about = "Photograph your food, get a calorie log",
    long_about = "Photograph your food, get a calorie log.\n\n\
                  `calsnap snap lunch.jpg` sends the photo to a vision model, \
                  which names the dish, lists its ingredients and estimates its \
                  calories. The result is stored locally and can be browsed by day."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a food photo and log it
    Snap {
        /// Path to the image (JPEG)
        image: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List records for a day (defaults to today)
    List {
        /// Date to show (YYYY-MM-DD or today/yesterday/tomorrow)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one record in detail
    Show {
        /// Record ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit a record's name, calories, ingredients or notes
    Edit {
        /// Record ID
        id: String,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New calorie estimate
        #[arg(long)]
        calories: Option<u32>,
        /// Replace the ingredient list (comma-separated, e.g. "rice,beans,salsa")
        #[arg(long)]
        ingredients: Option<String>,
        /// Append an ingredient (repeatable)
        #[arg(long = "add-ingredient", value_name = "INGREDIENT")]
        add_ingredient: Vec<String>,
        /// Remove the ingredient at a 1-based position (repeatable)
        #[arg(long = "remove-ingredient", value_name = "N")]
        remove_ingredient: Vec<usize>,
        /// Set notes (an empty string clears them)
        #[arg(long)]
        notes: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a record
    Delete {
        /// Record ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Save a record's stored photo to a file
    Image {
        /// Record ID
        id: String,
        /// Output file
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "calsnap=info,calsnap_core=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;

    // Only `snap` calls the vision API, so only it insists on a key.
    let vision = match cli.command {
        Commands::Snap { .. } => config.vision()?,
        _ => config
            .vision()
            .unwrap_or_else(|_| VisionConfig::new(String::new())),
    };
    let analyzer = Arc::new(VisionClient::new(&vision)?);
    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let coordinator = FoodLogCoordinator::new(analyzer, store)?;

    match cli.command {
        Commands::Snap { image, json } => cmd_snap(&coordinator, &image, json).await,
        Commands::List { date, json } => cmd_list(&coordinator, date, json),
        Commands::Show { id, json } => cmd_show(&coordinator, parse_record_id(&id)?, json),
        Commands::Edit {
            id,
            name,
            calories,
            ingredients,
            add_ingredient,
            remove_ingredient,
            notes,
            json,
        } => {
            let edit = RecordEdit {
                name,
                calories,
                ingredients,
                add_ingredients: add_ingredient,
                remove_ingredients: remove_ingredient,
                notes,
            };
            cmd_edit(&coordinator, parse_record_id(&id)?, &edit, json)
        }
        Commands::Delete { id, json } => cmd_delete(&coordinator, parse_record_id(&id)?, json),
        Commands::Image { id, out } => cmd_image(&coordinator, parse_record_id(&id)?, &out),
    }
}
