use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use plancache::cache::{
    EntrySummary, JsonPlanCodec, ModeController, OpaquePlan, PlanCache, PlanCacheAdmin,
};
use plancache::config::Config;
use plancache::core::{Fingerprint, ObjectId, PlanCacheResult};
use plancache::utils::logging;

/// 计划缓存离线管理工具
#[derive(Parser)]
#[clap(version, about = "Inspect and maintain a persisted plan cache")]
struct Cli {
    /// Configuration file
    #[clap(short, long, default_value = "plancache.toml")]
    config: PathBuf,

    /// Override the store path from the configuration
    #[clap(short, long)]
    store: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List all cached plans
    List,
    /// List invalidated plans
    Invalid,
    /// Show a stored plan
    Show {
        fingerprint: Fingerprint,
        #[clap(short, long, default_value = "text")]
        format: String,
    },
    /// Delete a single plan
    Delete { fingerprint: Fingerprint },
    /// Invalidate every plan depending on the given catalog objects
    InvalidateObject {
        #[clap(required = true)]
        objects: Vec<u32>,
    },
    /// Invalidate all plans
    Clear,
    /// Delete all plans
    Reset,
    /// Delete invalidated plans
    PurgeInvalid,
    /// Print the installed administrative surface
    Surface,
    /// Write a default configuration file
    InitConfig {
        #[clap(default_value = "plancache.toml")]
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => {
            logging::shutdown();
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            logging::shutdown();
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> PlanCacheResult<()> {
    if let Command::InitConfig { path } = &cli.command {
        Config::default().save(path)?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    let mut config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };
    if let Some(store) = cli.store {
        config.storage_path = store;
    }
    logging::init(&config)?;

    let cache = Arc::new(PlanCache::from_config(&config)?);
    let modes = Arc::new(ModeController::new(config.modes()));
    let admin = PlanCacheAdmin::new(Arc::clone(&cache), modes);

    match cli.command {
        Command::List => print_entries(&admin.entries()),
        Command::Invalid => print_entries(&admin.invalid_entries()),
        Command::Show {
            fingerprint,
            format,
        } => {
            let rendered = admin.show_plan::<OpaquePlan, _>(fingerprint, &JsonPlanCodec, &format)?;
            println!("{}", rendered);
        }
        Command::Delete { fingerprint } => {
            admin.delete(fingerprint)?;
            println!("deleted {}", fingerprint);
        }
        Command::InvalidateObject { objects } => {
            let invalidated = cache.on_objects_changed(objects.into_iter().map(ObjectId))?;
            println!("invalidated {} plan(s)", invalidated.len());
        }
        Command::Clear => println!("invalidated {} plan(s)", admin.clear()?),
        Command::Reset => println!("deleted {} plan(s)", admin.reset()?),
        Command::PurgeInvalid => println!("deleted {} plan(s)", admin.purge_invalid()?),
        Command::Surface => print!("{}", admin.surface()?),
        Command::InitConfig { .. } => {}
    }

    cache.checkpoint()?;
    Ok(())
}

fn print_entries(entries: &[EntrySummary]) {
    println!(
        "{:<16}  {:<7}  {:>8}  {:<32}  query",
        "fingerprint", "state", "usage", "dependencies"
    );
    for entry in entries {
        println!(
            "{:<16}  {:<7}  {:>8}  {:<32}  {}",
            entry.fingerprint.to_string(),
            entry.state.to_string(),
            entry.usage_count,
            entry.dependencies.summary(),
            entry.query_text
        );
    }
}
