//! picmeta CLI - inspect and edit image attributes
//!
//! Reads go through the attribute cache when it is enabled; every edit is
//! written back into the image file before the command returns.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use picmeta_codec::jpeg::has_payload;
use picmeta_common::{Attribute, AttributeSource, Config, Value, ValueType};
use picmeta_storage::{AttributeStorage, CachedStorage, EntityManager};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "picmeta")]
#[command(about = "Image attribute tool")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "picmeta.toml")]
    config: String,

    /// Log level (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,

    /// Bypass the attribute cache
    #[arg(long)]
    no_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show every attribute of an image
    Show {
        path: PathBuf,
        /// Print the entity as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set a custom attribute
    Set {
        path: PathBuf,
        name: String,
        /// Value type: int, real, string, datetime
        #[arg(value_name = "TYPE")]
        value_type: String,
        value: String,
    },
    /// Remove a custom attribute
    Unset { path: PathBuf, name: String },
    /// Rename an image
    Mv { from: PathBuf, to: PathBuf },
    /// Delete an image
    Rm { path: PathBuf },
    /// List the JPEG segments of an image
    Segments { path: PathBuf },
    /// Flush the attribute cache and evict expired rows
    Flush,
}

fn load_config(path: &str) -> Result<Config> {
    let config: Config = if Path::new(path).exists() {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {path}"))?;
        toml::from_str(&config_str).with_context(|| format!("parsing config file {path}"))?
    } else {
        Config::default()
    };
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let mut config = load_config(&args.config)?;
    if args.no_cache {
        config.cache.enabled = false;
    }
    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    debug!("Configuration: {:?}", config);

    let storage = Arc::new(CachedStorage::from_config(&config)?);
    let manager = EntityManager::new(storage.clone());

    match args.command {
        Commands::Show { path, json } => show(&manager, &path, json)?,
        Commands::Set {
            path,
            name,
            value_type,
            value,
        } => {
            let value_type: ValueType = value_type.parse()?;
            if value_type == ValueType::Image {
                bail!("image attributes cannot be set from the command line");
            }
            let value = Value::parse(value_type, &value)?;
            let handle = manager.get(&path)?;
            if handle
                .read()
                .get(&name)
                .is_some_and(|a| a.source() == AttributeSource::Metadata)
            {
                bail!("'{name}' is read-only metadata");
            }
            handle
                .write()
                .set_attribute(Attribute::new(name.as_str(), value, AttributeSource::Custom));
            manager.set(&handle);
            save_modified(&manager)?;
            println!("{}: {} set", path.display(), name);
        }
        Commands::Unset { path, name } => {
            let handle = manager.get(&path)?;
            let removed = {
                let mut entity = handle.write();
                match entity.get(&name).map(Attribute::is_custom) {
                    Some(true) => entity.remove_attribute(&name).is_some(),
                    Some(false) => bail!("'{name}' is read-only metadata"),
                    None => false,
                }
            };
            if removed {
                manager.set(&handle);
                save_modified(&manager)?;
                println!("{}: {} removed", path.display(), name);
            } else {
                println!("{}: no attribute {}", path.display(), name);
            }
        }
        Commands::Mv { from, to } => {
            manager.move_path(&from, &to)?;
            println!("{} -> {}", from.display(), to.display());
        }
        Commands::Rm { path } => {
            manager.remove(&path)?;
            println!("{} removed", path.display());
        }
        Commands::Segments { path } => segments(&storage, &path)?,
        Commands::Flush => match storage.cache() {
            Some(cache) => {
                let report = cache.flush()?;
                println!("Attribute Cache");
                println!("===============");
                println!("Path:    {}", config.cache.path.display());
                println!("Rows:    {}", cache.len()?);
                println!("Written: {}", report.written);
                println!("Evicted: {}", report.evicted);
            }
            None => println!("Attribute cache is disabled"),
        },
    }

    Ok(())
}

/// Store every entity queued by the manager
fn save_modified(manager: &EntityManager) -> Result<usize> {
    let modified = manager.get_modified();
    for entity in modified.values() {
        manager
            .storage()
            .store(entity)
            .with_context(|| format!("saving {}", entity.path().display()))?;
    }
    info!("Saved {} entities", modified.len());
    Ok(modified.len())
}

fn show(manager: &EntityManager, path: &Path, json: bool) -> Result<()> {
    let handle = manager.get(path)?;
    let entity = handle.read();

    if json {
        println!("{}", serde_json::to_string_pretty(&*entity)?);
        return Ok(());
    }

    println!("{}", entity.path().display());
    println!("{}", "=".repeat(entity.path().display().to_string().len()));
    println!("{:<20} {:<9} {:<9} VALUE", "NAME", "TYPE", "SOURCE");
    for attribute in entity.attributes() {
        let value = match attribute.value() {
            Value::Image(Some(bytes)) => format!("<{} bytes>", bytes.len()),
            other => other.to_string(),
        };
        println!(
            "{:<20} {:<9} {:<9} {}",
            attribute.name(),
            attribute.value_type().to_string(),
            attribute.source().to_string(),
            value
        );
    }
    Ok(())
}

fn segments(storage: &CachedStorage, path: &Path) -> Result<()> {
    let segments = storage.files().read_segments(path)?;
    println!("{:<8} {:<10} {:<8} HEADER", "MARKER", "OFFSET", "LENGTH");
    for segment in &segments {
        let header: String = segment
            .payload
            .iter()
            .take(24)
            .take_while(|&&b| b != 0)
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        let length = if has_payload(segment.marker) {
            segment.payload.len().to_string()
        } else {
            "-".to_string()
        };
        println!(
            "0xFF{:02X}   {:<10} {:<8} {}",
            segment.marker, segment.offset, length, header
        );
    }
    Ok(())
}
