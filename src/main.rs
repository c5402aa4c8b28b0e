mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use vl_core::{hash_name, Config, IdentityRegistry};
use vl_db::pool::{get_conn, init_pool};
use vl_db::queries::harvests;

async fn start_proxy(host: Option<String>, port: Option<u16>, config_path: Option<&Path>) -> Result<()> {
    let (mut config, path) = Config::discover(config_path)?;
    tracing::info!("Loaded config from {}", path.display());

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    vl_proxy::start(config).await?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "virtlib=trace,vl_proxy=trace,vl_codec=trace,vl_db=debug,tower_http=debug".to_string()
        } else {
            "virtlib=debug,vl_proxy=debug,vl_db=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_proxy(host, port, cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Hash { name } => {
            println!("{}", hash_name(&name));
            Ok(())
        }
        Commands::HarvestStatus => harvest_status(cli.config.as_deref()),
        Commands::Version => {
            println!("virtlib {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let (config, path) = Config::discover(path)?;
    println!("Validating config: {}", path.display());

    let warnings = config.validate()?;
    println!("✓ Configuration is valid");
    for warning in &warnings {
        println!("  ! {warning}");
    }
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Upstream: {}{}", config.upstream.base_url(), config.upstream.path_prefix);
    println!("  API key: {}", if config.upstream.api_key.is_some() { "set" } else { "not set" });
    println!("  Harvest enabled: {}", config.harvest.enabled);
    println!("  Virtual libraries: {}", config.libraries.len());

    let registry = IdentityRegistry::new(config.libraries.clone());
    for library in registry.libraries() {
        println!(
            "    {} -> {} ({:?} {})",
            library.name,
            registry.id_of(library),
            library.resource.kind,
            library.resource.id
        );
    }

    Ok(())
}

fn harvest_status(config_path: Option<&Path>) -> Result<()> {
    let (config, _) = Config::discover(config_path)?;
    let store = &config.harvest.store_path;
    if !store.exists() {
        println!("No harvest store at {}", store.display());
        return Ok(());
    }

    let pool = init_pool(store).with_context(|| format!("opening {}", store.display()))?;
    let conn = get_conn(&pool)?;
    let marks = harvests::list_marks(&conn)?;

    for library in &config.libraries {
        match marks.iter().find(|m| m.library_name == library.name) {
            Some(mark) => println!(
                "✓ {} ({}, {})",
                library.name,
                mark.source.as_str(),
                mark.completed_at
            ),
            None => println!("✗ {}", library.name),
        }
    }

    let orphaned: Vec<_> = marks
        .iter()
        .filter(|m| !config.libraries.iter().any(|l| l.name == m.library_name))
        .collect();
    if !orphaned.is_empty() {
        println!("\nMarks for libraries no longer configured:");
        for mark in orphaned {
            println!("  {} ({})", mark.library_name, mark.completed_at);
        }
    }

    Ok(())
}
