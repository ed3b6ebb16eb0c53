//! CLI tool for inspecting a MiniMirror configuration
//!
//! Usage:
//!   minimirror-config [config options] check [--json]
//!   minimirror-config [config options] rewrite [--host <host> | --external] [FILE]

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use hyper::header::{HeaderMap, HeaderValue};
use hyper::Uri;
use minimirror::{BodyRewriter, ConfigStore, MirrorConfig, Settings, TargetConfig};
use std::io::{Read, Write};
use std::path::PathBuf;

/// CLI tool for checking configuration and previewing body rewrites
#[derive(Parser, Debug)]
#[command(name = "minimirror-config")]
#[command(author = "MiniMirror Contributors")]
#[command(version = "1.0.0")]
#[command(about = "Inspect MiniMirror configuration")]
struct Args {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration and list targets
    Check {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rewrite a body the way the proxy would, printing the result
    Rewrite {
        /// Tenant host to rewrite for (multi-tenant mode)
        #[arg(long, conflicts_with = "external")]
        host: Option<String>,

        /// Rewrite as a body fetched through the external route
        #[arg(long)]
        external: bool,

        /// Input file, stdin when omitted
        file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = MirrorConfig::from_settings(&args.settings).context("Invalid configuration")?;

    match args.command {
        Commands::Check { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&config_json(&config))?);
            } else {
                print_config(&config);
            }
        }

        Commands::Rewrite {
            host,
            external,
            file,
        } => {
            let target = select_target(&config, host.as_deref(), external)?;
            let rewriter = BodyRewriter::new(&config.replace_rules, [&target])?;

            let body = match file {
                Some(path) => std::fs::read(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => {
                    let mut buf = Vec::new();
                    std::io::stdin().read_to_end(&mut buf)?;
                    buf
                }
            };

            let rewritten = rewriter.rewrite(Bytes::from(body), &target);
            std::io::stdout().write_all(&rewritten)?;
        }
    }

    Ok(())
}

fn select_target(config: &MirrorConfig, host: Option<&str>, external: bool) -> Result<TargetConfig> {
    if external {
        return Ok(config.store.external_target().cloned().unwrap_or_default());
    }

    match (&config.store, host) {
        (ConfigStore::Single(target), _) => Ok(target.clone()),
        (ConfigStore::Multi(table), Some(host)) => {
            let mut headers = HeaderMap::new();
            headers.insert(table.host_header().clone(), HeaderValue::from_str(host)?);
            let target = config
                .store
                .resolve(&headers, &Uri::from_static("/"))
                .map_err(|e| anyhow!("{}: {}", host, e))?;
            Ok(target.clone())
        }
        (ConfigStore::Multi(_), None) => Err(anyhow!("--host or --external is required in multi-tenant mode")),
    }
}

fn target_json(target: &TargetConfig) -> serde_json::Value {
    serde_json::json!({
        "domain": target.domain,
        "target": target.origin(),
        "secondary_domains": target.secondary_domains,
    })
}

fn config_json(config: &MirrorConfig) -> serde_json::Value {
    let targets = match &config.store {
        ConfigStore::Single(target) => serde_json::json!({ "*": target_json(target) }),
        ConfigStore::Multi(table) => table
            .tenants()
            .into_iter()
            .map(|(host, target)| (host.to_string(), target_json(target)))
            .collect::<serde_json::Map<_, _>>()
            .into(),
    };

    let (host_header, external_key) = match &config.store {
        ConfigStore::Single(_) => (None, None),
        ConfigStore::Multi(table) => (Some(table.host_header().as_str()), table.external_key()),
    };

    serde_json::json!({
        "mode": config.store.mode(),
        "port": config.port,
        "marker_header": config.marker_header.as_str(),
        "upstream_timeout_secs": config.upstream_timeout.as_secs(),
        "host_header": host_header,
        "external_config_key": external_key,
        "replace_rules": config.replace_rules.len(),
        "targets": targets,
    })
}

fn print_config(config: &MirrorConfig) {
    println!("Mode:             {}", config.store.mode());
    println!("Port:             {}", config.port);
    println!("Marker header:    {}", config.marker_header);
    println!("Upstream timeout: {}s", config.upstream_timeout.as_secs());
    println!("Replace rules:    {}", config.replace_rules.len());

    match &config.store {
        ConfigStore::Single(target) => {
            println!();
            print_target(target);
        }
        ConfigStore::Multi(table) => {
            println!("Host header:      {}", table.host_header());
            println!(
                "External key:     {}",
                table.external_key().unwrap_or("(none)")
            );
            println!();
            println!("{:<30} {:<40} {:<40}", "HOST", "DOMAIN", "TARGET");
            println!("{}", "-".repeat(110));

            let tenants = table.tenants();
            for (host, target) in &tenants {
                println!("{:<30} {:<40} {:<40}", host, target.domain, target.origin());
                for domain in &target.secondary_domains {
                    println!("{:<30}   secondary: {}", "", domain);
                }
            }

            println!("\nTotal: {} tenant(s)", tenants.len());
        }
    }
}

fn print_target(target: &TargetConfig) {
    println!("  Domain:     {}", target.domain);
    println!("  Target:     {}", target.origin());
    for domain in &target.secondary_domains {
        println!("  Secondary:  {}", domain);
    }
}
