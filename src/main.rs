//! # Registry Harness CLI (`regctx`)
//!
//! ## Usage
//!
//! ```bash
//! regctx --config ./regctx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `regctx whoami` | Show which backend the current credentials resolve to |
//! | `regctx packages` | List (or filter) packages in a registry |
//! | `regctx search "<query>"` | Federated search across every available source |
//! | `regctx browse <package>` | List entries of a package's latest revision |
//! | `regctx diff <a> <b>` | Compare two package revisions |
//! | `regctx buckets` | List visible buckets |
//! | `regctx serve` | Start the HTTP tool server |
//!
//! ## Examples
//!
//! ```bash
//! regctx --registry s3://team-data packages --query sequencing
//! regctx --token "$CATALOG_TOKEN" search "rna seq" --scope bucket --bucket team-data
//! regctx diff team/data team/data --hash1 a1b2c3 --hash2 d4e5f6
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use registry_harness::config;
use registry_harness::logging;
use registry_harness::models::DiffRequest;
use registry_harness::ops::{self, Ops};
use registry_harness::resolver::{RequestContext, Resolver};
use registry_harness::search::{SearchRequest, SearchScope};
use registry_harness::server;

/// Registry Harness: one interface over package registries, whichever
/// credentials you have.
#[derive(Parser)]
#[command(
    name = "regctx",
    about = "Registry Harness: browse, search, and version data packages in object storage",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Optional; defaults and
    /// `REGCTX_*` variables apply when it is absent.
    #[arg(long, global = true, default_value = "./regctx.toml")]
    config: PathBuf,

    /// Registry to use when a command names none (`s3://bucket`).
    #[arg(long, global = true)]
    registry: Option<String>,

    /// Catalog bearer token; selects the platform-API backend.
    #[arg(long, global = true)]
    token: Option<String>,

    /// AWS profile for the credential-only backend.
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Print JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    /// Debug-level logging unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved backend, or why none resolved.
    Whoami,

    /// List packages in a registry.
    Packages {
        /// Only packages whose name, message, or metadata match.
        #[arg(long)]
        query: Option<String>,
    },

    /// Search packages and objects across all available sources.
    Search {
        query: String,

        /// `global`, `bucket`, or `package`.
        #[arg(long, default_value = "global")]
        scope: String,

        #[arg(long)]
        bucket: Option<String>,

        #[arg(long)]
        package: Option<String>,

        /// Maximum individual hits (0 = configured default).
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },

    /// List entries of a package's latest revision.
    Browse {
        package: String,

        /// Only entries at or below this path.
        #[arg(long, default_value = "")]
        path: String,
    },

    /// Compare two package revisions.
    Diff {
        package1: String,
        package2: String,

        #[arg(long)]
        hash1: Option<String>,

        #[arg(long)]
        hash2: Option<String>,
    },

    /// List buckets visible to the resolved credentials.
    Buckets,

    /// Start the HTTP tool server on `[server].bind`.
    Serve,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let cfg = config::load_config(&cli.config, false)?;
    let resolver = Arc::new(Resolver::new(Arc::new(cfg)));

    if let Commands::Serve = cli.command {
        return server::run_server(resolver).await;
    }

    let ctx = RequestContext {
        bearer_token: cli.token.clone(),
        registry_override: cli.registry.clone(),
        aws_profile: cli.profile.clone(),
        ..RequestContext::default()
    };

    if let Commands::Whoami = cli.command {
        return match resolver.resolve(&ctx) {
            Ok(backend) => {
                let session = backend.session();
                if cli.json {
                    print_json(&serde_json::json!({
                        "backend": backend.kind(),
                        "modality": session.modality,
                        "endpoint": session.endpoint,
                        "subject": session.subject,
                        "expires_at": session.expires_at,
                    }))
                } else {
                    println!("backend:  {}", backend.kind());
                    println!("modality: {}", session.modality.as_str());
                    println!("endpoint: {}", session.endpoint);
                    if let Some(ref sub) = session.subject {
                        println!("subject:  {}", sub);
                    }
                    if let Some(exp) = session.expires_at {
                        println!("expires:  {}", exp.to_rfc3339());
                    }
                    Ok(())
                }
            }
            Err(err) => {
                if cli.json {
                    print_json(&err.to_json())?;
                }
                Err(err.into())
            }
        };
    }

    let backend = resolver.resolve(&ctx)?;

    match cli.command {
        Commands::Packages { query } => {
            let packages = match query {
                Some(q) => backend.search_packages(&q, None).await?,
                None => backend.list_all_packages(None).await?,
            };
            if cli.json {
                return print_json(&packages);
            }
            if packages.is_empty() {
                println!("No packages.");
            }
            for p in &packages {
                let short = &p.hash[..p.hash.len().min(12)];
                println!(
                    "{}  {}  {} entries  {} bytes  {}",
                    p.name,
                    short,
                    p.entry_count,
                    p.size,
                    p.message.as_deref().unwrap_or("")
                );
            }
        }
        Commands::Search {
            query,
            scope,
            bucket,
            package,
            limit,
        } => {
            let scope = SearchScope::from_parts(&scope, bucket.as_deref(), package.as_deref())?;
            let request = SearchRequest::new(query, scope, limit);
            let outcome =
                ops::search(&backend, request, &resolver.config().search, None).await?;
            if cli.json {
                return print_json(&outcome);
            }
            if outcome.hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in outcome.hits.iter().enumerate() {
                println!(
                    "{}. [{:.2}] {:?} {} ({})",
                    i + 1,
                    hit.score(),
                    hit.kind(),
                    hit.title(),
                    hit.backend()
                );
                if let Some(uri) = hit.canonical_uri() {
                    println!("    {}", uri);
                }
                if let Some(desc) = hit.description() {
                    println!("    {}", desc);
                }
            }
            for f in &outcome.failures {
                eprintln!("warning: {} unavailable: {}", f.backend, f.reason);
            }
        }
        Commands::Browse { package, path } => {
            let entries = backend.browse_content(&package, None, &path).await?;
            if cli.json {
                return print_json(&entries);
            }
            for e in &entries {
                println!("{:>12}  {}  → {}", e.size, e.logical_key, e.physical_key);
            }
        }
        Commands::Diff {
            package1,
            package2,
            hash1,
            hash2,
        } => {
            let request = DiffRequest {
                name1: package1,
                name2: package2,
                registry: None,
                hash1,
                hash2,
            };
            let diff = backend.diff_packages(&request).await?;
            if cli.json {
                return print_json(&diff);
            }
            if diff.is_empty() {
                println!("No differences.");
            }
            for k in &diff.added {
                println!("+ {}", k);
            }
            for k in &diff.deleted {
                println!("- {}", k);
            }
            for k in &diff.modified {
                println!("~ {}", k);
            }
        }
        Commands::Buckets => {
            let buckets = backend.list_buckets().await?;
            if cli.json {
                return print_json(&buckets);
            }
            for b in &buckets {
                println!("{}  {}  {:?}", b.name, b.region, b.access);
            }
        }
        Commands::Whoami | Commands::Serve => {}
    }

    Ok(())
}
