//! nfsnap - netfilter table snapshots from the command line
//!
//! Reads the live iptables / ip6tables rule set through libiptc: chains with
//! their policies, decoded rules, counters, and counter resets.
//!
//! # Usage
//!
//! ```bash
//! nfsnap chains                    # Chains of the filter table
//! nfsnap rules INPUT               # Decoded rules of one chain
//! nfsnap -6 counters               # Counters of every IPv6 filter chain
//! nfsnap -t mangle --json rules    # Whole mangle table as JSON
//! nfsnap zero INPUT FORWARD        # Zero two chains and commit
//! nfsnap config --write            # Write the current defaults to disk
//! ```

use clap::{Parser, Subcommand};
use nfsnap::audit::{self, AuditLog};
use nfsnap::config::{self, Config, OutputFormat};
use nfsnap::core::libiptc::{Ip4tc, Ip6tc};
use nfsnap::core::snapshot::TableCounters;
use nfsnap::{CounterSnapshot, Engine, Error, Family, Policy, Rule, TableSession};
use serde::Serialize;
use std::process::ExitCode;
use tracing::{Level, warn};

#[derive(Parser)]
#[command(name = "nfsnap")]
#[command(about = "Inspect iptables chains, rules and counters", long_about = None)]
struct Cli {
    /// Use the IPv6 tables
    #[arg(short = '6', long = "ipv6", global = true)]
    ipv6: bool,
    /// Table to open (default: from config, usually `filter`)
    #[arg(short, long, global = true)]
    table: Option<String>,
    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the table's chains and their policies
    Chains,
    /// Show decoded rules of one chain, or of all chains
    Rules { chain: Option<String> },
    /// Show policy and rule counters without decoding rules
    Counters { chain: Option<String> },
    /// Zero the counters of the given chains (all chains if none given)
    Zero { chains: Vec<String> },
    /// Show the effective configuration
    Config {
        /// Save it to the config file
        #[arg(long)]
        write: bool,
    },
}

/// What the binary needs from the command line and the config file.
struct Options {
    table: String,
    format: OutputFormat,
    audit: bool,
}

#[derive(Serialize)]
struct ChainInfo {
    name: String,
    builtin: bool,
    policy: Option<Policy>,
}

#[derive(Serialize)]
struct ChainRules {
    chain: String,
    policy: Option<Policy>,
    rules: Vec<Rule>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = config::load_config();
    init_logging(cli.verbose, &config.log_level);

    if let Commands::Config { write } = cli.command {
        return match show_config(&config, write) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => report(&e),
        };
    }

    let family = if cli.ipv6 { Family::Ipv6 } else { config.family };
    let options = Options {
        table: cli.table.clone().unwrap_or_else(|| config.table.clone()),
        format: if cli.json {
            OutputFormat::Json
        } else {
            config.format
        },
        audit: config.audit,
    };

    if !nix::unistd::getuid().is_root() {
        eprintln!("Note: Not running as root. The kernel may refuse access to the tables.");
    }

    let result = match family {
        Family::Ipv4 => run(Ip4tc, &cli.command, &options),
        Family::Ipv6 => run(Ip6tc, &cli.command, &options),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}

fn init_logging(verbose: bool, configured: &str) {
    let level = if verbose {
        Level::DEBUG
    } else {
        configured.parse().unwrap_or(Level::WARN)
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();
}

fn report(error: &Error) -> ExitCode {
    eprintln!("Error: {error}");
    let translation = error.translate();
    eprintln!("{}", translation.user_message);
    for suggestion in &translation.suggestions {
        eprintln!("  - {suggestion}");
    }
    if let Some(url) = &translation.help_url {
        eprintln!("See {url}");
    }
    ExitCode::FAILURE
}

fn show_config(config: &Config, write: bool) -> nfsnap::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    if write {
        nfsnap::utils::ensure_dirs()?;
        config::save_config(config)?;
        if let Some(path) = config::config_path() {
            println!("Saved to {}", path.display());
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> nfsnap::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run<E: Engine>(engine: E, command: &Commands, options: &Options) -> nfsnap::Result<()> {
    match command {
        Commands::Chains => {
            let mut session = TableSession::open(engine, &options.table)?;
            let chains = list_chains(&mut session)?;
            session.close()?;

            if options.format == OutputFormat::Json {
                return print_json(&chains);
            }
            for chain in &chains {
                match &chain.policy {
                    Some(policy) => println!(
                        "{} (policy {}, {})",
                        chain.name, policy.verdict, policy.counter
                    ),
                    None => println!("{} (user-defined)", chain.name),
                }
            }
        }
        Commands::Rules { chain } => {
            let mut session = TableSession::open(engine, &options.table)?;
            let names = match chain {
                Some(name) => vec![name.clone()],
                None => session.chains().collect(),
            };
            let mut listing = Vec::with_capacity(names.len());
            for name in names {
                let policy = if session.is_builtin(&name) {
                    Some(session.policy(&name)?)
                } else {
                    None
                };
                let rules = session.rules(&name).collect();
                listing.push(ChainRules {
                    chain: name,
                    policy,
                    rules,
                });
            }
            session.close()?;

            if options.format == OutputFormat::Json {
                return print_json(&listing);
            }
            for chain in &listing {
                match &chain.policy {
                    Some(policy) => println!(
                        "Chain {} (policy {}, {})",
                        chain.chain, policy.verdict, policy.counter
                    ),
                    None => println!("Chain {}", chain.chain),
                }
                for rule in &chain.rules {
                    println!("  {rule}");
                }
            }
        }
        Commands::Counters { chain } => {
            let mut snapshot = CounterSnapshot::open(engine, &options.table)?;
            let mut counters = snapshot.capture()?;
            snapshot.close()?;
            if let Some(name) = chain {
                counters.chains.retain(|c| &c.name == name);
            }

            if options.format == OutputFormat::Json {
                return print_json(&counters);
            }
            print_counters(&counters);
        }
        Commands::Zero { chains } => zero(engine, chains, options)?,
        Commands::Config { .. } => unreachable!("handled before opening a table"),
    }
    Ok(())
}

fn list_chains<E: Engine>(session: &mut TableSession<E>) -> nfsnap::Result<Vec<ChainInfo>> {
    let names: Vec<String> = session.chains().collect();
    let mut chains = Vec::with_capacity(names.len());
    for name in names {
        let builtin = session.is_builtin(&name);
        let policy = if builtin {
            Some(session.policy(&name)?)
        } else {
            None
        };
        chains.push(ChainInfo {
            name,
            builtin,
            policy,
        });
    }
    Ok(chains)
}

fn print_counters(counters: &TableCounters) {
    println!("{} ({})", counters.table, counters.family);
    for chain in &counters.chains {
        match chain.policy {
            Some(policy) => println!("{} policy: {}", chain.name, policy),
            None => println!("{}", chain.name),
        }
        for (i, counter) in chain.rules.iter().enumerate() {
            println!("  rule {}: {}", i + 1, counter);
        }
        if !chain.rules.is_empty() {
            println!("  total: {}", chain.total());
        }
    }
}

fn zero<E: Engine>(engine: E, chains: &[String], options: &Options) -> nfsnap::Result<()> {
    let log = if options.audit {
        nfsnap::utils::ensure_dirs()
            .and_then(|()| AuditLog::new())
            .map_err(|e| warn!("Audit log unavailable: {}", e))
            .ok()
    } else {
        None
    };
    let mut snapshot = CounterSnapshot::open(engine, &options.table)?;
    let names: Vec<String> = if chains.is_empty() {
        snapshot.chains().collect()
    } else {
        chains.to_vec()
    };
    audit::zero_chains(&mut snapshot, &names, log.as_ref())?;

    if options.format == OutputFormat::Json {
        return print_json(&names);
    }
    for name in &names {
        println!("Zeroed counters of {name}");
    }
    Ok(())
}
