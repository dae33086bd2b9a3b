// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! rulestore CLI
//!
//! Inspect and edit a policy rule table from the shell.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rulestore::{
    load_policy_text, Filter, MemoryModel, PolicyModel, RuleRecord, RuleStore, Section,
};
use rulestore_config::{ConfigService, FsConfigStore, StoreSettings};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect and edit a policy rule table")]
struct Args {
    /// Connection descriptor (e.g. sqlite://rules.db). Overrides config and RULESTORE_URL.
    #[arg(long, global = true)]
    url: Option<String>,
    /// Rule table name. Overrides config and RULESTORE_TABLE.
    #[arg(long, global = true)]
    table: Option<String>,
    /// Read settings from this directory instead of the user config dir.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print stored rules as policy lines.
    List {
        /// Comma-separated filter for `p` rules, starting at the first field.
        #[arg(long = "p", value_delimiter = ',')]
        policy: Option<Vec<String>>,
        /// Comma-separated filter for `g` rules, starting at the first field.
        #[arg(long = "g", value_delimiter = ',')]
        grouping: Option<Vec<String>>,
    },
    /// Store one rule.
    Add {
        /// Rule type (p, p2, g, ...).
        ptype: String,
        /// Rule fields.
        fields: Vec<String>,
    },
    /// Delete one rule.
    Remove {
        /// Rule type (p, p2, g, ...).
        ptype: String,
        /// Rule fields.
        fields: Vec<String>,
    },
    /// Delete every rule matching a field filter. Empty values match anything.
    RemoveFiltered {
        /// Rule type (p, p2, g, ...).
        ptype: String,
        /// First field the values apply to.
        #[arg(long, default_value_t = 0)]
        start: usize,
        /// Field values.
        values: Vec<String>,
    },
    /// Replace one stored rule with another.
    Update {
        /// Rule type (p, p2, g, ...).
        ptype: String,
        /// Comma-separated fields of the stored rule.
        #[arg(long, value_delimiter = ',', required = true)]
        old: Vec<String>,
        /// Comma-separated fields of the replacement.
        #[arg(long, value_delimiter = ',', required = true)]
        new: Vec<String>,
    },
    /// Replace the whole table with the rules of a policy file.
    Import {
        /// Policy file, one `ptype, field, ...` line per rule.
        file: PathBuf,
    },
    /// Print the number of stored rules.
    Count,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .with_writer(io::stderr)
        .init();

    let settings = resolve_settings(&args)?;
    debug!(url = %settings.url, table = %settings.table_name, "opening store");
    let mut store = RuleStore::open(&settings.url, settings.to_options())
        .with_context(|| format!("open rule store at {}", settings.url))?;

    let mut out = io::stdout().lock();
    run(args.cmd, &mut store, &mut out)?;
    store.close()?;
    Ok(())
}

/// Config file, then environment, then flags.
fn resolve_settings(args: &Args) -> Result<StoreSettings> {
    let fs_store = match &args.config_dir {
        Some(dir) => Some(FsConfigStore::at(dir)?),
        None => FsConfigStore::new()
            .inspect_err(|err| warn!(%err, "config dir unavailable, using defaults"))
            .ok(),
    };
    let mut settings = match fs_store {
        Some(fs_store) => StoreSettings::load(&ConfigService::new(fs_store))
            .context("load rulestore settings")?,
        None => StoreSettings::default(),
    }
    .with_env_overrides();
    if let Some(url) = &args.url {
        settings.url.clone_from(url);
    }
    if let Some(table) = &args.table {
        settings.table_name.clone_from(table);
    }
    Ok(settings)
}

fn run(cmd: Command, store: &mut RuleStore, out: &mut impl Write) -> Result<()> {
    match cmd {
        Command::List { policy, grouping } => {
            let mut model = MemoryModel::new();
            if policy.is_none() && grouping.is_none() {
                store.load_policy(&mut model)?;
            } else {
                let filter = Filter {
                    p: policy,
                    g: grouping,
                };
                store.load_filtered_policy(&mut model, filter)?;
            }
            for sec in Section::ALL {
                for (ptype, rules) in model.rule_sets(sec) {
                    for rule in rules {
                        writeln!(out, "{}", RuleRecord::from_rule(ptype, rule)?)?;
                    }
                }
            }
        }
        Command::Add { ptype, fields } => {
            let sec = Section::of(&ptype)?;
            if store.add_policy(sec, &ptype, &fields)? {
                writeln!(out, "added")?;
            } else {
                writeln!(out, "already present")?;
            }
        }
        Command::Remove { ptype, fields } => {
            let sec = Section::of(&ptype)?;
            if store.remove_policy(sec, &ptype, &fields)? {
                writeln!(out, "removed")?;
            } else {
                writeln!(out, "not found")?;
            }
        }
        Command::RemoveFiltered {
            ptype,
            start,
            values,
        } => {
            let sec = Section::of(&ptype)?;
            let removed = store.remove_filtered_policy(sec, &ptype, start, &values)?;
            writeln!(out, "removed {removed}")?;
        }
        Command::Update { ptype, old, new } => {
            let sec = Section::of(&ptype)?;
            store.update_policy(sec, &ptype, &old, &new)?;
            writeln!(out, "updated")?;
        }
        Command::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("read policy file {}", file.display()))?;
            let mut model = MemoryModel::new();
            let lines = load_policy_text(&text, &mut model)
                .with_context(|| format!("parse policy file {}", file.display()))?;
            store.save_policy(&model)?;
            writeln!(out, "imported {} rules from {lines} lines", model.len())?;
        }
        Command::Count => {
            writeln!(out, "{}", store.count()?)?;
        }
    }
    Ok(())
}
