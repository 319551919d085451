//! formtree inspection tool
//!
//! Usage:
//!   formtree addresses tree.json --node job/1
//!   formtree affected document.json --section input --config formtree.toml
//!   formtree check tree.json
//!
//! `check` exits with status 1 when the tree has structural defects.

use anyhow::Result;
use clap::{Parser, Subcommand};
use formtree_cli::{address_report, affected_report, check_report, load_document, load_tree};
use formtree_edit::EditorConfig;
use formtree_types::{NodePath, SectionKey};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "formtree")]
#[command(about = "Inspect formtree content trees and node documents")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the canonical address of every field
    Addresses {
        /// Content tree JSON file
        tree: PathBuf,

        /// Node path used as the address prefix
        #[arg(short, long, default_value = "node")]
        node: String,
    },

    /// List the sections an edit would leave stale
    Affected {
        /// Node document JSON file
        document: PathBuf,

        /// Section being edited
        #[arg(short, long)]
        section: String,

        /// Editor config providing the section pipeline
        #[arg(short, long, default_value = "formtree.toml")]
        config: PathBuf,
    },

    /// Report structural defects; exit status 1 if any
    Check {
        /// Content tree JSON file
        tree: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match args.command {
        Command::Addresses { tree, node } => {
            let node = NodePath::new(node)?;
            let report = address_report(&load_tree(&tree)?, &node);
            if args.json {
                print_json(&report)?;
            } else {
                for address in &report.addresses {
                    println!("{address}");
                }
                for defect in &report.defects {
                    warn!("{defect}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Affected {
            document,
            section,
            config,
        } => {
            let config = EditorConfig::load_from(&config);
            let section = SectionKey::new(section)?;
            let report = affected_report(&load_document(&document)?, &section, &config)?;
            if args.json {
                print_json(&report)?;
            } else if report.affected.is_empty() {
                info!(section = %report.section, "no downstream section affected");
            } else {
                for affected in &report.affected {
                    println!("{affected}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Check { tree } => {
            let defects = check_report(&load_tree(&tree)?);
            if args.json {
                print_json(&defects)?;
            } else {
                for defect in &defects {
                    println!("{defect}");
                }
            }
            if defects.is_empty() {
                info!(tree = %tree.display(), "no defects");
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(1))
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
