use std::{path::Path, sync::Arc};

use anyhow::{bail, Context};
use catus::{
    config::Config,
    filter::{compile_filter_tree, compiled_query_to_string, FilterTree},
    lock::FileLock,
    session::Session,
    stacks::{CreateOptions, StackStore, StackUpdate},
    storage::BackendLocal,
};
use clap::Parser;
use cli::{Command, StackCommand};
use inquire::error::InquireResult;
use tracing_subscriber::EnvFilter;

mod cli;

fn init_logging() {
    let filter = EnvFilter::try_from_env("CATUS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints warnings and errors to stderr, pointing at the offending span.
fn report(tree: &FilterTree) {
    for warning in &tree.parse_warnings {
        eprintln!("warning: {warning}");
    }
    for err in &tree.parse_errors {
        eprintln!("error: {}", err.message);
        eprintln!("  {}", tree.original_query);
        eprintln!("  {}{}", " ".repeat(err.position), "^".repeat(err.length.max(1)));
    }
}

fn mutates(command: &Command) -> bool {
    matches!(
        command,
        Command::Stack(
            StackCommand::Add { .. }
                | StackCommand::Update { .. }
                | StackCommand::Rename { .. }
                | StackCommand::Delete { .. }
                | StackCommand::Shortcut { .. }
                | StackCommand::Run { .. }
        )
    )
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = cli::Args::parse();

    let config = Config::load()?;

    // held until exit so the load-modify-save cycle is not interleaved
    let _lock = if mutates(&args.command) {
        Some(
            FileLock::acquire(Path::new(config.base_path()))
                .context("failed to lock the stack file")?,
        )
    } else {
        None
    };

    let storage = BackendLocal::new(config.base_path())
        .with_context(|| format!("failed to open {}", config.base_path()))?;
    let stacks = Arc::new(StackStore::open(Arc::new(storage), &config)?);
    let session = Session::new(config, stacks.clone());

    match args.command {
        Command::Parse { query } => {
            let tree = session.parse(&query);
            print_json(&tree)?;
        }

        Command::Compile {
            query,
            limit,
            offset,
        } => {
            let tree = session.parse(&query);
            report(&tree);
            if tree.has_errors() {
                bail!("query has {} parse error(s)", tree.parse_errors.len());
            }

            let mut options = session.compile_options();
            if let Some(limit) = limit {
                options.limit = limit;
            }
            if let Some(offset) = offset {
                options.offset = offset;
            }
            print_json(&compile_filter_tree(&tree, &options))?;
        }

        Command::Canonical { query } => {
            let (tree, compiled) = session.compile(&query);
            report(&tree);
            println!("{}", compiled_query_to_string(&compiled));
        }

        Command::Stack(command) => match command {
            StackCommand::List => {
                for stack in stacks.list() {
                    let shortcut = stack
                        .keyboard_shortcut
                        .map(|n| format!("[{n}] "))
                        .unwrap_or_default();
                    println!("{shortcut}@{}\t{}", stack.name, stack.query);
                }
            }

            StackCommand::Show { name } => {
                let Some(stack) = stacks.get(&name) else {
                    bail!("stack not found: @{name}");
                };
                print_json(&serde_json::json!({ "stack": stack, "tree": stack.tree }))?;
            }

            StackCommand::Add {
                name,
                query,
                description,
                shortcut,
            } => {
                let tree = session.parse(&query);
                report(&tree);
                let options = CreateOptions {
                    description,
                    result_count: None,
                    keyboard_shortcut: shortcut,
                };
                print_json(&stacks.create(&name, &query, options)?)?;
            }

            StackCommand::Update {
                name,
                query,
                description,
            } => {
                if let Some(query) = &query {
                    report(&session.parse(query));
                }
                let update = StackUpdate {
                    query,
                    description,
                    result_count: None,
                };
                print_json(&stacks.update(&name, update)?)?;
            }

            StackCommand::Rename { from, to } => {
                print_json(&stacks.rename(&from, &to)?)?;
            }

            StackCommand::Delete { name, yes } => {
                if stacks.get(&name).is_none() {
                    bail!("stack not found: @{name}");
                }
                if !yes {
                    match inquire::prompt_confirmation(format!("Delete stack @{name}? (y/n)")) {
                        InquireResult::Ok(true) => {}
                        InquireResult::Ok(false) => return Ok(()),
                        InquireResult::Err(err) => bail!("{err}"),
                    }
                }
                stacks.delete(&name)?;
                println!("deleted @{name}");
            }

            StackCommand::Shortcut { name, shortcut } => {
                print_json(&stacks.assign_shortcut(&name, shortcut)?)?;
            }

            StackCommand::Run { shortcut } => {
                let Some((stack, compiled)) = session.run_shortcut(shortcut)? else {
                    bail!("no stack is bound to shortcut {shortcut}");
                };
                report(&stack.tree);
                print_json(&compiled)?;
            }
        },
    }

    Ok(())
}
