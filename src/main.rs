use askwerk::cli::{Cli, Commands, RepoCommands, WorkspaceCommands};
use askwerk::config::ConfigStore;
use askwerk::domains::repos::RepoCache;
use askwerk::domains::resources::{Resource, ResourceRegistry};
use askwerk::domains::sessions::SessionOrchestrator;
use askwerk::domains::workspaces::WorkspaceEngine;
use askwerk::errors::HostError;
use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let root = cli.config_dir.unwrap_or_else(ConfigStore::default_root);
    let store = ConfigStore::new(&root);
    let config = store.load()?;

    let registry = Arc::new(ResourceRegistry::load(store)?);
    let cache = Arc::new(RepoCache::new(config.repos_dir(&root)));
    let engine = Arc::new(WorkspaceEngine::new(
        config.workspaces_dir(&root),
        registry.clone(),
        cache,
    ));

    match cli.command {
        Commands::Ask {
            question,
            repos,
            quiet,
        } => {
            let orchestrator = SessionOrchestrator::new(engine, config.agent.clone());
            let stream = orchestrator.ask(&repos, &question.join(" "), quiet).await?;
            let answer = stream.into_answer().await?;
            println!("{answer}");
        }
        Commands::Repo { command } => match command {
            RepoCommands::Add {
                name,
                url,
                branch,
                notes,
                subpath,
            } => {
                let resource = registry.add(Resource {
                    name,
                    origin: url,
                    branch,
                    notes,
                    subpath,
                })?;
                println!("Added '{}' tracking {}@{}", resource.name, resource.origin, resource.branch);
            }
            RepoCommands::List => {
                for resource in registry.list() {
                    let notes = resource
                        .notes
                        .as_deref()
                        .map(|n| format!("  # {n}"))
                        .unwrap_or_default();
                    println!(
                        "{}\t{}@{}{notes}",
                        resource.relative_path(),
                        resource.origin,
                        resource.branch
                    );
                }
            }
            RepoCommands::Remove { name } => {
                registry.remove(&name)?;
                println!("Removed '{name}'");
            }
        },
        Commands::Workspace { command } => match command {
            WorkspaceCommands::List => {
                for key in engine.list_workspaces()? {
                    println!("{key}");
                }
            }
            WorkspaceCommands::Clear { key, all } => {
                if all {
                    engine.clear_all().await?;
                    println!("Cleared all workspaces");
                } else if let Some(key) = key {
                    engine.clear(&key).await?;
                    println!("Cleared '{key}'");
                } else {
                    return Err(HostError::config("workspace clear needs a key or --all").into());
                }
            }
        },
    }

    Ok(())
}
