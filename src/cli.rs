use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "askwerk", version, about = "Ask questions across multiple repositories")]
pub struct Cli {
    /// Config root; defaults to ASKWERK_CONFIG_DIR or the platform config dir
    #[arg(long, global = true, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Ask a question; name repositories with @mentions or --repo
    Ask {
        /// The question, free-form; @repo mentions are extracted
        #[arg(required = true, trailing_var_arg = true)]
        question: Vec<String>,
        /// Repository to include, in addition to @mentions (repeatable)
        #[arg(short, long = "repo", value_name = "NAME")]
        repos: Vec<String>,
        /// Demote clone/fetch progress to debug logging
        #[arg(long)]
        quiet: bool,
    },
    /// Manage registered repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },
    /// Inspect and remove materialised workspaces
    Workspace {
        #[command(subcommand)]
        command: WorkspaceCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum RepoCommands {
    /// Register a repository
    Add {
        /// Lowercase identifier used in @mentions
        name: String,
        /// Git-clonable origin URL
        url: String,
        /// Remote branch to track
        #[arg(long, default_value = "main")]
        branch: String,
        /// Free-text orientation notes passed to the agent
        #[arg(long)]
        notes: Option<String>,
        /// Restrict the agent to a subdirectory of the checkout
        #[arg(long, value_name = "SUBDIR")]
        subpath: Option<String>,
    },
    /// List registered repositories
    List,
    /// Remove a repository definition (the cached clone stays)
    Remove { name: String },
}

#[derive(Debug, Subcommand)]
pub enum WorkspaceCommands {
    /// List workspace keys on disk
    List,
    /// Remove a workspace by key, or all of them
    Clear {
        key: Option<String>,
        #[arg(long, conflicts_with = "key")]
        all: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ask_with_mentions_and_flags() {
        let cli = Cli::parse_from([
            "askwerk", "ask", "--repo", "daytona", "--quiet", "@svelte", "how", "do", "stores",
            "work?",
        ]);
        match cli.command {
            Commands::Ask {
                question,
                repos,
                quiet,
            } => {
                assert_eq!(question.join(" "), "@svelte how do stores work?");
                assert_eq!(repos, vec!["daytona"]);
                assert!(quiet);
            }
            other => panic!("expected ask, got {other:?}"),
        }
    }

    #[test]
    fn parses_repo_add_with_defaults() {
        let cli = Cli::parse_from([
            "askwerk",
            "repo",
            "add",
            "svelte",
            "https://github.com/sveltejs/svelte",
        ]);
        match cli.command {
            Commands::Repo {
                command:
                    RepoCommands::Add {
                        name, url, branch, ..
                    },
            } => {
                assert_eq!(name, "svelte");
                assert_eq!(url, "https://github.com/sveltejs/svelte");
                assert_eq!(branch, "main");
            }
            other => panic!("expected repo add, got {other:?}"),
        }
    }

    #[test]
    fn workspace_clear_all_conflicts_with_key() {
        assert!(Cli::try_parse_from(["askwerk", "workspace", "clear", "a+b", "--all"]).is_err());
        assert!(Cli::try_parse_from(["askwerk", "workspace", "clear", "--all"]).is_ok());
    }
}
