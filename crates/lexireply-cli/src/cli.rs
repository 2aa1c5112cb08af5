use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use lexireply::auto_reply::{CooldownScope, MatchMode};

#[derive(Parser)]
#[command(name = "lexireply")]
#[command(author, version, about = "Keyword lexicon auto-reply administration", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the lexicon JSON file (default: platform data directory)
    #[arg(long, global = true, env = "LEXIREPLY_LEXICON")]
    pub lexicon: Option<PathBuf>,

    /// Path to the engine config file (default: platform config directory)
    #[arg(long, global = true, env = "LEXIREPLY_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a message through the engine and print the reply
    Check {
        /// Message text
        message: String,

        /// Sender ID
        #[arg(long, default_value = "cli-user")]
        user: String,

        /// Group ID (direct message when omitted)
        #[arg(long)]
        group: Option<String>,

        /// Sender display name
        #[arg(long)]
        name: Option<String>,

        /// Seed for template choice and random tokens
        #[arg(long)]
        seed: Option<u64>,

        /// Print the reply as JSON
        #[arg(long)]
        json: bool,
    },

    /// List rules
    List {
        /// Only rules with a keyword containing this text
        #[arg(long)]
        keyword: Option<String>,

        /// Only enabled rules
        #[arg(long, conflicts_with = "disabled")]
        enabled: bool,

        /// Only disabled rules
        #[arg(long)]
        disabled: bool,

        /// Print rules as JSON
        #[arg(long)]
        json: bool,
    },

    /// Add a rule
    Add {
        /// Keyword (repeatable)
        #[arg(short, long = "keyword", required = true)]
        keywords: Vec<String>,

        /// Response in inline syntax, e.g. "[at] hi {name}" (first is primary)
        #[arg(required = true)]
        responses: Vec<String>,

        /// Rule ID (default: next free ID)
        #[arg(long)]
        id: Option<u64>,

        /// Match mode (default from config)
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Cooldown in seconds (default from config)
        #[arg(long)]
        cooldown: Option<u64>,

        /// Cooldown scope (default from config)
        #[arg(long, value_enum)]
        scope: Option<ScopeArg>,

        /// Cool down until the next local midnight instead of a fixed time
        #[arg(long, conflicts_with = "cooldown")]
        until_midnight: bool,

        /// Only admins can trigger the rule
        #[arg(long)]
        admin_only: bool,

        /// Add the rule disabled
        #[arg(long)]
        disabled: bool,
    },

    /// Remove a rule
    Remove {
        /// Rule ID
        id: u64,
    },

    /// Enable a rule
    Enable {
        /// Rule ID
        id: u64,
    },

    /// Disable a rule
    Disable {
        /// Rule ID
        id: u64,
    },

    /// Append an alternate response to a rule
    AddResponse {
        /// Rule ID
        id: u64,

        /// Response in inline syntax
        response: String,
    },

    /// Remove a response by index (0 is the primary response)
    RemoveResponse {
        /// Rule ID
        id: u64,

        /// Response index
        index: usize,
    },

    /// Import a legacy {"work": [...]} lexicon
    ImportLegacy {
        /// Legacy lexicon file
        file: PathBuf,

        /// Replace the current lexicon instead of appending
        #[arg(long)]
        replace: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Exact,
    Contains,
    Prefix,
    Pattern,
}

impl From<ModeArg> for MatchMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Exact => Self::Exact,
            ModeArg::Contains => Self::Contains,
            ModeArg::Prefix => Self::Prefix,
            ModeArg::Pattern => Self::Pattern,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ScopeArg {
    Global,
    PerGroup,
    PerUser,
}

impl From<ScopeArg> for CooldownScope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::Global => Self::Global,
            ScopeArg::PerGroup => Self::PerGroup,
            ScopeArg::PerUser => Self::PerUser,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_add() {
        let cli = Cli::try_parse_from([
            "lexireply",
            "add",
            "-k",
            "hello",
            "--keyword",
            "hi",
            "--mode",
            "exact",
            "--scope",
            "per-group",
            "hi {name}",
            "hey",
        ])
        .unwrap();
        match cli.command {
            Commands::Add {
                keywords,
                responses,
                mode,
                scope,
                ..
            } => {
                assert_eq!(keywords, vec!["hello", "hi"]);
                assert_eq!(responses, vec!["hi {name}", "hey"]);
                assert!(matches!(mode, Some(ModeArg::Exact)));
                assert!(matches!(scope, Some(ScopeArg::PerGroup)));
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn test_list_flags_conflict() {
        assert!(Cli::try_parse_from(["lexireply", "list", "--enabled", "--disabled"]).is_err());
    }
}
