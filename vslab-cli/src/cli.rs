//! CLI argument parsing using clap derive API
//!
//! This module defines the command-line interface structure using clap's derive macros.
//! It is purely declarative with no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use vslab_core::types::{ImageKind, OwnerId, ProjectId};

/// vslab -- per-user sandbox provisioning.
///
/// Use `vslab <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "vslab", version, about, long_about = None)]
pub struct Cli {
    /// Path to the vslab.toml configuration file.
    #[arg(short, long, global = true, default_value = "/etc/vslab/vslab.toml")]
    pub config: PathBuf,

    /// Control socket path (overrides `control.socket_path` from the config).
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    /// Seconds to wait for a daemon response.
    #[arg(long, global = true, default_value_t = 180)]
    pub timeout_secs: u64,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table / text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage sandbox projects through the daemon.
    Project(ProjectArgs),

    /// Show whether the daemon is running and how healthy it is.
    Status(StatusArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- project ----

/// Project lifecycle commands.
#[derive(Args, Debug)]
pub struct ProjectArgs {
    #[command(subcommand)]
    pub action: ProjectAction,
}

#[derive(Subcommand, Debug)]
pub enum ProjectAction {
    /// Reserve a new project (no container yet).
    Reserve {
        /// Owner (user) ID.
        #[arg(long, value_parser = parse_owner)]
        owner: OwnerId,
        /// Display name.
        name: String,
        /// Image kind (python2, python3, cpp, java).
        #[arg(long, value_parser = parse_image_kind)]
        image: ImageKind,
    },
    /// Start the project's container.
    Start(TargetArgs),
    /// Stop the project's container, keeping the record.
    Stop(TargetArgs),
    /// Stop the container and delete the record.
    Destroy(TargetArgs),
    /// Show one project.
    Get(TargetArgs),
    /// Record user activity so the project is not reclaimed.
    Touch(TargetArgs),
    /// List projects.
    List {
        /// Only list projects of this owner.
        #[arg(long, value_parser = parse_owner)]
        owner: Option<OwnerId>,
    },
}

/// A request aimed at one project.
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Project ID.
    pub id: ProjectId,
    /// Require the project to belong to this owner.
    #[arg(long, value_parser = parse_owner)]
    pub owner: Option<OwnerId>,
}

// ---- status ----

/// Display daemon liveness and host health.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Show per-host details.
    #[arg(short, long)]
    pub verbose: bool,
}

// ---- config ----

/// Manage vslab configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only one section (general, hosts, ports, discovery, keeper, store, control, metrics).
        #[arg(long)]
        section: Option<String>,
    },
}

fn parse_owner(s: &str) -> Result<OwnerId, String> {
    s.trim()
        .parse::<u64>()
        .map(OwnerId::new)
        .map_err(|e| format!("invalid owner id '{s}': {e}"))
}

fn parse_image_kind(s: &str) -> Result<ImageKind, String> {
    ImageKind::from_str_loose(s).ok_or_else(|| {
        format!("unknown image kind '{s}' (expected: python2, python3, cpp, java)")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_verify_structure() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_reserve() {
        let cli = Cli::try_parse_from([
            "vslab", "project", "reserve", "--owner", "7", "demo", "--image", "c++",
        ])
        .expect("should parse reserve");
        match cli.command {
            Commands::Project(args) => match args.action {
                ProjectAction::Reserve { owner, name, image } => {
                    assert_eq!(owner, OwnerId::new(7));
                    assert_eq!(name, "demo");
                    assert_eq!(image, ImageKind::Cpp);
                }
                other => panic!("expected Reserve, got {other:?}"),
            },
            _ => panic!("expected Project command"),
        }
    }

    #[test]
    fn test_cli_parse_reserve_rejects_unknown_image() {
        let result = Cli::try_parse_from([
            "vslab", "project", "reserve", "--owner", "1", "demo", "--image", "rust",
        ]);
        assert!(result.is_err(), "unknown image kind should be rejected");
    }

    #[test]
    fn test_cli_parse_start_with_owner() {
        let cli = Cli::try_parse_from(["vslab", "project", "start", "12", "--owner", "3"])
            .expect("should parse start");
        match cli.command {
            Commands::Project(args) => match args.action {
                ProjectAction::Start(target) => {
                    assert_eq!(target.id, ProjectId::new(12));
                    assert_eq!(target.owner, Some(OwnerId::new(3)));
                }
                other => panic!("expected Start, got {other:?}"),
            },
            _ => panic!("expected Project command"),
        }
    }

    #[test]
    fn test_cli_parse_list_without_owner() {
        let cli = Cli::try_parse_from(["vslab", "project", "list"]).expect("should parse list");
        match cli.command {
            Commands::Project(args) => {
                assert!(matches!(args.action, ProjectAction::List { owner: None }));
            }
            _ => panic!("expected Project command"),
        }
    }

    #[test]
    fn test_cli_parse_invalid_project_id() {
        let result = Cli::try_parse_from(["vslab", "project", "stop", "abc"]);
        assert!(result.is_err(), "non-numeric project id should be rejected");
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "vslab",
            "status",
            "--output",
            "json",
            "--socket",
            "/tmp/v.sock",
        ])
        .expect("global flags should be accepted after the subcommand");
        assert!(matches!(cli.output, OutputFormat::Json));
        assert_eq!(cli.socket, Some(PathBuf::from("/tmp/v.sock")));
        assert_eq!(cli.timeout_secs, 180);
    }

    #[test]
    fn test_cli_parse_config_show_section() {
        let cli = Cli::try_parse_from(["vslab", "config", "show", "--section", "keeper"])
            .expect("should parse config show");
        match cli.command {
            Commands::Config(args) => match args.action {
                ConfigAction::Show { section } => assert_eq!(section.as_deref(), Some("keeper")),
                ConfigAction::Validate => panic!("expected Show action"),
            },
            _ => panic!("expected Config command"),
        }
    }

    #[test]
    fn test_cli_default_config_path() {
        let cli = Cli::try_parse_from(["vslab", "config", "validate"]).expect("should parse");
        assert_eq!(cli.config, PathBuf::from("/etc/vslab/vslab.toml"));
    }
}
