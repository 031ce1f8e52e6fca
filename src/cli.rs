//! CLI interface for flowrun

use crate::config::Settings;
use crate::daemon::{check_daemon_running, stop_daemon, Daemon};
use crate::executor::FlowExecutor;
use crate::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use crate::observer::ConsoleObserver;
use crate::parser::parse_project_file;
use crate::server::resolve_bind_address;
use crate::toolbox::Toolbox;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// flowrun - Task-flow runner with a toolbox of named programs
#[derive(Parser, Debug)]
#[command(name = "flowrun")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run named flows of programs from a project file", long_about = None)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "warn", global = true)]
    pub log_level: String,

    /// Log format
    #[arg(long, value_enum, default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    /// Settings file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run flows from a project, in the order given
    Run {
        /// Names of the flows to run
        flows: Vec<String>,

        /// Project file, or a directory containing flowrun.yml
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },

    /// Load a project and list its flows
    Validate {
        /// Project file, or a directory containing flowrun.yml
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },

    /// Toolbox management commands
    Tool {
        #[command(subcommand)]
        command: ToolCommands,
    },

    /// Daemon management commands
    Server {
        #[command(subcommand)]
        command: ServerCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ToolCommands {
    /// Find programs on PATH and register them under their own names
    Add {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Register a program at an explicit path
    Set { name: String, path: String },

    /// Unregister tools
    Remove {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// List registered tools
    List,
}

#[derive(Subcommand, Debug)]
pub enum ServerCommands {
    /// Run the scheduling daemon in the foreground
    Run {
        /// Listen address (overrides settings)
        #[arg(long)]
        bind: Option<String>,

        /// Path to PID file (overrides settings)
        #[arg(long)]
        pid_file: Option<PathBuf>,
    },

    /// Stop a running daemon
    Stop {
        #[arg(long)]
        pid_file: Option<PathBuf>,
    },

    /// Check daemon status
    Status {
        #[arg(long)]
        pid_file: Option<PathBuf>,
    },
}

impl Cli {
    /// Initialize logging based on CLI arguments
    pub fn init_logging(&self) -> anyhow::Result<()> {
        let config = LogConfig {
            level: LogLevel::from(self.log_level.as_str()),
            format: self.log_format,
        };

        init_logging(&config)
    }

    /// Execute the CLI command
    pub async fn execute(&self) -> anyhow::Result<()> {
        let settings = Settings::load(self.config.as_deref())?;

        match &self.command {
            Commands::Run { flows, project } => {
                self.run_flows(&settings, project, flows).await?;
            }
            Commands::Validate { project } => {
                self.validate_project(project)?;
            }
            Commands::Tool { command } => {
                self.handle_tool_command(&settings, command)?;
            }
            Commands::Server { command } => {
                self.handle_server_command(&settings, command).await?;
            }
        }
        Ok(())
    }

    /// Run the named flows one after another
    async fn run_flows(
        &self,
        settings: &Settings,
        project: &Path,
        flows: &[String],
    ) -> anyhow::Result<()> {
        let definition = parse_project_file(project)?;
        info!(
            "Project '{}' loaded from {:?} ({} flows)",
            definition.name,
            definition.path,
            definition.flows.len()
        );

        let executor = load_executor(settings)?;
        let mut observer = ConsoleObserver::new(definition.name.clone(), std::io::stdout());
        let mut all_passed = true;

        for name in flows {
            let flow = definition.flow(name).ok_or_else(|| {
                anyhow::anyhow!("no flow '{}' exists in project '{}'", name, definition.name)
            })?;

            if !executor.run_flow(flow, &mut observer).await? {
                all_passed = false;
            }
        }

        if all_passed {
            Ok(())
        } else {
            error!("One or more flows failed");
            std::process::exit(1);
        }
    }

    /// Load a project without running anything
    fn validate_project(&self, project: &Path) -> anyhow::Result<()> {
        let definition = parse_project_file(project)?;
        info!("Project '{}' parsed successfully", definition.name);

        println!("Project '{}' is valid", definition.name);
        println!("Flows: {}", definition.flows.len());
        for (name, flow) in &definition.flows {
            println!("  {:<24} {} steps", name, flow.steps.len());
        }

        Ok(())
    }

    fn handle_tool_command(&self, settings: &Settings, command: &ToolCommands) -> anyhow::Result<()> {
        let path = settings.toolbox_path()?;
        let mut toolbox = Toolbox::load(&path)?;

        match command {
            ToolCommands::Add { names } => {
                for name in names {
                    let tool = toolbox.add_auto(name)?;
                    println!("Registered ${} at path '{}'", tool.name, tool.path);
                }
                toolbox.save(&path)?;
            }
            ToolCommands::Set { name, path: tool_path } => {
                let tool = toolbox.add_manual(name.as_str(), tool_path.as_str());
                println!("Registered ${} at path '{}'", tool.name, tool.path);
                toolbox.save(&path)?;
            }
            ToolCommands::Remove { names } => {
                for name in names {
                    if toolbox.remove(name) {
                        println!("Removed ${}", name);
                    } else {
                        println!("No tool named ${}", name);
                    }
                }
                toolbox.save(&path)?;
            }
            ToolCommands::List => {
                if toolbox.is_empty() {
                    println!("No tools registered");
                    return Ok(());
                }
                for tool in toolbox.iter() {
                    println!("${:<20} {}", tool.name, tool.path);
                }
            }
        }

        Ok(())
    }

    async fn handle_server_command(
        &self,
        settings: &Settings,
        command: &ServerCommands,
    ) -> anyhow::Result<()> {
        match command {
            ServerCommands::Run { bind, pid_file } => {
                let bind = resolve_bind_address(bind.as_deref().unwrap_or(&settings.bind))?;
                let pid_file = pid_file.clone().unwrap_or_else(|| settings.pid_file.clone());
                let executor = Arc::new(load_executor(settings)?);

                let daemon = Daemon::new(executor, bind, pid_file.clone())?;

                println!("Starting flowrun daemon on {} (PID file: {:?})", bind, pid_file);
                println!("Press Ctrl+C to stop");

                daemon.run().await?;

                println!("Daemon stopped");
            }

            ServerCommands::Stop { pid_file } => {
                let pid_file = pid_file.as_deref().unwrap_or(&settings.pid_file);
                info!("Stopping daemon (PID file: {:?})", pid_file);

                match check_daemon_running(pid_file)? {
                    Some(pid) => {
                        println!("Stopping daemon (PID: {})", pid);
                        stop_daemon(pid_file).await?;
                        println!("Daemon stopped");
                    }
                    None => println!("Daemon is not running"),
                }
            }

            ServerCommands::Status { pid_file } => {
                let pid_file = pid_file.as_deref().unwrap_or(&settings.pid_file);

                match check_daemon_running(pid_file)? {
                    Some(pid) => println!("Daemon is running (PID: {})", pid),
                    None => println!("Daemon is not running"),
                }
            }
        }

        Ok(())
    }
}

/// Executor over the configured toolbox
fn load_executor(settings: &Settings) -> anyhow::Result<FlowExecutor> {
    let toolbox = Toolbox::load(settings.toolbox_path()?)?;
    Ok(FlowExecutor::new(Arc::new(toolbox)).with_step_timeout(settings.step_timeout()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_run_command() {
        let cli = Cli::parse_from(["flowrun", "run", "build", "test", "-p", "/srv/app"]);
        match cli.command {
            Commands::Run { flows, project } => {
                assert_eq!(flows, vec!["build", "test"]);
                assert_eq!(project, PathBuf::from("/srv/app"));
            }
            other => panic!("Expected run command, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_run_default_project() {
        let cli = Cli::parse_from(["flowrun", "run", "build"]);
        assert!(matches!(
            cli.command,
            Commands::Run { ref project, .. } if project == Path::new(".")
        ));
    }

    #[test]
    fn test_cli_validate() {
        let cli = Cli::parse_from(["flowrun", "validate", "--project", "flowrun.yml"]);
        assert!(matches!(cli.command, Commands::Validate { .. }));
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::parse_from([
            "flowrun",
            "validate",
            "--log-level",
            "debug",
            "--log-format",
            "json",
            "--config",
            "/etc/flowrun.toml",
        ]);
        assert_eq!(cli.log_level, "debug");
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/flowrun.toml")));
    }

    #[test]
    fn test_cli_tool_commands() {
        let cli = Cli::parse_from(["flowrun", "tool", "add", "cargo", "git"]);
        assert!(matches!(
            cli.command,
            Commands::Tool {
                command: ToolCommands::Add { ref names }
            } if names.len() == 2
        ));

        let cli = Cli::parse_from(["flowrun", "tool", "set", "py", "/usr/bin/python3"]);
        assert!(matches!(
            cli.command,
            Commands::Tool {
                command: ToolCommands::Set { .. }
            }
        ));

        let cli = Cli::parse_from(["flowrun", "tool", "list"]);
        assert!(matches!(
            cli.command,
            Commands::Tool {
                command: ToolCommands::List
            }
        ));
    }

    #[test]
    fn test_cli_tool_add_requires_names() {
        assert!(Cli::try_parse_from(["flowrun", "tool", "add"]).is_err());
        assert!(Cli::try_parse_from(["flowrun", "tool", "remove"]).is_err());
    }

    #[test]
    fn test_cli_server_run() {
        let cli = Cli::parse_from([
            "flowrun",
            "server",
            "run",
            "--bind",
            "0.0.0.0:9000",
            "--pid-file",
            "/run/flowrun.pid",
        ]);
        match cli.command {
            Commands::Server {
                command: ServerCommands::Run { bind, pid_file },
            } => {
                assert_eq!(bind.as_deref(), Some("0.0.0.0:9000"));
                assert_eq!(pid_file, Some(PathBuf::from("/run/flowrun.pid")));
            }
            other => panic!("Expected server run command, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_server_status() {
        let cli = Cli::parse_from(["flowrun", "server", "status"]);
        assert!(matches!(
            cli.command,
            Commands::Server {
                command: ServerCommands::Status { pid_file: None }
            }
        ));
    }
}
