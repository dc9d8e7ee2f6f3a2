use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// panel-lab: isolated hardware/service sandbox for settings-panel testing.
///
/// Gives each run a private display and private message buses, simulates
/// the system services panels talk to, and drives panel test binaries
/// case-by-case.
#[derive(Debug, Parser)]
#[command(
    name = "panel-lab",
    version,
    about,
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub sandbox: SandboxArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Host-program overrides shared by every subcommand.
#[derive(Debug, Parser)]
pub struct SandboxArgs {
    /// Display server binary.
    #[arg(long, default_value = "Xvfb")]
    pub display_server: String,

    /// Highest display number to try when hunting for a free one.
    #[arg(long, default_value_t = 99)]
    pub display_ceiling: u32,

    /// Message bus daemon binary.
    #[arg(long, default_value = "dbus-daemon")]
    pub bus_daemon: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactive scenario menu against a live sandbox.
    Scenario(ScenarioArgs),

    /// Run a compiled panel test binary case-by-case in a sandbox.
    Run(RunArgs),

    /// Diagnose host prerequisites.
    Doctor(DoctorArgs),
}

/// Panels with a scenario tester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PanelKind {
    Bluetooth,
    Power,
}

// -- scenario --

#[derive(Debug, Parser)]
pub struct ScenarioArgs {
    /// Which panel scenario to drive.
    #[arg(value_enum)]
    pub panel: PanelKind,

    /// Skip launching the panel after the menu exits.
    #[arg(long)]
    pub no_panel: bool,

    /// Panel command launched when leaving the menu; defaults to the
    /// settings application opened on the chosen panel.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub panel_command: Vec<String>,
}

// -- run --

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Compiled panel test executable.
    pub executable: PathBuf,

    /// Per-case timeout in seconds.
    #[arg(long, default_value_t = 300)]
    pub timeout_secs: u64,

    /// Emit the machine-readable report instead of the human one.
    #[arg(long)]
    pub json: bool,
}

// -- doctor --

#[derive(Debug, Parser)]
pub struct DoctorArgs {
    /// Emit machine-readable findings.
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn scenario_collects_panel_command_verbatim() {
        let cli = Cli::try_parse_from([
            "panel-lab",
            "scenario",
            "bluetooth",
            "gnome-control-center",
            "--verbose",
            "bluetooth",
        ])
        .unwrap();
        let Command::Scenario(args) = cli.command else {
            panic!("expected scenario");
        };
        assert_eq!(args.panel, PanelKind::Bluetooth);
        assert_eq!(
            args.panel_command,
            vec!["gnome-control-center", "--verbose", "bluetooth"]
        );
    }

    #[test]
    fn scenario_no_panel_flag_parses_before_positionals() {
        let cli =
            Cli::try_parse_from(["panel-lab", "scenario", "--no-panel", "power"]).unwrap();
        let Command::Scenario(args) = cli.command else {
            panic!("expected scenario");
        };
        assert!(args.no_panel);
        assert_eq!(args.panel, PanelKind::Power);
        assert!(args.panel_command.is_empty());
    }

    #[test]
    fn run_defaults_timeout() {
        let cli = Cli::try_parse_from(["panel-lab", "run", "./panel-tests"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.timeout_secs, 300);
        assert!(!args.json);
    }

    #[test]
    fn sandbox_overrides_are_global() {
        let cli = Cli::try_parse_from([
            "panel-lab",
            "--display-server",
            "Xephyr",
            "--display-ceiling",
            "42",
            "doctor",
        ])
        .unwrap();
        assert_eq!(cli.sandbox.display_server, "Xephyr");
        assert_eq!(cli.sandbox.display_ceiling, 42);
    }
}
