#![forbid(unsafe_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use panel_lab::bridge::TestCaseBridge;
use panel_lab::cli::{Cli, Command, DoctorArgs, PanelKind, RunArgs, SandboxArgs, ScenarioArgs};
use panel_lab::sandbox::bus::BusConfig;
use panel_lab::sandbox::display::DisplayConfig;
use panel_lab::sandbox::{Sandbox, SandboxConfig};
use panel_lab::scenario::{bluetooth, launch_panel, power, run_menu};

fn main() -> ExitCode {
    // Diagnostics go to stderr so stdout stays the reporting channel.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .try_init();

    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Scenario(args) => cmd_scenario(&cli.sandbox, args),
        Command::Run(args) => cmd_run(&cli.sandbox, &args),
        Command::Doctor(args) => cmd_doctor(&cli.sandbox, &args),
    }
}

fn sandbox_config(args: &SandboxArgs) -> SandboxConfig {
    SandboxConfig {
        display: DisplayConfig {
            program: args.display_server.clone(),
            ceiling: args.display_ceiling,
            ..DisplayConfig::default()
        },
        bus: BusConfig {
            program: args.bus_daemon.clone(),
            ..BusConfig::default()
        },
        orchestrator: Default::default(),
    }
}

fn cmd_scenario(sandbox_args: &SandboxArgs, args: ScenarioArgs) -> Result<ExitCode> {
    let mut sandbox =
        Sandbox::start(sandbox_config(sandbox_args)).context("failed to start sandbox")?;

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();
    match args.panel {
        PanelKind::Bluetooth => {
            bluetooth::start_services(sandbox.orchestrator_mut())?;
            let mut scenario = bluetooth::BluetoothScenario::new(sandbox.orchestrator_mut())?;
            run_menu(&mut scenario, &mut input, &mut output)?;
        }
        PanelKind::Power => {
            power::start_services(sandbox.orchestrator_mut())?;
            let (orch, topology) = sandbox.split_mut();
            let mut scenario = power::PowerScenario::new(orch, topology);
            run_menu(&mut scenario, &mut input, &mut output)?;
        }
    }

    let code = if args.no_panel {
        ExitCode::SUCCESS
    } else {
        let argv = if args.panel_command.is_empty() {
            default_panel_command(args.panel)
        } else {
            args.panel_command.clone()
        };
        let status = launch_panel(sandbox.env(), &argv)?;
        if status.success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    };
    sandbox.teardown();
    Ok(code)
}

/// Panel invocation used when the operator gives no explicit command.
fn default_panel_command(panel: PanelKind) -> Vec<String> {
    let panel_name = match panel {
        PanelKind::Bluetooth => "bluetooth",
        PanelKind::Power => "power",
    };
    vec!["gnome-control-center".to_string(), panel_name.to_string()]
}

fn cmd_run(sandbox_args: &SandboxArgs, args: &RunArgs) -> Result<ExitCode> {
    let mut sandbox =
        Sandbox::start(sandbox_config(sandbox_args)).context("failed to start sandbox")?;

    let bridge = TestCaseBridge::new(
        sandbox.env().clone(),
        Duration::from_secs(args.timeout_secs),
    );
    let report = bridge.run_all(&args.executable);

    if args.json {
        println!("{}", report.to_canonical_json()?);
    } else {
        print!("{}", report.render_human());
    }
    sandbox.teardown();

    Ok(if report.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_doctor(sandbox_args: &SandboxArgs, args: &DoctorArgs) -> Result<ExitCode> {
    let checks = [
        ("display server", sandbox_args.display_server.as_str()),
        ("bus daemon", sandbox_args.bus_daemon.as_str()),
    ];
    let findings: Vec<(String, String, Option<PathBuf>)> = checks
        .iter()
        .map(|(role, program)| {
            (
                (*role).to_string(),
                (*program).to_string(),
                resolve_program(program),
            )
        })
        .collect();

    if args.json {
        let report: Vec<serde_json::Value> = findings
            .iter()
            .map(|(role, program, path)| {
                serde_json::json!({
                    "role": role,
                    "program": program,
                    "found": path.as_deref().map(Path::display).map(|p| p.to_string()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (role, program, path) in &findings {
            match path {
                Some(path) => println!("ok       {role}: {} ({})", program, path.display()),
                None => println!("MISSING  {role}: {program}"),
            }
        }
    }

    let all_found = findings.iter().all(|(_, _, path)| path.is_some());
    Ok(if all_found {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Resolve a program the way `Command::new` will: explicit paths are taken
/// as-is, bare names are searched on PATH.
fn resolve_program(program: &str) -> Option<PathBuf> {
    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return direct.is_file().then(|| direct.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
