mod scenarios;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use cellflow_engine::{ExecutionContext, OperatorDecision, RunStatus, ScriptedOperator, WorkpieceTable, run};
use cellflow_sim::SimBackend;
use cellflow_types::{ActiveStepUpdate, MachineConfig, MaterialEvent, StepStatus};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::scenarios::SCENARIOS;

/// Run machine flows against a simulated automation cell.
#[derive(Debug, Parser)]
#[command(name = "cellflow", version, about)]
struct Cli {
    /// Machine configuration (YAML or JSON). The built-in demo cell is used when omitted.
    #[arg(long, global = true, value_name = "PATH")]
    machine: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// List the built-in scenarios.
    List,
    /// Print the JSON schema of the machine configuration.
    Schema,
    /// Print the effective machine configuration as YAML.
    Machine,
    /// Run a scenario to completion, logging every step transition.
    Run {
        scenario: String,

        /// Answer given to every operator escalation.
        #[arg(long, value_enum, default_value_t = EscalationAnswer::Abort)]
        on_escalation: EscalationAnswer,

        /// Inject a sensor reading, e.g. `--mock probe=12.5`. Repeatable.
        #[arg(long = "mock", value_name = "SENSOR=VALUE", value_parser = parse_mock)]
        mocks: Vec<(String, f64)>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EscalationAnswer {
    Retry,
    Continue,
    Abort,
}

impl From<EscalationAnswer> for OperatorDecision {
    fn from(answer: EscalationAnswer) -> Self {
        match answer {
            EscalationAnswer::Retry => OperatorDecision::Retry,
            EscalationAnswer::Continue => OperatorDecision::Continue,
            EscalationAnswer::Abort => OperatorDecision::Abort,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        CliCommand::List => {
            for scenario in SCENARIOS {
                println!("{:<16} {}", scenario.name, scenario.summary);
            }
            Ok(())
        }
        CliCommand::Schema => {
            let schema = schemars::schema_for!(MachineConfig);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
        CliCommand::Machine => {
            let machine = load_machine(cli.machine.as_ref())?;
            print!("{}", serde_yaml::to_string(&machine)?);
            Ok(())
        }
        CliCommand::Run {
            scenario,
            on_escalation,
            mocks,
        } => {
            let machine = load_machine(cli.machine.as_ref())?;
            run_scenario(machine, &scenario, on_escalation, &mocks).await
        }
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn load_machine(path: Option<&PathBuf>) -> Result<MachineConfig> {
    match path {
        Some(path) => MachineConfig::load(path).with_context(|| format!("loading machine configuration {}", path.display())),
        None => scenarios::demo_machine(),
    }
}

fn parse_mock(raw: &str) -> Result<(String, f64), String> {
    let (sensor, value) = raw.split_once('=').ok_or_else(|| format!("expected SENSOR=VALUE, got '{raw}'"))?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|error| format!("invalid reading for '{sensor}': {error}"))?;
    Ok((sensor.trim().to_string(), value))
}

async fn run_scenario(machine: MachineConfig, name: &str, on_escalation: EscalationAnswer, mocks: &[(String, f64)]) -> Result<()> {
    let scenario = scenarios::find(name).with_context(|| format!("unknown scenario '{name}' (try `cellflow list`)"))?;
    let backend = SimBackend::new(machine);
    scenario.prepare(&backend)?;

    let operator = Arc::new(ScriptedOperator::always(on_escalation.into()));
    let mut builder = backend.context().operator(operator);
    for (sensor, reading) in mocks {
        builder = builder.mock_reading(sensor, *reading);
    }
    let ctx = builder.build();
    cancel_on_ctrl_c(&ctx);

    let mut trace = ctx.subscribe();
    let mut material: Vec<_> = backend.workpiece_tables().map(|table| table.subscribe()).collect();

    let flow = scenario.flow();
    let outcome = {
        let running = run(&flow, &ctx);
        tokio::pin!(running);
        loop {
            tokio::select! {
                outcome = &mut running => break outcome,
                update = trace.recv() => match update {
                    Ok(update) => {
                        drain_material(&mut material);
                        log_update(&update);
                    }
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "trace subscriber lagged"),
                    Err(RecvError::Closed) => {}
                },
            }
        }
    };
    while let Ok(update) = trace.try_recv() {
        drain_material(&mut material);
        log_update(&update);
    }
    drain_material(&mut material);

    backend.stop_all();
    for (key, value) in ctx.variables().snapshot() {
        debug!(%key, %value, "variable");
    }

    match outcome {
        Ok(value) => {
            info!(scenario = name, result = %value, "scenario completed");
            Ok(())
        }
        Err(failure) if failure.status() == RunStatus::Cancelled => {
            warn!(scenario = name, "scenario cancelled");
            Err(anyhow::Error::new(failure).context("run interrupted"))
        }
        Err(failure) => {
            bail!("scenario '{name}' failed: {failure}")
        }
    }
}

fn cancel_on_ctrl_c(ctx: &ExecutionContext) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            ctx.cancel();
        }
    });
}

fn log_update(update: &ActiveStepUpdate) {
    let device = update.target_device.as_str();
    match update.status {
        StepStatus::Ready => debug!(step = %update.name, device, "ready"),
        StepStatus::Running => info!(step = %update.name, device, "running"),
        StepStatus::Completed => info!(step = %update.name, device, "completed"),
        StepStatus::Error => warn!(step = %update.name, device, "error"),
    }
}

fn drain_material(receivers: &mut [broadcast::Receiver<MaterialEvent>]) {
    for receiver in receivers {
        loop {
            match receiver.try_recv() {
                Ok(event) => info!(
                    table = %event.table,
                    station = %event.station,
                    kind = ?event.kind,
                    id = %event.material.id,
                    class = %event.material.class,
                    "material"
                ),
                Err(TryRecvError::Lagged(skipped)) => warn!(skipped, "material subscriber lagged"),
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }
}
