use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use log::{error, info};
use simple_error::SimpleError;
use spinesync::coordinator::Coordinator;
use spinesync::error::{Result, RunAborted, SpineSyncError};
use spinesync::params::RunParams;
use spinesync::reference::{ReferenceCompartment, ReferenceKinaseNetwork, DRIVE_PARAM};
use spinesync::spine::{RunContext, SpineUnit, Synapse};
use spinesync::stimulus::{StimulusScheduler, StimulusTarget, StimulusTrain};
use spinesync::storage::{self, RunLog};
use spinesync::types::SynapseKind;

const MS_PER_S: f64 = 1e3;
const PARENT_SECTION: &str = "dend";

/// Couples the electrical and biochemical spine models and stores the
/// resulting trajectories in a new timestamped directory.
#[derive(Parser)]
#[command(name = "spine_integration")]
struct Cli {
    /// Simulated time after equilibration [s].
    t_stop: f64,

    /// Fixed electrical timestep [ms].
    #[arg(long = "dtNeuron")]
    dt_neuron: Option<f64>,

    /// Interval at which calcium is handed to the biochemical model [s].
    #[arg(long = "calciumSampling")]
    calcium_sampling: Option<f64>,

    /// Time to let the system settle before stimulation [s].
    #[arg(long = "tEquilibrium", default_value_t = 0.0)]
    t_equilibrium: f64,

    /// YAML file with run parameters; flags take precedence.
    #[arg(long)]
    params: Option<PathBuf>,

    /// Directory in which the results directory is created.
    #[arg(long, default_value = ".")]
    output: PathBuf,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(err) = run(&cli) {
        error!("{}", err);
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let params = load_params(cli)?;

    if !(cli.t_stop > 0.0) {
        return Err(config_error("t_stop must be strictly positive"));
    }

    if !(cli.t_equilibrium >= 0.0) {
        return Err(config_error("tEquilibrium must not be negative"));
    }

    let (mut ctx, stimuli) = build_context(cli.t_equilibrium)?;

    let mut scheduler = StimulusScheduler::new(params.clock_params.dt_fine)?;
    for train in &stimuli {
        scheduler.schedule_train(train)?;
    }

    let run_log = RunLog {
        t_stop: cli.t_equilibrium + cli.t_stop,
        calcium_sampling: params.clock_params.dt_coarse / MS_PER_S,
        dt_neuron: params.clock_params.dt_fine,
        t_equilibrium: cli.t_equilibrium,
        stimuli: scheduler.events().cloned().collect(),
    };

    for stimulus in &run_log.stimuli {
        info!("{}", stimulus.to_log().trim_end());
    }

    let mut coordinator = Coordinator::initialize(&ctx, &params, scheduler)?;
    let t_stop_ms = (cli.t_equilibrium + cli.t_stop) * MS_PER_S;

    match coordinator.run(&mut ctx, t_stop_ms) {
        Ok(records) => {
            info!("simulation ended, saving results");
            let dir = storage::save_results(&cli.output, &records, &run_log)?;
            write_params(&dir, &params)
        }
        Err(aborted) => Err(save_partial_results(&cli.output, aborted, &run_log, &params)),
    }
}

/// Keeps what an aborted run recorded. The run's own error is what comes
/// back, even when saving fails too.
fn save_partial_results(
    output: &Path,
    aborted: RunAborted,
    run_log: &RunLog,
    params: &RunParams,
) -> SpineSyncError {
    let saved = storage::save_results(output, &aborted.records, run_log)
        .and_then(|dir| write_params(&dir, params));

    if let Err(err) = saved {
        error!("could not save partial results: {}", err);
    }

    aborted.error
}

fn load_params(cli: &Cli) -> Result<RunParams> {
    let mut params = match &cli.params {
        Some(path) => {
            let yaml = fs::read_to_string(path).map_err(|err| {
                config_error(&format!("could not read {}: {}", path.display(), err))
            })?;
            serde_yaml::from_str(&yaml).map_err(|err| {
                config_error(&format!("could not parse {}: {}", path.display(), err))
            })?
        }
        None => RunParams::default(),
    };

    if let Some(dt_neuron) = cli.dt_neuron {
        params.clock_params.dt_fine = dt_neuron;
    }

    if let Some(calcium_sampling) = cli.calcium_sampling {
        params.clock_params.dt_coarse = calcium_sampling * MS_PER_S;
    }

    Ok(params)
}

fn build_context(t_equilibrium: f64) -> Result<(RunContext, Vec<StimulusTrain>)> {
    let mut compartment = ReferenceCompartment::new(&[PARENT_SECTION]);
    let mut spines = Vec::new();
    let mut trains = Vec::new();

    for (i, (position, onset)) in [(0.3, 1.0), (0.7, 1.5)].into_iter().enumerate() {
        let id = format!("spine{}", i);
        let head = format!("{}_head", id);

        compartment.add_section(&head);
        for kind in [SynapseKind::Ampa, SynapseKind::Nmda] {
            compartment
                .add_channel(&head, kind.channel_name(), 1.0)
                .map_err(SpineSyncError::Configuration)?;
        }

        let mut spine = SpineUnit::new(
            &id,
            position,
            PARENT_SECTION,
            &head,
            Box::new(ReferenceKinaseNetwork::new()),
        );
        for kind in [SynapseKind::Ampa, SynapseKind::Nmda] {
            spine
                .add_synapse(Synapse::new(kind.channel_name(), kind, &head, 1.0))
                .map_err(SpineSyncError::Configuration)?;
        }
        spines.push(spine);

        trains.push(StimulusTrain {
            onset: (onset + t_equilibrium) * MS_PER_S,
            count: 10,
            interval: 0.1,
            pulse_duration: 0.05,
            target: StimulusTarget::electrical(&head, SynapseKind::Ampa.channel_name(), DRIVE_PARAM),
            amplitude: 1.0,
            baseline: 0.0,
        });
    }

    let mut ctx = RunContext::new(Box::new(compartment));
    for spine in spines {
        ctx.add_spine(spine).map_err(SpineSyncError::Configuration)?;
    }

    Ok((ctx, trains))
}

fn write_params(dir: &Path, params: &RunParams) -> Result<()> {
    let json = serde_json::to_string_pretty(params)
        .map_err(|err| SpineSyncError::Storage(err.to_string()))?;
    fs::write(dir.join("params.json"), json)?;
    Ok(())
}

fn config_error(msg: &str) -> SpineSyncError {
    SpineSyncError::Configuration(SimpleError::new(msg))
}
