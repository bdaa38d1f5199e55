use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use core_affinity::CoreId;
use log::{debug, error, info};
use simple_error::{try_with, SimpleError, SimpleResult};

use crate::clock::SimulationClock;
use crate::error::{Result, RunAborted, SpineSyncError};
use crate::params::{self, RunParams};
use crate::plasticity::PlasticityUpdater;
use crate::recorder::{Owner, StorageRecords, TrajectoryRecorder};
use crate::spine::{RunContext, SpineUnit, WEIGHT_PARAM};
use crate::stimulus::StimulusScheduler;
use crate::types::HashMap;
use crate::util::get_partition_range;

const DT_TOLERANCE: f64 = 1e-12;

/// Cooperative stop flag, checked by `run` before every fine step.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct SectionProbe {
    section: String,
    variable: String,
    owner: Owner,
}

#[derive(Debug, Clone)]
struct SpineProbe {
    owner: Owner,
    head_section: String,
}

/// Names resolved against the engines once, before the loop starts.
#[derive(Debug, Clone)]
struct Registry {
    section_probes: Vec<SectionProbe>,
    spine_probes: Vec<SpineProbe>,
    calcium_variables: Vec<String>,
    tracked_species: Vec<String>,
}

#[derive(Debug, Clone)]
struct BiochemicalStep {
    calcium_species: String,
    kinase_species: String,
    duration: f64,
}

pub struct Coordinator {
    clock: SimulationClock,
    scheduler: StimulusScheduler,
    updater: PlasticityUpdater,
    recorder: TrajectoryRecorder,
    registry: Registry,
    biochemical_step: BiochemicalStep,
    electrical_interval_ticks: usize,
    progress_interval: f64,
    next_progress_t: f64,
    num_threads: usize,
    pin_threads: bool,
    coupling_count: usize,
    started: bool,
    cancellation: CancellationToken,
}

impl Coordinator {
    pub fn initialize(
        ctx: &RunContext,
        params: &RunParams,
        mut scheduler: StimulusScheduler,
    ) -> Result<Self> {
        try_with_config(params::validate_run_params(params), "invalid run parameters")?;

        let clock =
            SimulationClock::from_params(&params.clock_params).map_err(SpineSyncError::Configuration)?;

        if (scheduler.dt_fine() - clock.dt_fine()).abs() > DT_TOLERANCE * clock.dt_fine() {
            return Err(SpineSyncError::Configuration(SimpleError::new(format!(
                "scheduler dt_fine ({}) differs from clock dt_fine ({})",
                scheduler.dt_fine(),
                clock.dt_fine()
            ))));
        }

        let registry =
            resolve_registry(ctx, params, &scheduler).map_err(SpineSyncError::Configuration)?;
        scheduler.set_biochemical_time_scale(params.coupling_params.biochemical_time_scale);

        let num_threads = params
            .technical_params
            .get_num_threads()
            .min(ctx.spines.len())
            .max(1);

        info!(
            "initialized coordinator: {} spines, {} fine ticks per coupling, {} threads",
            ctx.spines.len(),
            clock.ticks_per_coupling(),
            num_threads
        );

        Ok(Self {
            clock,
            scheduler,
            updater: PlasticityUpdater::new(&params.plasticity_params),
            recorder: TrajectoryRecorder::new(),
            registry,
            biochemical_step: BiochemicalStep {
                calcium_species: params.coupling_params.calcium_species.clone(),
                kinase_species: params.coupling_params.kinase_species.clone(),
                duration: params.clock_params.dt_coarse
                    * params.coupling_params.biochemical_time_scale,
            },
            electrical_interval_ticks: params.recording_params.electrical_interval_ticks,
            progress_interval: params.recording_params.progress_interval,
            next_progress_t: params.recording_params.progress_interval,
            num_threads,
            pin_threads: params.technical_params.pin_threads,
            coupling_count: 0,
            started: false,
            cancellation: CancellationToken::new(),
        })
    }

    pub fn tick(&self) -> usize {
        self.clock.tick()
    }

    pub fn t(&self) -> f64 {
        self.clock.t()
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn scheduler(&self) -> &StimulusScheduler {
        &self.scheduler
    }

    pub fn coupling_count(&self) -> usize {
        self.coupling_count
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn records(&self) -> StorageRecords {
        self.recorder.finalize()
    }

    /// Issues one fine step. The first call also samples and couples the
    /// initial state at tick 0.
    pub fn advance_one_fine_step(&mut self, ctx: &mut RunContext) -> Result<()> {
        self.ensure_started(ctx)?;

        let tick = self.clock.tick();
        let engine_error = |source: SimpleError| SpineSyncError::Engine {
            last_completed_tick: tick,
            source,
        };

        self.scheduler
            .revert_expired(tick, ctx)
            .map_err(engine_error)?;
        self.scheduler.apply_due(tick, ctx).map_err(engine_error)?;
        ctx.electrical
            .advance(self.clock.dt_fine())
            .map_err(engine_error)?;

        self.clock.advance();

        if self.clock.tick() % self.electrical_interval_ticks == 0 {
            self.record_electrical(ctx)?;
        }

        if self.clock.is_coupling_tick() {
            self.couple(ctx)?;
        }

        if self.clock.t() >= self.next_progress_t {
            debug!("{}", self.progress_message(ctx));
            self.next_progress_t += self.progress_interval;
        }

        Ok(())
    }

    /// Electrical time next to the first spine's biochemical time, which runs
    /// in the engine's own unit.
    fn progress_message(&self, ctx: &RunContext) -> String {
        let biochemical_t = ctx
            .spines
            .first()
            .map_or(0.0, |spine| spine.biochemical().current_time());

        format!(
            "t = {:.3} ms, biochemical t = {:.6}, {} couplings, {} stimuli applied",
            self.clock.t(),
            biochemical_t,
            self.coupling_count,
            self.scheduler.application_count()
        )
    }

    /// Steps until the clock reaches `t_stop`. On failure or cancellation the
    /// samples recorded so far come back inside the error.
    pub fn run(
        &mut self,
        ctx: &mut RunContext,
        t_stop: f64,
    ) -> std::result::Result<StorageRecords, RunAborted> {
        let stop_tick = self.clock.tick_at_or_after(t_stop);

        info!(
            "running from t = {} ms to t = {} ms ({} fine ticks)",
            self.clock.t(),
            self.clock.time_at(stop_tick),
            stop_tick.saturating_sub(self.clock.tick())
        );

        if let Err(error) = self.ensure_started(ctx) {
            return Err(self.abort(error));
        }

        while self.clock.tick() < stop_tick {
            if self.cancellation.is_cancelled() {
                let error = SpineSyncError::Cancelled {
                    last_completed_tick: self.clock.tick(),
                };
                return Err(self.abort(error));
            }

            if let Err(error) = self.advance_one_fine_step(ctx) {
                return Err(self.abort(error));
            }
        }

        info!(
            "run finished at t = {} ms after {} couplings",
            self.clock.t(),
            self.coupling_count
        );

        Ok(self.recorder.finalize())
    }

    fn abort(&self, error: SpineSyncError) -> RunAborted {
        let records = self.recorder.finalize();
        error!("run aborted: {}", error);
        RunAborted { error, records }
    }

    fn ensure_started(&mut self, ctx: &mut RunContext) -> Result<()> {
        if self.started {
            return Ok(());
        }

        self.started = true;
        self.record_electrical(ctx)?;
        self.couple(ctx)
    }

    fn record_electrical(&mut self, ctx: &RunContext) -> Result<()> {
        let t = self.clock.t();
        let last_completed_tick = self.clock.tick();

        for probe in &self.registry.section_probes {
            let value = ctx
                .electrical
                .get_scalar(&probe.section, &probe.variable)
                .map_err(|source| SpineSyncError::Engine {
                    last_completed_tick,
                    source,
                })?;

            self.recorder
                .record_sample(&probe.variable, &probe.owner, t, value)
                .map_err(SpineSyncError::Recording)?;
        }

        Ok(())
    }

    fn couple(&mut self, ctx: &mut RunContext) -> Result<()> {
        let tick = self.clock.tick();
        let last_completed_tick = tick.saturating_sub(1);
        let engine_error = |source: SimpleError| SpineSyncError::Engine {
            last_completed_tick,
            source,
        };

        let calcium = self.read_calcium(ctx).map_err(engine_error)?;

        let readouts = if self.num_threads > 1 {
            advance_biochemical_parallel(
                &mut ctx.spines,
                &calcium,
                &self.biochemical_step,
                self.num_threads,
                self.pin_threads,
            )
        } else {
            ctx.spines
                .iter_mut()
                .zip(&calcium)
                .map(|(spine, calcium)| {
                    advance_biochemical(spine, *calcium, &self.biochemical_step)
                })
                .collect()
        };

        let t = self.clock.t();

        for (spine_idx, readout) in readouts.into_iter().enumerate() {
            let readout = readout.map_err(engine_error)?;
            let probe = &self.registry.spine_probes[spine_idx];
            let spine = &mut ctx.spines[spine_idx];

            let (_, synapses) = spine.split_mut();
            for synapse in synapses.iter_mut() {
                self.updater
                    .update(synapse, readout, t, ctx.electrical.as_mut())
                    .map_err(engine_error)?;

                let owner = Owner::Channel {
                    channel_type: synapse.channel().to_string(),
                    section: synapse.section().to_string(),
                };
                self.recorder
                    .record_sample(WEIGHT_PARAM, &owner, t, synapse.weight())
                    .map_err(SpineSyncError::Recording)?;
            }

            let biochemical = spine.biochemical();
            let t_biochemical = biochemical.current_time();
            for species in &self.registry.tracked_species {
                let value = biochemical.get_species(species).map_err(engine_error)?;
                self.recorder
                    .record_sample(species, &probe.owner, t_biochemical, value)
                    .map_err(SpineSyncError::Recording)?;
            }
        }

        self.coupling_count += 1;
        Ok(())
    }

    fn read_calcium(&self, ctx: &RunContext) -> SimpleResult<Vec<f64>> {
        self.registry
            .spine_probes
            .iter()
            .map(|probe| {
                self.registry
                    .calcium_variables
                    .iter()
                    .map(|variable| ctx.electrical.get_scalar(&probe.head_section, variable))
                    .sum::<SimpleResult<f64>>()
            })
            .collect()
    }
}

fn try_with_config<T>(result: SimpleResult<T>, context: &str) -> Result<T> {
    result.map_err(|err| SpineSyncError::Configuration(SimpleError::with(context, err)))
}

fn advance_biochemical(
    spine: &mut SpineUnit,
    calcium: f64,
    step: &BiochemicalStep,
) -> SimpleResult<f64> {
    let id = spine.id().to_string();
    let engine = spine.biochemical_mut();

    try_with!(
        engine.set_species(&step.calcium_species, calcium),
        "spine {}",
        id
    );
    try_with!(engine.advance(step.duration), "spine {}", id);

    Ok(try_with!(
        engine.get_species(&step.kinase_species),
        "spine {}",
        id
    ))
}

// Spines are split into disjoint partitions, so each biochemical engine is
// touched by exactly one thread. Results come back in spine order.
fn advance_biochemical_parallel(
    spines: &mut [SpineUnit],
    calcium: &[f64],
    step: &BiochemicalStep,
    num_threads: usize,
    pin_threads: bool,
) -> Vec<SimpleResult<f64>> {
    let num_spines = spines.len();
    let num_threads = num_threads.min(num_spines).max(1);

    thread::scope(|scope| {
        let mut rest = spines;
        let mut join_handles = Vec::with_capacity(num_threads);

        for thread_id in 0..num_threads {
            let range = get_partition_range(num_threads, thread_id, num_spines);
            let (partition, tail) = std::mem::take(&mut rest).split_at_mut(range.len());
            rest = tail;
            let calcium = &calcium[range];

            join_handles.push(scope.spawn(move || {
                if pin_threads {
                    core_affinity::set_for_current(CoreId { id: thread_id });
                }

                partition
                    .iter_mut()
                    .zip(calcium)
                    .map(|(spine, calcium)| advance_biochemical(spine, *calcium, step))
                    .collect::<Vec<_>>()
            }));
        }

        join_handles
            .into_iter()
            .flat_map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
            })
            .collect()
    })
}

fn resolve_registry(
    ctx: &RunContext,
    params: &RunParams,
    scheduler: &StimulusScheduler,
) -> std::result::Result<Registry, SimpleError> {
    let coupling_params = &params.coupling_params;
    let recording_params = &params.recording_params;

    let section_names = ctx.electrical.section_names();
    let mut section_probes = Vec::new();

    for variable in &recording_params.section_variables {
        let mut found = false;

        for section in &section_names {
            if ctx.electrical.has_scalar(section, variable) {
                found = true;
                section_probes.push(SectionProbe {
                    section: section.clone(),
                    variable: variable.clone(),
                    owner: Owner::Section(section.clone()),
                });
            }
        }

        if !found {
            return Err(SimpleError::new(format!(
                "recorded variable {} exists on no section",
                variable
            )));
        }
    }

    let mut spine_probes = Vec::with_capacity(ctx.spines.len());
    let mut channel_owners: HashMap<(&str, &str), (&str, &str)> = HashMap::default();

    for spine in &ctx.spines {
        for variable in &coupling_params.calcium_variables {
            if !ctx.electrical.has_scalar(spine.head_section(), variable) {
                return Err(SimpleError::new(format!(
                    "spine {}: no variable {} on head section {}",
                    spine.id(),
                    variable,
                    spine.head_section()
                )));
            }
        }

        let required_species = [
            &coupling_params.calcium_species,
            &coupling_params.kinase_species,
        ];

        for species in required_species
            .into_iter()
            .chain(&recording_params.tracked_species)
        {
            if !spine.biochemical().has_species(species) {
                return Err(SimpleError::new(format!(
                    "spine {}: no species {}",
                    spine.id(),
                    species
                )));
            }
        }

        for synapse in spine.synapses() {
            if !ctx
                .electrical
                .has_param(synapse.section(), synapse.channel(), WEIGHT_PARAM)
            {
                return Err(SimpleError::new(format!(
                    "spine {}: synapse {} has no {} parameter on {}.{}",
                    spine.id(),
                    synapse.id(),
                    WEIGHT_PARAM,
                    synapse.section(),
                    synapse.channel()
                )));
            }

            let key = (synapse.section(), synapse.channel());
            if let Some((other_spine, other_synapse)) =
                channel_owners.insert(key, (spine.id(), synapse.id()))
            {
                return Err(SimpleError::new(format!(
                    "spine {}: synapse {} shares channel {}.{} with synapse {} of spine {}",
                    spine.id(),
                    synapse.id(),
                    synapse.section(),
                    synapse.channel(),
                    other_synapse,
                    other_spine
                )));
            }
        }

        spine_probes.push(SpineProbe {
            owner: Owner::Spine {
                spine_id: spine.id().to_string(),
                position: spine.position(),
                parent_section: spine.parent_section().to_string(),
            },
            head_section: spine.head_section().to_string(),
        });
    }

    for event in scheduler.events() {
        if !event.target.exists_in(ctx) {
            return Err(SimpleError::new(format!(
                "stimulus target {} does not exist",
                event.target
            )));
        }
    }

    Ok(Registry {
        section_probes,
        spine_probes,
        calcium_variables: coupling_params.calcium_variables.clone(),
        tracked_species: recording_params.tracked_species.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{
        ReferenceCompartment, ReferenceKinaseNetwork, CA_IN_PROCESS, DRIVE_PARAM,
    };
    use crate::spine::Synapse;
    use crate::stimulus::{StimulusEvent, StimulusTarget, StimulusTrain};
    use crate::types::SynapseKind;
    use crate::util::test_util;
    use float_cmp::assert_approx_eq;

    fn make_ctx(num_spines: usize) -> RunContext {
        let mut compartment = ReferenceCompartment::new(&["dend"]);
        let mut spines = Vec::new();

        for i in 0..num_spines {
            let id = format!("spine{}", i);
            let head = format!("{}_head", id);
            compartment.add_section(&head);
            compartment.add_channel(&head, "ampa", 1.0).unwrap();
            compartment.add_channel(&head, "nmda", 1.0).unwrap();

            let mut spine = SpineUnit::new(
                &id,
                0.1 * i as f64,
                "dend",
                &head,
                Box::new(ReferenceKinaseNetwork::new()),
            );
            spine
                .add_synapse(Synapse::new("ampa", SynapseKind::Ampa, &head, 1.0))
                .unwrap();
            spine
                .add_synapse(Synapse::new("nmda", SynapseKind::Nmda, &head, 1.0))
                .unwrap();
            spines.push(spine);
        }

        let mut ctx = RunContext::new(Box::new(compartment));
        for spine in spines {
            ctx.add_spine(spine).unwrap();
        }
        ctx
    }

    fn make_scheduler(params: &RunParams) -> StimulusScheduler {
        StimulusScheduler::new(params.clock_params.dt_fine).unwrap()
    }

    #[test]
    fn tick_zero_couples_on_first_step() {
        let params = test_util::get_template_run_params();
        let mut ctx = make_ctx(1);
        let mut sut = Coordinator::initialize(&ctx, &params, make_scheduler(&params)).unwrap();

        assert_eq!(sut.coupling_count(), 0);

        sut.advance_one_fine_step(&mut ctx).unwrap();
        assert_eq!(sut.tick(), 1);
        assert_eq!(sut.coupling_count(), 1);

        for _ in 1..40 {
            sut.advance_one_fine_step(&mut ctx).unwrap();
        }

        assert_eq!(sut.tick(), 40);
        assert_eq!(sut.coupling_count(), 2);
        assert_approx_eq!(f64, sut.t(), 1.0);
    }

    #[test]
    fn couplings_over_run() {
        let params = test_util::get_template_run_params();
        let mut ctx = make_ctx(2);
        let mut sut = Coordinator::initialize(&ctx, &params, make_scheduler(&params)).unwrap();

        let records = sut.run(&mut ctx, 10.0).unwrap();

        assert_eq!(sut.tick(), 400);
        assert_eq!(sut.coupling_count(), 11);
        assert_eq!(records.time_base().unwrap().len(), 401);

        for spine in &ctx.spines {
            assert_eq!(spine.synapse("ampa").unwrap().weight_history().len(), 11);
            assert!(spine.synapse("nmda").unwrap().weight_history().is_empty());
            assert_eq!(
                records
                    .syn_vector("weight", "ampa", spine.head_section())
                    .unwrap()
                    .len(),
                11
            );
        }
    }

    #[test]
    fn tracked_species_sampled_on_biochemical_clock() {
        let params = test_util::get_template_run_params();
        let mut ctx = make_ctx(1);
        let mut sut = Coordinator::initialize(&ctx, &params, make_scheduler(&params)).unwrap();

        let records = sut.run(&mut ctx, 2.0).unwrap();
        let series = records.timeseries("CaMKIIbar", 0.0, "dend", "spine0").unwrap();

        assert_eq!(series.len(), 3);
        assert_approx_eq!(f64, series[0].0, 0.001);
        assert_approx_eq!(f64, series[2].0, 0.003);
        assert_approx_eq!(
            f64,
            ctx.spines[0].biochemical().current_time(),
            0.003
        );
    }

    #[test]
    fn electrical_sampling_interval() {
        let mut params = test_util::get_template_run_params();
        params.recording_params.electrical_interval_ticks = 4;
        let mut ctx = make_ctx(1);
        let mut sut = Coordinator::initialize(&ctx, &params, make_scheduler(&params)).unwrap();

        let records = sut.run(&mut ctx, 1.0).unwrap();

        assert_eq!(records.time_base().unwrap().len(), 11);
        assert_eq!(records.vector("v", Some("dend")).unwrap().len(), 11);
    }

    #[test]
    fn stimulus_raises_kinase_and_weight() {
        let params = test_util::get_template_run_params();
        let mut ctx = make_ctx(2);
        let mut scheduler = make_scheduler(&params);
        scheduler
            .schedule_train(&StimulusTrain {
                onset: 1.0,
                count: 5,
                interval: 1.0,
                pulse_duration: 0.5,
                target: StimulusTarget::electrical("spine0_head", "ampa", DRIVE_PARAM),
                amplitude: 1.0,
                baseline: 0.0,
            })
            .unwrap();

        let mut sut = Coordinator::initialize(&ctx, &params, scheduler).unwrap();
        sut.run(&mut ctx, 10.0).unwrap();

        let stimulated = ctx.spines[0].synapse("ampa").unwrap().weight();
        let quiet = ctx.spines[1].synapse("ampa").unwrap().weight();

        assert!(stimulated > quiet);
        assert_eq!(sut.scheduler().application_count(), 5);
        assert_eq!(sut.scheduler().revert_count(), 5);
        assert_approx_eq!(
            f64,
            ctx.electrical
                .get_param("spine0_head", "ampa", WEIGHT_PARAM)
                .unwrap(),
            stimulated
        );
    }

    #[test]
    fn missing_calcium_variable_rejected() {
        let mut params = test_util::get_template_run_params();
        params.coupling_params.calcium_variables = vec!["cai".to_string(), "cao".to_string()];
        let ctx = make_ctx(1);

        let result = Coordinator::initialize(&ctx, &params, make_scheduler(&params));

        assert!(matches!(result, Err(SpineSyncError::Configuration(_))));
    }

    #[test]
    fn missing_species_rejected() {
        let mut params = test_util::get_template_run_params();
        params.coupling_params.kinase_species = "PKA".to_string();
        let ctx = make_ctx(1);

        let result = Coordinator::initialize(&ctx, &params, make_scheduler(&params));

        match result {
            Err(SpineSyncError::Configuration(err)) => {
                assert_eq!(err.as_str(), "spine spine0: no species PKA")
            }
            _ => panic!("expected configuration error"),
        }
    }

    #[test]
    fn unknown_stimulus_target_rejected() {
        let params = test_util::get_template_run_params();
        let ctx = make_ctx(1);
        let mut scheduler = make_scheduler(&params);
        scheduler
            .schedule(StimulusEvent {
                onset: 1.0,
                duration: 1.0,
                target: StimulusTarget::biochemical("spine7", CA_IN_PROCESS),
                amplitude: 1.0,
                baseline: 0.0,
            })
            .unwrap();

        let result = Coordinator::initialize(&ctx, &params, scheduler);

        assert!(matches!(result, Err(SpineSyncError::Configuration(_))));
    }

    #[test]
    fn scheduler_step_mismatch_rejected() {
        let params = test_util::get_template_run_params();
        let ctx = make_ctx(1);
        let scheduler = StimulusScheduler::new(0.05).unwrap();

        let result = Coordinator::initialize(&ctx, &params, scheduler);

        assert!(matches!(result, Err(SpineSyncError::Configuration(_))));
    }

    #[test]
    fn cancellation_stops_before_next_step() {
        let params = test_util::get_template_run_params();
        let mut ctx = make_ctx(1);
        let mut sut = Coordinator::initialize(&ctx, &params, make_scheduler(&params)).unwrap();

        for _ in 0..10 {
            sut.advance_one_fine_step(&mut ctx).unwrap();
        }
        sut.cancellation_token().cancel();

        let aborted = sut.run(&mut ctx, 10.0).unwrap_err();

        assert!(matches!(
            aborted.error,
            SpineSyncError::Cancelled {
                last_completed_tick: 10
            }
        ));
        assert_eq!(aborted.last_completed_tick(), Some(10));
        assert_eq!(sut.tick(), 10);
        assert_eq!(aborted.records.time_base().unwrap().len(), 11);
    }

    #[test]
    fn biochemical_pulse_between_couplings_advances_engine() {
        let params = test_util::get_template_run_params();
        let mut ctx = make_ctx(2);
        let mut scheduler = make_scheduler(&params);
        scheduler
            .schedule_train(&StimulusTrain {
                onset: 0.3,
                count: 4,
                interval: 0.1,
                pulse_duration: 0.05,
                target: StimulusTarget::biochemical("spine0", CA_IN_PROCESS),
                amplitude: 4.0e8,
                baseline: 0.0,
            })
            .unwrap();

        let mut sut = Coordinator::initialize(&ctx, &params, scheduler).unwrap();
        sut.run(&mut ctx, 1.0).unwrap();

        let forced = ctx.spines[0].biochemical();
        let quiet = ctx.spines[1].biochemical();

        // two couplings plus four pulses of 0.05 ms, in seconds
        assert_approx_eq!(f64, forced.current_time(), 2.2e-3, epsilon = 1e-12);
        assert_approx_eq!(f64, quiet.current_time(), 2e-3, epsilon = 1e-12);
        assert!(forced.get_species("CaMKIIbar").unwrap() > quiet.get_species("CaMKIIbar").unwrap());
        assert_eq!(forced.get_input_rate(CA_IN_PROCESS).unwrap(), 0.0);
        assert_eq!(sut.scheduler().application_count(), 4);
        assert_eq!(sut.scheduler().active_count(), 0);
    }

    #[test]
    fn progress_reports_both_clocks() {
        let params = test_util::get_template_run_params();
        let mut ctx = make_ctx(1);
        let mut sut = Coordinator::initialize(&ctx, &params, make_scheduler(&params)).unwrap();
        sut.run(&mut ctx, 1.0).unwrap();

        assert_eq!(
            sut.progress_message(&ctx),
            "t = 1.000 ms, biochemical t = 0.002000, 2 couplings, 0 stimuli applied"
        );
    }

    #[test]
    fn duplicate_channel_on_one_spine_rejected() {
        let params = test_util::get_template_run_params();
        let mut ctx = make_ctx(1);
        ctx.spines[0]
            .add_synapse(Synapse::new("ampa2", SynapseKind::Ampa, "spine0_head", 1.0))
            .unwrap();

        let result = Coordinator::initialize(&ctx, &params, make_scheduler(&params));

        match result {
            Err(SpineSyncError::Configuration(err)) => assert_eq!(
                err.as_str(),
                "spine spine0: synapse ampa2 shares channel spine0_head.ampa with synapse ampa of spine spine0"
            ),
            _ => panic!("expected configuration error"),
        }
    }

    #[test]
    fn spines_sharing_a_head_rejected() {
        let params = test_util::get_template_run_params();
        let mut ctx = make_ctx(1);
        let mut twin = SpineUnit::new(
            "twin",
            0.5,
            "dend",
            "spine0_head",
            Box::new(ReferenceKinaseNetwork::new()),
        );
        twin
            .add_synapse(Synapse::new("ampa", SynapseKind::Ampa, "spine0_head", 1.0))
            .unwrap();
        ctx.add_spine(twin).unwrap();

        let result = Coordinator::initialize(&ctx, &params, make_scheduler(&params));

        match result {
            Err(SpineSyncError::Configuration(err)) => assert_eq!(
                err.as_str(),
                "spine twin: synapse ampa shares channel spine0_head.ampa with synapse ampa of spine spine0"
            ),
            _ => panic!("expected configuration error"),
        }
    }

    #[test]
    fn parallel_matches_serial() {
        let mut serial_params = test_util::get_template_run_params();
        serial_params.technical_params.num_threads = Some(1);
        let mut parallel_params = serial_params.clone();
        parallel_params.technical_params.num_threads = Some(num_cpus::get().min(3));

        let run = |params: &RunParams, amplitude: f64| {
            let mut ctx = make_ctx(5);
            let mut scheduler = make_scheduler(params);
            for i in 0..5 {
                scheduler
                    .schedule(StimulusEvent {
                        onset: 0.5 * i as f64,
                        duration: 0.25,
                        target: StimulusTarget::biochemical(&format!("spine{}", i), CA_IN_PROCESS),
                        amplitude,
                        baseline: 0.0,
                    })
                    .unwrap();
            }
            let mut sut = Coordinator::initialize(&ctx, params, scheduler).unwrap();
            let records = sut.run(&mut ctx, 5.0).unwrap();
            let kinase: Vec<f64> = ctx
                .spines
                .iter()
                .map(|spine| spine.biochemical().get_species("CaMKIIbar").unwrap())
                .collect();
            (records, kinase)
        };

        let (serial_records, serial_kinase) = run(&serial_params, 4.0e8);
        let (parallel_records, parallel_kinase) = run(&parallel_params, 4.0e8);
        let (_, unforced_kinase) = run(&serial_params, 0.0);

        assert_eq!(serial_records, parallel_records);
        assert_eq!(serial_kinase, parallel_kinase);
        for (forced, unforced) in serial_kinase.iter().zip(&unforced_kinase) {
            assert!(forced > unforced);
        }
    }
}
