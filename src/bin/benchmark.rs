use std::time::Instant;

use rand::{prelude::Distribution, rngs::StdRng, seq::SliceRandom, SeedableRng};
use spinesync::coordinator::Coordinator;
use spinesync::reference::{ReferenceCompartment, ReferenceKinaseNetwork, DRIVE_PARAM};
use spinesync::spine::{RunContext, SpineUnit, Synapse};
use spinesync::stimulus::{StimulusEvent, StimulusScheduler, StimulusTarget};
use spinesync::types::SynapseKind;
use statrs::distribution::Poisson;

#[path = "../scenario_params.rs"]
mod scenario_params;

// pulses start on a 10 ms grid and last half a slot, so they never overlap
const SLOT_LENGTH: f64 = 10.0;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let params = scenario_params::get_scenario_params();
    let mut rng = StdRng::seed_from_u64(0);

    let mut compartment = ReferenceCompartment::new(&["dend"]);
    let mut scheduler = StimulusScheduler::new(params.clock_params.dt_fine).unwrap();
    let mut spines = Vec::new();

    let num_slots = (scenario_params::T_STOP / SLOT_LENGTH) as usize;
    let pulse_slots: Vec<usize> = (1..num_slots).collect();
    let num_pulses_dist = Poisson::new(20.0).unwrap();

    for i in 0..scenario_params::NUM_SPINES {
        let id = format!("spine{}", i);
        let head = format!("{}_head", id);
        compartment.add_section(&head);
        compartment.add_channel(&head, "ampa", 1.0).unwrap();
        compartment.add_channel(&head, "nmda", 1.0).unwrap();

        let mut spine = SpineUnit::new(
            &id,
            i as f64 / scenario_params::NUM_SPINES as f64,
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

        let num_pulses = num_pulses_dist.sample(&mut rng) as usize;
        for slot in pulse_slots.choose_multiple(&mut rng, num_pulses) {
            scheduler
                .schedule(StimulusEvent {
                    onset: *slot as f64 * SLOT_LENGTH,
                    duration: 0.5 * SLOT_LENGTH,
                    target: StimulusTarget::electrical(&head, "ampa", DRIVE_PARAM),
                    amplitude: 1.0,
                    baseline: 0.0,
                })
                .unwrap();
        }
    }

    let mut ctx = RunContext::new(Box::new(compartment));
    for spine in spines {
        ctx.add_spine(spine).unwrap();
    }

    let mut coordinator = Coordinator::initialize(&ctx, &params, scheduler).unwrap();

    let wall_start = Instant::now();
    let records = coordinator.run(&mut ctx, scenario_params::T_STOP).unwrap();
    let wall_time = wall_start.elapsed();

    let spine_coupling_count = coordinator.coupling_count() * ctx.spines.len();
    let coupling_throughput = spine_coupling_count as f64 / wall_time.as_secs_f64();

    let checksum: f64 = ctx
        .spines
        .iter()
        .filter_map(|spine| spine.synapse("ampa"))
        .map(|synapse| synapse.weight())
        .sum();

    eprintln!(
        "Stimuli applied: {}",
        coordinator.scheduler().application_count()
    );
    eprintln!(
        "Spine coupling throughput: {:.3e} ({:.3} us per spine coupling)",
        coupling_throughput,
        1e6 / coupling_throughput
    );
    eprintln!("Recorded series: {}", records.vectors.len() + records.timeseries.len());
    eprintln!("Checksum: {:.9}", checksum);
}
