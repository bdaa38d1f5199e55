use std::fmt;

use log::warn;
use simple_error::{SimpleError, SimpleResult};

use crate::engine::{BiochemicalEngine, ElectricalEngine};
use crate::error::{Result, SpineSyncError};
use crate::spine::RunContext;

#[derive(Debug, Clone, PartialEq)]
pub enum StimulusTarget {
    Electrical {
        section: String,
        channel: String,
        name: String,
    },
    Biochemical {
        spine_id: String,
        process: String,
    },
}

impl StimulusTarget {
    pub fn electrical(section: &str, channel: &str, name: &str) -> Self {
        StimulusTarget::Electrical {
            section: section.to_string(),
            channel: channel.to_string(),
            name: name.to_string(),
        }
    }

    pub fn biochemical(spine_id: &str, process: &str) -> Self {
        StimulusTarget::Biochemical {
            spine_id: spine_id.to_string(),
            process: process.to_string(),
        }
    }

    pub fn exists_in(&self, ctx: &RunContext) -> bool {
        match self {
            StimulusTarget::Electrical {
                section,
                channel,
                name,
            } => ctx.electrical.has_param(section, channel, name),
            StimulusTarget::Biochemical { spine_id, process } => ctx
                .spine(spine_id)
                .map_or(false, |spine| spine.biochemical().has_process(process)),
        }
    }

    pub fn read(&self, ctx: &RunContext) -> SimpleResult<f64> {
        match self {
            StimulusTarget::Electrical {
                section,
                channel,
                name,
            } => ctx.electrical.get_param(section, channel, name),
            StimulusTarget::Biochemical { spine_id, process } => ctx
                .spine(spine_id)
                .ok_or_else(|| SimpleError::new(format!("no such spine: {}", spine_id)))?
                .biochemical()
                .get_input_rate(process),
        }
    }

    fn write(&self, ctx: &mut RunContext, value: f64) -> SimpleResult<()> {
        match self {
            StimulusTarget::Electrical {
                section,
                channel,
                name,
            } => ctx.electrical.set_param(section, channel, name, value),
            StimulusTarget::Biochemical { spine_id, process } => {
                let idx = ctx
                    .spine_index(spine_id)
                    .ok_or_else(|| SimpleError::new(format!("no such spine: {}", spine_id)))?;
                ctx.spines[idx]
                    .biochemical_mut()
                    .set_input_rate(process, value)
            }
        }
    }
}

impl fmt::Display for StimulusTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StimulusTarget::Electrical {
                section,
                channel,
                name,
            } => write!(f, "{}.{}.{}", section, channel, name),
            StimulusTarget::Biochemical { spine_id, process } => {
                write!(f, "{}:{}", spine_id, process)
            }
        }
    }
}

/// A forcing pulse: `target` is held at `amplitude` during
/// `[onset, onset + duration)` and set back to `baseline` afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct StimulusEvent {
    pub onset: f64,
    pub duration: f64,
    pub target: StimulusTarget,
    pub amplitude: f64,
    pub baseline: f64,
}

impl StimulusEvent {
    pub fn to_log(&self) -> String {
        format!(
            "Stimulus target: {}, onset [ms]: {:.6}, duration [ms]: {:.6}, amplitude: {:e}, baseline: {:e}\n",
            self.target, self.onset, self.duration, self.amplitude, self.baseline
        )
    }
}

/// `count` pulses starting at `onset`, one every `interval`.
#[derive(Debug, Clone)]
pub struct StimulusTrain {
    pub onset: f64,
    pub count: usize,
    pub interval: f64,
    pub pulse_duration: f64,
    pub target: StimulusTarget,
    pub amplitude: f64,
    pub baseline: f64,
}

impl StimulusTrain {
    pub fn expand(&self) -> SimpleResult<Vec<StimulusEvent>> {
        if self.count == 0 {
            return Err(SimpleError::new("train count must be strictly positive"));
        }

        if !(self.pulse_duration > 0.0) {
            return Err(SimpleError::new(
                "pulse_duration must be strictly positive",
            ));
        }

        if self.count > 1 && !(self.pulse_duration < self.interval) {
            return Err(SimpleError::new(
                "pulse_duration must be less than interval",
            ));
        }

        Ok((0..self.count)
            .map(|i| StimulusEvent {
                onset: self.onset + i as f64 * self.interval,
                duration: self.pulse_duration,
                target: self.target.clone(),
                amplitude: self.amplitude,
                baseline: self.baseline,
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventState {
    Pending,
    Active,
    Done,
}

#[derive(Debug, Clone)]
struct ScheduledEvent {
    event: StimulusEvent,
    onset_tick: usize,
    end_tick: usize,
    state: EventState,
}

impl ScheduledEvent {
    /// Two events on the same target conflict if either their tick windows or
    /// their real `[onset, onset + duration)` intervals intersect.
    fn overlaps(&self, other: &ScheduledEvent) -> bool {
        if self.event.target != other.event.target {
            return false;
        }

        let ticks_overlap = self.onset_tick < other.end_tick && other.onset_tick < self.end_tick;
        let times_overlap = self.event.onset < other.event.onset + other.event.duration
            && other.event.onset < self.event.onset + self.event.duration;

        ticks_overlap || times_overlap
    }
}

/// Events are kept in onset order and converted to fine ticks when scheduled.
/// A pulse shorter than one fine step is held for exactly one step.
///
/// Biochemical targets are forced as a burst at the onset tick: the input
/// rate is raised, the owning spine's engine runs for the pulse duration
/// (scaled into engine time) and the baseline is restored.
#[derive(Debug)]
pub struct StimulusScheduler {
    dt_fine: f64,
    biochemical_time_scale: f64,
    events: Vec<ScheduledEvent>,
    application_count: usize,
    revert_count: usize,
}

impl StimulusScheduler {
    pub fn new(dt_fine: f64) -> Result<Self> {
        if !(dt_fine > 0.0) || !dt_fine.is_finite() {
            return Err(SpineSyncError::Configuration(SimpleError::new(
                "dt_fine must be strictly positive",
            )));
        }

        Ok(Self {
            dt_fine,
            biochemical_time_scale: 1.0,
            events: Vec::new(),
            application_count: 0,
            revert_count: 0,
        })
    }

    pub fn dt_fine(&self) -> f64 {
        self.dt_fine
    }

    pub fn biochemical_time_scale(&self) -> f64 {
        self.biochemical_time_scale
    }

    pub(crate) fn set_biochemical_time_scale(&mut self, biochemical_time_scale: f64) {
        self.biochemical_time_scale = biochemical_time_scale;
    }

    pub fn schedule(&mut self, event: StimulusEvent) -> Result<()> {
        if !(event.onset >= 0.0) || !event.onset.is_finite() {
            return Err(SpineSyncError::Configuration(SimpleError::new(
                "stimulus onset must not be negative",
            )));
        }

        if !(event.duration > 0.0) || !event.duration.is_finite() {
            return Err(SpineSyncError::Configuration(SimpleError::new(
                "stimulus duration must be strictly positive",
            )));
        }

        let onset_tick = self.to_tick(event.onset);
        let end_tick = self.to_tick(event.onset + event.duration).max(onset_tick + 1);

        let scheduled = ScheduledEvent {
            event,
            onset_tick,
            end_tick,
            state: EventState::Pending,
        };

        if let Some(existing) = self.events.iter().find(|other| other.overlaps(&scheduled)) {
            return Err(SpineSyncError::SchedulingConflict(SimpleError::new(format!(
                "stimulus on {} at {} overlaps stimulus at {}",
                scheduled.event.target, scheduled.event.onset, existing.event.onset
            ))));
        }

        let pos = self
            .events
            .partition_point(|other| other.onset_tick <= scheduled.onset_tick);
        self.events.insert(pos, scheduled);

        Ok(())
    }

    pub fn schedule_train(&mut self, train: &StimulusTrain) -> Result<()> {
        let events = train.expand().map_err(SpineSyncError::Configuration)?;

        for event in events {
            self.schedule(event)?;
        }

        Ok(())
    }

    /// Forces every pending event whose window contains `tick`. Biochemical
    /// pulses are run to completion here and never become active.
    pub fn apply_due(&mut self, tick: usize, ctx: &mut RunContext) -> SimpleResult<usize> {
        let time_scale = self.biochemical_time_scale;
        let mut applied = 0;
        let mut completed = 0;

        for scheduled in self.events.iter_mut() {
            if scheduled.onset_tick > tick {
                break;
            }

            if scheduled.state != EventState::Pending {
                continue;
            }

            if tick >= scheduled.end_tick {
                warn!(
                    "stimulus on {} at {} was scheduled in the past and is skipped",
                    scheduled.event.target, scheduled.event.onset
                );
                scheduled.state = EventState::Done;
                continue;
            }

            match &scheduled.event.target {
                StimulusTarget::Electrical { .. } => {
                    scheduled
                        .event
                        .target
                        .write(ctx, scheduled.event.amplitude)?;
                    scheduled.state = EventState::Active;
                }
                StimulusTarget::Biochemical { spine_id, .. } => {
                    pulse_biochemical(&scheduled.event, spine_id, time_scale, ctx)?;
                    scheduled.state = EventState::Done;
                    completed += 1;
                }
            }
            applied += 1;
        }

        self.application_count += applied;
        self.revert_count += completed;
        Ok(applied)
    }

    /// Restores the baseline of every active event whose window ended at or
    /// before `tick`.
    pub fn revert_expired(&mut self, tick: usize, ctx: &mut RunContext) -> SimpleResult<usize> {
        let mut reverted = 0;

        for scheduled in self.events.iter_mut() {
            if scheduled.onset_tick > tick {
                break;
            }

            if scheduled.state == EventState::Active && tick >= scheduled.end_tick {
                scheduled
                    .event
                    .target
                    .write(ctx, scheduled.event.baseline)?;
                scheduled.state = EventState::Done;
                reverted += 1;
            }
        }

        self.revert_count += reverted;
        Ok(reverted)
    }

    pub fn events(&self) -> impl Iterator<Item = &StimulusEvent> + '_ {
        self.events.iter().map(|scheduled| &scheduled.event)
    }

    pub fn active_count(&self) -> usize {
        self.events
            .iter()
            .filter(|scheduled| scheduled.state == EventState::Active)
            .count()
    }

    pub fn application_count(&self) -> usize {
        self.application_count
    }

    pub fn revert_count(&self) -> usize {
        self.revert_count
    }

    fn to_tick(&self, t: f64) -> usize {
        let exact = t / self.dt_fine;
        let rounded = exact.round();

        if (exact - rounded).abs() <= 1e-9 * rounded.max(1.0) {
            rounded as usize
        } else {
            exact.ceil() as usize
        }
    }
}

fn pulse_biochemical(
    event: &StimulusEvent,
    spine_id: &str,
    time_scale: f64,
    ctx: &mut RunContext,
) -> SimpleResult<()> {
    let idx = ctx
        .spine_index(spine_id)
        .ok_or_else(|| SimpleError::new(format!("no such spine: {}", spine_id)))?;

    event.target.write(ctx, event.amplitude)?;
    ctx.spines[idx]
        .biochemical_mut()
        .advance(event.duration * time_scale)?;
    event.target.write(ctx, event.baseline)
}
