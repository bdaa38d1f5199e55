use itertools::Itertools;
use simple_error::{SimpleError, SimpleResult};

use crate::types::HashMap;

pub const TIME_VARIABLE: &str = "t";

/// Who a recorded variable belongs to. Decides which record collection the
/// series ends up in.
#[derive(Debug, Clone, PartialEq)]
pub enum Owner {
    Section(String),
    Channel {
        channel_type: String,
        section: String,
    },
    Spine {
        spine_id: String,
        position: f64,
        parent_section: String,
    },
}

impl Owner {
    fn key(&self, variable: &str) -> SeriesKey {
        match self {
            Owner::Section(section) => SeriesKey::Section(variable.to_string(), section.clone()),
            Owner::Channel {
                channel_type,
                section,
            } => SeriesKey::Channel(variable.to_string(), channel_type.clone(), section.clone()),
            Owner::Spine {
                spine_id,
                position,
                parent_section,
            } => SeriesKey::Spine(
                variable.to_string(),
                spine_id.clone(),
                position.to_bits(),
                parent_section.clone(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SeriesKey {
    Section(String, String),
    Channel(String, String, String),
    Spine(String, String, u64, String),
}

#[derive(Debug, Clone)]
struct Series {
    variable: String,
    owner: Owner,
    samples: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub variable: String,
    pub section_name: Option<String>,
    pub series: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynVectorRecord {
    pub variable: String,
    pub channel_type: String,
    pub section_name: String,
    pub series: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeseriesRecord {
    pub variable: String,
    pub position: f64,
    pub parent_section: String,
    pub section_name: String,
    pub series: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageRecords {
    pub vectors: Vec<VectorRecord>,
    pub syn_vectors: Vec<SynVectorRecord>,
    pub timeseries: Vec<TimeseriesRecord>,
}

impl StorageRecords {
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty() && self.syn_vectors.is_empty() && self.timeseries.is_empty()
    }

    pub fn time_base(&self) -> Option<&[f64]> {
        self.vector(TIME_VARIABLE, None)
    }

    pub fn vector(&self, variable: &str, section_name: Option<&str>) -> Option<&[f64]> {
        self.vectors
            .iter()
            .find(|record| {
                record.variable == variable && record.section_name.as_deref() == section_name
            })
            .map(|record| record.series.as_slice())
    }

    pub fn syn_vector(
        &self,
        variable: &str,
        channel_type: &str,
        section_name: &str,
    ) -> Option<&[f64]> {
        self.syn_vectors
            .iter()
            .find(|record| {
                record.variable == variable
                    && record.channel_type == channel_type
                    && record.section_name == section_name
            })
            .map(|record| record.series.as_slice())
    }

    pub fn timeseries(
        &self,
        variable: &str,
        position: f64,
        parent_section: &str,
        section_name: &str,
    ) -> Option<&[(f64, f64)]> {
        self.timeseries
            .iter()
            .find(|record| {
                record.variable == variable
                    && record.position.to_bits() == position.to_bits()
                    && record.parent_section == parent_section
                    && record.section_name == section_name
            })
            .map(|record| record.series.as_slice())
    }
}

/// Append-only sample buffers keyed by (variable, owner). Series come out of
/// `finalize` in the order they were first recorded.
#[derive(Debug, Default)]
pub struct TrajectoryRecorder {
    series: Vec<Series>,
    index: HashMap<SeriesKey, usize>,
}

impl TrajectoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sample(
        &mut self,
        variable: &str,
        owner: &Owner,
        t: f64,
        value: f64,
    ) -> SimpleResult<()> {
        if !t.is_finite() {
            return Err(SimpleError::new(format!(
                "sample time for {} must be finite",
                variable
            )));
        }

        let key = owner.key(variable);

        let idx = match self.index.get(&key) {
            Some(idx) => *idx,
            None => {
                self.series.push(Series {
                    variable: variable.to_string(),
                    owner: owner.clone(),
                    samples: Vec::new(),
                });
                self.index.insert(key, self.series.len() - 1);
                self.series.len() - 1
            }
        };

        let series = &mut self.series[idx];

        if let Some((last_t, _)) = series.samples.last() {
            if t <= *last_t {
                return Err(SimpleError::new(format!(
                    "sample for {} at {} is not after the previous sample at {}",
                    variable, t, last_t
                )));
            }
        }

        series.samples.push((t, value));
        Ok(())
    }

    pub fn sample_count(&self) -> usize {
        self.series.iter().map(|series| series.samples.len()).sum()
    }

    pub fn finalize(&self) -> StorageRecords {
        let section_series = self
            .series
            .iter()
            .filter(|series| matches!(series.owner, Owner::Section(_)));

        let mut time_base: Vec<f64> = section_series
            .clone()
            .flat_map(|series| series.samples.iter().map(|(t, _)| *t))
            .sorted_by(|a, b| a.total_cmp(b))
            .collect();
        time_base.dedup();

        let mut records = StorageRecords::default();

        if !time_base.is_empty() {
            records.vectors.push(VectorRecord {
                variable: TIME_VARIABLE.to_string(),
                section_name: None,
                series: time_base,
            });
        }

        for series in &self.series {
            let values = || series.samples.iter().map(|(_, value)| *value).collect();

            match &series.owner {
                Owner::Section(section) => records.vectors.push(VectorRecord {
                    variable: series.variable.clone(),
                    section_name: Some(section.clone()),
                    series: values(),
                }),
                Owner::Channel {
                    channel_type,
                    section,
                } => records.syn_vectors.push(SynVectorRecord {
                    variable: series.variable.clone(),
                    channel_type: channel_type.clone(),
                    section_name: section.clone(),
                    series: values(),
                }),
                Owner::Spine {
                    spine_id,
                    position,
                    parent_section,
                } => records.timeseries.push(TimeseriesRecord {
                    variable: series.variable.clone(),
                    position: *position,
                    parent_section: parent_section.clone(),
                    section_name: spine_id.clone(),
                    series: series.samples.clone(),
                }),
            }
        }

        records
    }
}
