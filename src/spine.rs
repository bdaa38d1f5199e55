use simple_error::{SimpleError, SimpleResult};

use crate::engine::{BoxedBiochemicalEngine, BoxedElectricalEngine};
use crate::types::SynapseKind;

pub const WEIGHT_PARAM: &str = "weight";

#[derive(Debug, Clone)]
pub struct Synapse {
    id: String,
    kind: SynapseKind,
    section: String,
    weight: f64,
    weight_history: Vec<(f64, f64)>,
}

impl Synapse {
    pub fn new(id: &str, kind: SynapseKind, section: &str, initial_weight: f64) -> Self {
        Self {
            id: id.to_string(),
            kind,
            section: section.to_string(),
            weight: initial_weight,
            weight_history: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> SynapseKind {
        self.kind
    }

    pub fn channel(&self) -> &'static str {
        self.kind.channel_name()
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn weight_history(&self) -> &[(f64, f64)] {
        &self.weight_history
    }

    // only the plasticity updater writes weights
    pub(crate) fn commit_weight(&mut self, t: f64, weight: f64) {
        self.weight = weight;
        self.weight_history.push((t, weight));
    }
}

/// One dendritic spine: its head section on the shared electrical model, its
/// own biochemical engine and its synapses.
pub struct SpineUnit {
    id: String,
    position: f64,
    parent_section: String,
    head_section: String,
    biochemical: BoxedBiochemicalEngine,
    synapses: Vec<Synapse>,
}

impl SpineUnit {
    pub fn new(
        id: &str,
        position: f64,
        parent_section: &str,
        head_section: &str,
        biochemical: BoxedBiochemicalEngine,
    ) -> Self {
        Self {
            id: id.to_string(),
            position,
            parent_section: parent_section.to_string(),
            head_section: head_section.to_string(),
            biochemical,
            synapses: Vec::new(),
        }
    }

    pub fn add_synapse(&mut self, synapse: Synapse) -> SimpleResult<()> {
        if self.synapse(synapse.id()).is_some() {
            return Err(SimpleError::new(format!(
                "duplicate synapse id {} on {}",
                synapse.id(),
                self.id
            )));
        }

        self.synapses.push(synapse);
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn parent_section(&self) -> &str {
        &self.parent_section
    }

    pub fn head_section(&self) -> &str {
        &self.head_section
    }

    pub fn synapses(&self) -> &[Synapse] {
        &self.synapses
    }

    pub fn synapse(&self, id: &str) -> Option<&Synapse> {
        self.synapses.iter().find(|synapse| synapse.id() == id)
    }

    pub fn biochemical(&self) -> &BoxedBiochemicalEngine {
        &self.biochemical
    }

    pub fn biochemical_mut(&mut self) -> &mut BoxedBiochemicalEngine {
        &mut self.biochemical
    }

    pub(crate) fn split_mut(&mut self) -> (&mut BoxedBiochemicalEngine, &mut [Synapse]) {
        (&mut self.biochemical, &mut self.synapses)
    }
}

/// Everything a run mutates, constructed once by the caller and lent to the
/// coordinator. Spines are iterated in insertion order.
pub struct RunContext {
    pub electrical: BoxedElectricalEngine,
    pub spines: Vec<SpineUnit>,
}

impl RunContext {
    pub fn new(electrical: BoxedElectricalEngine) -> Self {
        Self {
            electrical,
            spines: Vec::new(),
        }
    }

    pub fn add_spine(&mut self, spine: SpineUnit) -> SimpleResult<usize> {
        if self.spine_index(spine.id()).is_some() {
            return Err(SimpleError::new(format!("duplicate spine id {}", spine.id())));
        }

        self.spines.push(spine);
        Ok(self.spines.len() - 1)
    }

    pub fn spine_index(&self, id: &str) -> Option<usize> {
        self.spines.iter().position(|spine| spine.id() == id)
    }

    pub fn spine(&self, id: &str) -> Option<&SpineUnit> {
        self.spines.iter().find(|spine| spine.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{ReferenceCompartment, ReferenceKinaseNetwork};

    fn make_spine(id: &str) -> SpineUnit {
        SpineUnit::new(
            id,
            0.5,
            "dend",
            &format!("{}_head", id),
            Box::new(ReferenceKinaseNetwork::new()),
        )
    }

    #[test]
    fn commit_weight_appends_history() {
        let mut sut = Synapse::new("s0", SynapseKind::Ampa, "spine0_psd", 1.0);
        sut.commit_weight(1.0, 1.5);
        sut.commit_weight(2.0, 1.75);

        assert_eq!(sut.weight(), 1.75);
        assert_eq!(sut.weight_history(), [(1.0, 1.5), (2.0, 1.75)]);
    }

    #[test]
    fn duplicate_synapse_rejected() {
        let mut sut = make_spine("spine0");
        sut.add_synapse(Synapse::new("ampa", SynapseKind::Ampa, "spine0_psd", 1.0))
            .unwrap();
        let result = sut.add_synapse(Synapse::new("ampa", SynapseKind::Nmda, "spine0_psd", 1.0));

        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().as_str(),
            "duplicate synapse id ampa on spine0"
        );
    }

    #[test]
    fn spines_keep_insertion_order() {
        let mut sut = RunContext::new(Box::new(ReferenceCompartment::new(&["dend"])));
        assert_eq!(sut.add_spine(make_spine("spine1")).unwrap(), 0);
        assert_eq!(sut.add_spine(make_spine("spine0")).unwrap(), 1);
        assert!(sut.add_spine(make_spine("spine1")).is_err());

        assert_eq!(sut.spine_index("spine0"), Some(1));
        assert_eq!(sut.spines[0].id(), "spine1");
    }
}
