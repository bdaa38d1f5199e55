use rustc_hash::{FxHashMap, FxHashSet};

pub type HashMap<K, V> = FxHashMap<K, V>;

pub type HashSet<K> = FxHashSet<K>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SynapseKind {
    Ampa,
    Nmda,
}

impl SynapseKind {
    pub fn channel_name(&self) -> &'static str {
        match self {
            SynapseKind::Ampa => "ampa",
            SynapseKind::Nmda => "nmda",
        }
    }
}
