/// Logical CPU number as the kernel numbers it (`cpuN`)
pub type CoreId = u32;

/// Position of a cluster in the topology, slowest cluster first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterId(pub usize);

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterKind {
    Efficiency,  // the slow cluster, holds CPU 0
    Performance, // every faster cluster
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Active,
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayEvent {
    On,
    Off,
}

pub struct CoreInfo {
    pub core_id: CoreId,
    pub cluster: ClusterId,
    pub online: bool,
    pub protected: bool,
    pub current_frequency_khz: Option<u32>,
    pub max_frequency_khz: Option<u32>,
}

pub struct ClusterInfo {
    pub id: ClusterId,
    pub kind: ClusterKind,
    pub cores: Vec<CoreId>,
    pub anchor: CoreId,
    pub max_cores_online: usize,
    pub online_count: usize,
    pub max_frequency_khz: Option<u32>,
    pub up_rate_khz: Option<u32>,
    pub down_rate_khz: Option<u32>,
}

pub struct SystemReport {
    pub clusters: Vec<ClusterInfo>,
    pub cores: Vec<CoreInfo>,
    pub timestamp: std::time::SystemTime, // so we know when the report was generated
}
