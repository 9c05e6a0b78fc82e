use crate::config::AppConfig;
use crate::core::{ClusterInfo, CoreId, CoreInfo, SystemReport};
use crate::cpu::Platform;
use crate::topology::Topology;
use std::time::SystemTime;

/// Reads core frequencies as a load proxy.
///
/// An offline core never yields a sample, even if the platform still reports a
/// stale value for it.
#[derive(Clone, Copy)]
pub struct FrequencySampler<'a> {
    platform: &'a dyn Platform,
}

impl<'a> FrequencySampler<'a> {
    pub fn new(platform: &'a dyn Platform) -> Self {
        Self { platform }
    }

    pub fn current_frequency(&self, core: CoreId) -> Option<u32> {
        if !self.platform.is_core_online(core) {
            return None;
        }
        self.platform.current_frequency(core).filter(|&khz| khz > 0)
    }

    pub fn max_frequency(&self, core: CoreId) -> Option<u32> {
        self.platform.max_frequency(core).filter(|&khz| khz > 0)
    }
}

/// `percent` of `max_khz`, computed without overflowing for large percentages
pub fn scaled_rate(percent: u32, max_khz: u32) -> u32 {
    let rate = u64::from(percent) * u64::from(max_khz) / 100;
    u32::try_from(rate).unwrap_or(u32::MAX)
}

/// Snapshot of the topology, core states and thresholds for display
pub fn collect_system_report(
    platform: &dyn Platform,
    topology: &Topology,
    config: &AppConfig,
) -> SystemReport {
    let sampler = FrequencySampler::new(platform);

    let cores = topology
        .cores()
        .map(|core_id| CoreInfo {
            core_id,
            cluster: topology.cluster_of(core_id).unwrap_or_default(),
            online: platform.is_core_online(core_id),
            protected: topology.is_protected(core_id),
            current_frequency_khz: sampler.current_frequency(core_id),
            max_frequency_khz: sampler.max_frequency(core_id),
        })
        .collect();

    let clusters = topology
        .clusters()
        .iter()
        .map(|cluster| {
            let tunables = config.tunables(cluster.id.0);
            let max_frequency_khz = cluster
                .cores
                .iter()
                .find_map(|&core| sampler.max_frequency(core));

            ClusterInfo {
                id: cluster.id,
                kind: cluster.kind,
                cores: cluster.cores.clone(),
                anchor: topology.anchor_of(cluster.id),
                max_cores_online: cluster.max_online,
                online_count: cluster
                    .cores
                    .iter()
                    .filter(|&&core| platform.is_core_online(core))
                    .count(),
                max_frequency_khz,
                up_rate_khz: max_frequency_khz.map(|max| scaled_rate(tunables.cpufreq_up, max)),
                down_rate_khz: max_frequency_khz
                    .map(|max| scaled_rate(tunables.cpufreq_down, max)),
            }
        })
        .collect();

    SystemReport {
        clusters,
        cores,
        timestamp: SystemTime::now(),
    }
}
