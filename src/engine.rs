use crate::config::AppConfig;
use crate::core::{ClusterId, CoreId};
use crate::cpu::Platform;
use crate::monitor::{FrequencySampler, scaled_rate};
use crate::topology::{PRIMARY_CORE, Topology};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;

/// Cores left in the slower cluster after one faster core takes over its load
pub const PROMOTION_RETAINED_CORES: usize = 2;

/// Ticks since the last hotplug action.
///
/// There is exactly one counter for all clusters: an action in one cluster
/// restarts the wait for every other cluster, including later clusters in the
/// same tick. Policies depend on that coupling, so it must not be split per cluster.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DebounceCounter {
    cycle: u32,
}

impl DebounceCounter {
    pub const fn get(self) -> u32 {
        self.cycle
    }

    fn advance(&mut self) {
        self.cycle = self.cycle.saturating_add(1);
    }

    fn reset(&mut self) {
        self.cycle = 0;
    }

    pub const fn reached(self, threshold: u32) -> bool {
        self.cycle >= threshold
    }
}

/// Thresholds and limits for one cluster, derived from the live configuration each tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterPolicy {
    pub up_pct: u32,
    pub down_pct: u32,
    pub min_cpus: usize,
    pub up_debounce: u32,
    pub down_debounce: u32,
}

impl ClusterPolicy {
    pub fn for_cluster(config: &AppConfig, cluster: ClusterId) -> Self {
        let tunables = config.tunables(cluster.0);
        Self {
            up_pct: tunables.cpufreq_up,
            down_pct: tunables.cpufreq_down,
            min_cpus: tunables.min_cpus as usize,
            up_debounce: config.hotplug.cycle_up,
            down_debounce: config
                .hotplug
                .cycle_down
                .saturating_mul(tunables.cycle_down_multiplier),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalLimits {
    pub min_cpus: usize,
    pub max_cpus: usize,
}

impl GlobalLimits {
    pub fn new(config: &AppConfig, topology: &Topology) -> Self {
        Self {
            min_cpus: config.hotplug.min_cpus as usize,
            max_cpus: config
                .hotplug
                .max_cpus
                .map_or(topology.core_count(), |max| max as usize),
        }
    }
}

/// Load estimate for one cluster. All rates are in kHz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterLoad {
    /// Lowest frequency among the online cores
    pub slow_rate: u32,
    /// The slowest online core that may be taken offline
    pub slow_candidate: Option<CoreId>,
    /// Highest frequency among the online cores
    pub fast_rate: u32,
    pub up_rate: u32,
    pub down_rate: u32,
    pub online_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Grow,
    Shrink(CoreId),
    Hold,
}

/// Hysteresis policy for one cluster.
///
/// A cluster grows only when even its slowest core is above `up_rate`, and
/// shrinks only when even its fastest core is below `down_rate`.
pub fn decide(
    load: &ClusterLoad,
    policy: &ClusterPolicy,
    max_online: usize,
    total_online: usize,
    limits: &GlobalLimits,
    counter: DebounceCounter,
) -> Decision {
    if load.slow_rate > load.up_rate {
        if load.online_count < max_online
            && total_online < limits.max_cpus
            && counter.reached(policy.up_debounce)
        {
            return Decision::Grow;
        }
        return Decision::Hold;
    }

    match load.slow_candidate {
        Some(core)
            if load.fast_rate < load.down_rate
                && load.online_count > policy.min_cpus
                && total_online > limits.min_cpus
                && counter.reached(policy.down_debounce) =>
        {
            Decision::Shrink(core)
        }
        _ => Decision::Hold,
    }
}

/// Per-core count of offline transitions
#[derive(Debug, Default, Clone)]
pub struct HotplugStats {
    times_hotplugged: BTreeMap<CoreId, u64>,
    generation: u64,
}

impl HotplugStats {
    fn record(&mut self, core: CoreId, online: bool) {
        if !online {
            *self.times_hotplugged.entry(core).or_default() += 1;
        }
        self.generation += 1;
    }

    pub fn times_hotplugged(&self, core: CoreId) -> u64 {
        self.times_hotplugged.get(&core).copied().unwrap_or(0)
    }

    /// Bumped on every state change the controller makes
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

pub fn count_online(platform: &dyn Platform, cores: &[CoreId]) -> usize {
    cores
        .iter()
        .filter(|&&core| platform.is_core_online(core))
        .count()
}

fn total_online(platform: &dyn Platform, topology: &Topology) -> usize {
    topology
        .cores()
        .filter(|&core| platform.is_core_online(core))
        .count()
}

/// The decision engine. Owns the shared debounce counter, the cached
/// per-cluster maximum frequencies and the hotplug statistics.
#[derive(Debug, Default)]
pub struct Engine {
    counter: DebounceCounter,
    max_rates: BTreeMap<ClusterId, u32>,
    stats: HotplugStats,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn counter(&self) -> DebounceCounter {
        self.counter
    }

    pub const fn stats(&self) -> &HotplugStats {
        &self.stats
    }

    fn max_rate(
        &mut self,
        sampler: FrequencySampler<'_>,
        topology: &Topology,
        cluster: ClusterId,
    ) -> Option<u32> {
        if let Some(&rate) = self.max_rates.get(&cluster) {
            return Some(rate);
        }

        // Cores of a cluster share one frequency ceiling, any readable core will do
        let rate = topology
            .cores_of(cluster)
            .iter()
            .find_map(|&core| sampler.max_frequency(core))?;
        self.max_rates.insert(cluster, rate);
        Some(rate)
    }

    /// Estimate the load of `cluster` from its online cores' frequencies.
    ///
    /// Returns `None` when no online core of the cluster can be sampled.
    pub fn evaluate(
        &mut self,
        platform: &dyn Platform,
        topology: &Topology,
        cluster: ClusterId,
        policy: &ClusterPolicy,
    ) -> Option<ClusterLoad> {
        let sampler = FrequencySampler::new(platform);
        let online: Vec<CoreId> = topology
            .cores_of(cluster)
            .iter()
            .copied()
            .filter(|&core| platform.is_core_online(core))
            .collect();
        let reference = *online.first()?;

        let max_rate = self.max_rate(sampler, topology, cluster)?;
        let up_rate = scaled_rate(policy.up_pct, max_rate);
        let down_rate = scaled_rate(policy.down_pct, max_rate);

        // `reference` is the anchor whenever the anchor is online
        let reference_rate = sampler.current_frequency(reference);
        let mut fast_rate = reference_rate;
        let mut slowest: Option<(CoreId, u32)> = None;

        for &core in &online[1..] {
            let Some(rate) = sampler.current_frequency(core) else {
                continue;
            };

            fast_rate = Some(fast_rate.map_or(rate, |fast| fast.max(rate)));
            if topology.is_protected(core) {
                continue;
            }
            if slowest.is_none_or(|(_, slow)| rate < slow) {
                slowest = Some((core, rate));
            }
        }

        let slow_rate = match (reference_rate, slowest) {
            (Some(reference), Some((_, slow))) => reference.min(slow),
            (Some(reference), None) => reference,
            (None, Some((_, slow))) => slow,
            (None, None) => return None,
        };

        let load = ClusterLoad {
            slow_rate,
            slow_candidate: slowest.map(|(core, _)| core),
            fast_rate: fast_rate.unwrap_or(slow_rate),
            up_rate,
            down_rate,
            online_count: online.len(),
        };
        debug!("Cluster {cluster}: {load:?}");
        Some(load)
    }

    /// One decision tick over every cluster. Returns the number of hotplug
    /// decisions taken.
    pub fn tick(&mut self, platform: &dyn Platform, topology: &Topology, config: &AppConfig) -> usize {
        self.counter.advance();

        let limits = GlobalLimits::new(config, topology);
        let Some((first, rest)) = topology.clusters().split_first() else {
            return 0;
        };

        let mut actions = self.run_policy(platform, topology, config, &limits, first.id);

        for cluster in rest {
            let previous = ClusterId(cluster.id.0 - 1);
            let online = count_online(platform, topology.cores_of(cluster.id));

            if online == 0 {
                let previous_online = count_online(platform, topology.cores_of(previous));
                if previous_online >= topology.max_cores_online(previous) {
                    actions +=
                        self.promote(platform, topology, config, &limits, previous, cluster.id);
                }
            } else {
                actions += self.run_policy(platform, topology, config, &limits, cluster.id);
            }
        }

        actions
    }

    fn run_policy(
        &mut self,
        platform: &dyn Platform,
        topology: &Topology,
        config: &AppConfig,
        limits: &GlobalLimits,
        cluster: ClusterId,
    ) -> usize {
        let policy = ClusterPolicy::for_cluster(config, cluster);
        let Some(load) = self.evaluate(platform, topology, cluster, &policy) else {
            debug!("Cluster {cluster}: no usable frequency samples, skipping");
            return 0;
        };

        let decision = decide(
            &load,
            &policy,
            topology.max_cores_online(cluster),
            total_online(platform, topology),
            limits,
            self.counter,
        );

        match decision {
            Decision::Grow => {
                let offline = topology
                    .cores_of(cluster)
                    .iter()
                    .copied()
                    .find(|&core| !platform.is_core_online(core));
                match offline {
                    Some(core) => {
                        self.bring_online(platform, core);
                    }
                    None => debug!("Cluster {cluster}: no offline core left to bring up"),
                }
                self.counter.reset();
                1
            }
            Decision::Shrink(core) => {
                self.take_offline(platform, topology, core);
                self.counter.reset();
                1
            }
            Decision::Hold => 0,
        }
    }

    /// Replace a saturated slower cluster with one core of the next faster cluster
    fn promote(
        &mut self,
        platform: &dyn Platform,
        topology: &Topology,
        config: &AppConfig,
        limits: &GlobalLimits,
        from: ClusterId,
        to: ClusterId,
    ) -> usize {
        let Some(core) = topology
            .cores_of(to)
            .iter()
            .copied()
            .find(|&core| !platform.is_core_online(core))
        else {
            return 0;
        };

        info!("Cluster {from} saturated, bringing up CPU {core} of cluster {to}");
        if !self.bring_online(platform, core) {
            warn!("Cluster {from} stays saturated, CPU {core} did not come online");
            return 0;
        }

        let retained = PROMOTION_RETAINED_CORES.max(ClusterPolicy::for_cluster(config, from).min_cpus);
        while count_online(platform, topology.cores_of(from)) > retained
            && total_online(platform, topology) > limits.min_cpus
        {
            let Some(victim) = topology
                .cores_of(from)
                .iter()
                .copied()
                .find(|&c| !topology.is_protected(c) && platform.is_core_online(c))
            else {
                break;
            };

            if !self.take_offline(platform, topology, victim) {
                break;
            }
        }

        self.counter.reset();
        1
    }

    /// Bring `core` online. Already-online cores are left alone.
    pub fn bring_online(&mut self, platform: &dyn Platform, core: CoreId) -> bool {
        if platform.is_core_online(core) {
            debug!("CPU {core} is already online");
            return false;
        }
        self.switch_core(platform, core, true)
    }

    /// Take `core` offline on behalf of the automatic policy. Anchors and the
    /// primary core are refused.
    pub fn take_offline(&mut self, platform: &dyn Platform, topology: &Topology, core: CoreId) -> bool {
        if topology.is_protected(core) {
            error!("Refusing to take protected CPU {core} offline");
            return false;
        }
        if !platform.is_core_online(core) {
            debug!("CPU {core} is already offline");
            return true;
        }
        self.switch_core(platform, core, false)
    }

    /// Change a core's state without policy checks. CPU 0 is never taken offline.
    pub fn switch_core(&mut self, platform: &dyn Platform, core: CoreId, online: bool) -> bool {
        if !online && core == PRIMARY_CORE {
            error!("Refusing to take CPU {PRIMARY_CORE} offline");
            return false;
        }

        match platform.set_core_online(core, online) {
            Ok(()) => {
                info!("CPU[{core}] {}", if online { "on" } else { "off" });
                self.stats.record(core, online);
                true
            }
            Err(e) => {
                warn!(
                    "Failed to bring CPU {core} {}: {e}",
                    if online { "online" } else { "offline" }
                );
                false
            }
        }
    }
}
