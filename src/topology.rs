use crate::core::{ClusterId, ClusterKind, CoreId};
use crate::util::error::TopologyError;
use crate::util::sysfs::read_sysfs_parsed;
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Upper bound on how many cores of one cluster the policy keeps online
pub const MAX_CPUS_PER_CLUSTER: usize = 4;

/// The core that is never taken offline, on any cluster
pub const PRIMARY_CORE: CoreId = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub id: ClusterId,
    pub kind: ClusterKind,
    /// Sorted ascending; the first entry is the anchor
    pub cores: Vec<CoreId>,
    pub max_online: usize,
}

/// Static CPU → cluster mapping. Clusters are ordered slowest first.
#[derive(Debug, Clone)]
pub struct Topology {
    clusters: Vec<Cluster>,
    core_cluster: BTreeMap<CoreId, ClusterId>,
}

impl Topology {
    /// Build a topology from groups of core ids, slowest group first
    pub fn new(groups: Vec<Vec<CoreId>>) -> Result<Self, TopologyError> {
        if groups.is_empty() {
            return Err(TopologyError::NoCores("no clusters given".to_string()));
        }

        let mut core_cluster = BTreeMap::new();
        let mut clusters = Vec::with_capacity(groups.len());

        for (index, mut cores) in groups.into_iter().enumerate() {
            if cores.is_empty() {
                return Err(TopologyError::EmptyCluster(index));
            }
            cores.sort_unstable();

            let id = ClusterId(index);
            for &core in &cores {
                if core_cluster.insert(core, id).is_some() {
                    return Err(TopologyError::DuplicateCore(core));
                }
            }

            clusters.push(Cluster {
                id,
                kind: if index == 0 {
                    ClusterKind::Efficiency
                } else {
                    ClusterKind::Performance
                },
                max_online: cores.len().min(MAX_CPUS_PER_CLUSTER),
                cores,
            });
        }

        Ok(Self {
            clusters,
            core_cluster,
        })
    }

    /// Detect the topology from a sysfs CPU directory (normally `/sys/devices/system/cpu`)
    ///
    /// Cores are grouped by `topology/cluster_id`, or `topology/physical_package_id`
    /// on kernels without cluster ids. Groups are ordered by their maximum frequency.
    pub fn discover(cpu_root: &Path) -> Result<Self, TopologyError> {
        let cores = match list_cpu_dirs(cpu_root) {
            Ok(cores) if !cores.is_empty() => cores,
            Ok(_) | Err(_) => {
                let count = num_cpus::get() as CoreId;
                warn!(
                    "Could not enumerate CPUs under {}, assuming {count} cores in one cluster",
                    cpu_root.display()
                );
                return Self::new(vec![(0..count).collect()]);
            }
        };

        let mut groups: BTreeMap<i64, Vec<CoreId>> = BTreeMap::new();
        let mut previous_group: Option<i64> = None;

        for core in cores {
            let topology_dir = cpu_root.join(format!("cpu{core}/topology"));
            // Offline cores may hide their topology directory. Neighbouring CPUs
            // almost always share a cluster, so borrow the previous core's group.
            let group = read_sysfs_parsed::<i64>(topology_dir.join("cluster_id"))
                .or_else(|_| read_sysfs_parsed::<i64>(topology_dir.join("physical_package_id")))
                .ok()
                .or(previous_group);

            let group = group.unwrap_or_else(|| {
                warn!("No topology information for CPU {core}, placing it in cluster 0");
                0
            });

            groups.entry(group).or_default().push(core);
            previous_group = Some(group);
        }

        let mut groups: Vec<(u32, Vec<CoreId>)> = groups
            .into_values()
            .map(|cores| (group_max_frequency(cpu_root, &cores), cores))
            .collect();
        groups.sort_by_key(|(max_freq, cores)| (*max_freq, cores[0]));

        let topology = Self::new(merge_same_frequency_groups(groups))?;
        debug!("Detected topology: {:?}", topology.clusters);
        Ok(topology)
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn cluster(&self, cluster: ClusterId) -> &Cluster {
        &self.clusters[cluster.0]
    }

    pub fn cluster_of(&self, core: CoreId) -> Option<ClusterId> {
        self.core_cluster.get(&core).copied()
    }

    /// Lowest-numbered core of the cluster
    pub fn anchor_of(&self, cluster: ClusterId) -> CoreId {
        self.cluster(cluster).cores[0]
    }

    pub fn max_cores_online(&self, cluster: ClusterId) -> usize {
        self.cluster(cluster).max_online
    }

    pub fn cores_of(&self, cluster: ClusterId) -> &[CoreId] {
        &self.cluster(cluster).cores
    }

    pub fn contains(&self, core: CoreId) -> bool {
        self.core_cluster.contains_key(&core)
    }

    /// All cores in ascending order
    pub fn cores(&self) -> impl DoubleEndedIterator<Item = CoreId> + '_ {
        self.core_cluster.keys().copied()
    }

    pub fn core_count(&self) -> usize {
        self.core_cluster.len()
    }

    /// Whether the automatic policy must never offline `core`
    pub fn is_protected(&self, core: CoreId) -> bool {
        core == PRIMARY_CORE || self.clusters.iter().any(|c| c.cores[0] == core)
    }
}

fn list_cpu_dirs(cpu_root: &Path) -> Result<Vec<CoreId>, TopologyError> {
    let mut cores = BTreeSet::new();

    for entry in fs::read_dir(cpu_root)?.flatten() {
        let entry_file_name = entry.file_name();
        let Some(name) = entry_file_name.to_str() else {
            continue;
        };

        // Skip non-CPU directories (e.g., cpuidle, cpufreq)
        let Some(index) = name.strip_prefix("cpu") else {
            continue;
        };
        if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        if let Ok(core) = index.parse::<CoreId>() {
            cores.insert(core);
        }
    }

    Ok(cores.into_iter().collect())
}

/// x86 reports L2 domains as `cluster_id`, which splits one frequency tier into
/// many small groups. When every group's ceiling is known, groups sharing a
/// ceiling form one cluster. Expects `groups` sorted by frequency.
fn merge_same_frequency_groups(groups: Vec<(u32, Vec<CoreId>)>) -> Vec<Vec<CoreId>> {
    if groups.iter().any(|&(max_freq, _)| max_freq == 0) {
        return groups.into_iter().map(|(_, cores)| cores).collect();
    }

    let mut merged: Vec<(u32, Vec<CoreId>)> = Vec::new();
    for (max_freq, cores) in groups {
        match merged.last_mut() {
            Some((last_freq, last_cores)) if *last_freq == max_freq => last_cores.extend(cores),
            _ => merged.push((max_freq, cores)),
        }
    }
    merged.into_iter().map(|(_, cores)| cores).collect()
}

fn group_max_frequency(cpu_root: &Path, cores: &[CoreId]) -> u32 {
    cores
        .iter()
        .find_map(|core| {
            read_sysfs_parsed::<u32>(cpu_root.join(format!("cpu{core}/cpufreq/cpuinfo_max_freq")))
                .ok()
        })
        .unwrap_or(0)
}
