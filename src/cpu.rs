use crate::core::CoreId;
use crate::topology::{PRIMARY_CORE, Topology};
use crate::util::error::ControlError;
use crate::util::sysfs::{path_exists_and_writable, read_sysfs_parsed, write_sysfs_value};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type Result<T, E = ControlError> = std::result::Result<T, E>;

pub const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

/// Low-level core control. Implementations are expected to be synchronous:
/// when `set_core_online` returns, the core is in the requested state or the
/// request was rejected.
pub trait Platform {
    fn set_core_online(&self, core: CoreId, online: bool) -> Result<()>;

    fn is_core_online(&self, core: CoreId) -> bool;

    /// Current frequency in kHz, `None` when offline or unreadable
    fn current_frequency(&self, core: CoreId) -> Option<u32>;

    /// Hardware maximum frequency in kHz
    fn max_frequency(&self, core: CoreId) -> Option<u32>;
}

impl<P: Platform + ?Sized> Platform for Arc<P> {
    fn set_core_online(&self, core: CoreId, online: bool) -> Result<()> {
        (**self).set_core_online(core, online)
    }

    fn is_core_online(&self, core: CoreId) -> bool {
        (**self).is_core_online(core)
    }

    fn current_frequency(&self, core: CoreId) -> Option<u32> {
        (**self).current_frequency(core)
    }

    fn max_frequency(&self, core: CoreId) -> Option<u32> {
        (**self).max_frequency(core)
    }
}

/// Core control through `/sys/devices/system/cpu`
#[derive(Debug, Clone)]
pub struct SysfsPlatform {
    root: PathBuf,
}

impl Default for SysfsPlatform {
    fn default() -> Self {
        Self::new(SYSFS_CPU_ROOT)
    }
}

impl SysfsPlatform {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn core_path(&self, core: CoreId, file: &str) -> PathBuf {
        self.root.join(format!("cpu{core}/{file}"))
    }

    /// Whether the kernel lets us change this core's online state
    pub fn is_hotpluggable(&self, core: CoreId) -> bool {
        path_exists_and_writable(&self.core_path(core, "online"))
    }
}

impl Platform for SysfsPlatform {
    fn set_core_online(&self, core: CoreId, online: bool) -> Result<()> {
        let path = self.core_path(core, "online");
        if !path.exists() {
            // Cores without an `online` file cannot be hotplugged and never go offline
            if online && self.root.join(format!("cpu{core}")).exists() {
                return Ok(());
            }
            return Err(ControlError::NotSupported(format!(
                "CPU {core} does not support hotplug"
            )));
        }

        write_sysfs_value(&path, if online { "1" } else { "0" })
    }

    fn is_core_online(&self, core: CoreId) -> bool {
        let path = self.core_path(core, "online");
        if !path.exists() {
            return self.root.join(format!("cpu{core}")).exists();
        }

        read_sysfs_parsed::<u8>(&path).is_ok_and(|state| state == 1)
    }

    fn current_frequency(&self, core: CoreId) -> Option<u32> {
        if !self.is_core_online(core) {
            return None;
        }

        read_sysfs_parsed(self.core_path(core, "cpufreq/scaling_cur_freq")).ok()
    }

    fn max_frequency(&self, core: CoreId) -> Option<u32> {
        read_sysfs_parsed(self.core_path(core, "cpufreq/cpuinfo_max_freq"))
            .or_else(|_| read_sysfs_parsed(self.core_path(core, "cpufreq/scaling_max_freq")))
            .ok()
    }
}

/// Operator override: force a core on or off regardless of the policy
pub fn set_core_state(
    platform: &dyn Platform,
    topology: &Topology,
    core: CoreId,
    online: bool,
) -> Result<()> {
    if !topology.contains(core) {
        return Err(ControlError::InvalidCore(core));
    }
    if !online && core == PRIMARY_CORE {
        return Err(ControlError::ProtectedCore(core));
    }

    if platform.is_core_online(core) == online {
        debug!("CPU {core} is already {}", if online { "online" } else { "offline" });
        return Ok(());
    }

    platform.set_core_online(core, online)?;
    info!("CPU {core} {}", if online { "on" } else { "off" });
    Ok(())
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeState {
        online: BTreeMap<CoreId, bool>,
        current: BTreeMap<CoreId, u32>,
        max: BTreeMap<CoreId, u32>,
        rejected: BTreeSet<CoreId>,
        actions: Vec<(CoreId, bool)>,
    }

    /// In-memory platform. Offline cores report no frequency, like sysfs.
    #[derive(Default)]
    pub struct FakePlatform {
        state: Mutex<FakeState>,
    }

    impl FakePlatform {
        /// `clusters` lists `(cores, max_khz)`; only CPU 0 starts online
        pub fn new(clusters: &[(std::ops::Range<CoreId>, u32)]) -> Self {
            let platform = Self::default();
            {
                let mut state = platform.state.lock().unwrap();
                for (cores, max) in clusters {
                    for core in cores.clone() {
                        state.online.insert(core, core == 0);
                        state.max.insert(core, *max);
                        state.current.insert(core, 0);
                    }
                }
            }
            platform
        }

        pub fn set_online(&self, cores: impl IntoIterator<Item = CoreId>, online: bool) {
            let mut state = self.state.lock().unwrap();
            for core in cores {
                state.online.insert(core, online);
            }
        }

        pub fn set_frequency(&self, cores: impl IntoIterator<Item = CoreId>, khz: u32) {
            let mut state = self.state.lock().unwrap();
            for core in cores {
                state.current.insert(core, khz);
            }
        }

        pub fn forget_frequency(&self, core: CoreId) {
            self.state.lock().unwrap().current.remove(&core);
        }

        pub fn forget_max_frequency(&self, core: CoreId) {
            self.state.lock().unwrap().max.remove(&core);
        }

        pub fn reject(&self, core: CoreId) {
            self.state.lock().unwrap().rejected.insert(core);
        }

        pub fn online_cores(&self) -> Vec<CoreId> {
            let state = self.state.lock().unwrap();
            state
                .online
                .iter()
                .filter(|&(_, &online)| online)
                .map(|(&core, _)| core)
                .collect()
        }

        /// Every accepted state change, in order
        pub fn actions(&self) -> Vec<(CoreId, bool)> {
            self.state.lock().unwrap().actions.clone()
        }

        pub fn clear_actions(&self) {
            self.state.lock().unwrap().actions.clear();
        }
    }

    impl Platform for FakePlatform {
        fn set_core_online(&self, core: CoreId, online: bool) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if state.rejected.contains(&core) || !state.online.contains_key(&core) {
                return Err(ControlError::WriteError(format!("CPU {core} rejected")));
            }
            state.online.insert(core, online);
            state.actions.push((core, online));
            Ok(())
        }

        fn is_core_online(&self, core: CoreId) -> bool {
            self.state.lock().unwrap().online.get(&core).copied().unwrap_or(false)
        }

        fn current_frequency(&self, core: CoreId) -> Option<u32> {
            let state = self.state.lock().unwrap();
            if !state.online.get(&core).copied().unwrap_or(false) {
                return None;
            }
            state.current.get(&core).copied()
        }

        fn max_frequency(&self, core: CoreId) -> Option<u32> {
            self.state.lock().unwrap().max.get(&core).copied()
        }
    }
}
