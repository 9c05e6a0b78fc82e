use crate::config::AppConfig;
use crate::core::{CoreId, DisplayEvent, EngineState};
use crate::cpu::Platform;
use crate::engine::Engine;
use crate::topology::{PRIMARY_CORE, Topology};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Everything that can change the controller's state. Producers (display
/// watcher, config watcher, signal handler) send these over one channel and
/// the controller applies them one at a time.
#[derive(Debug)]
pub enum Command {
    Display(DisplayEvent),
    Reload(Box<AppConfig>),
    AllCoresUp,
    Shutdown,
}

/// Deadline of the next decision tick. A deadline that passes while the
/// controller is busy fires once; missed firings are never queued up.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickSchedule {
    deadline: Option<Instant>,
}

impl TickSchedule {
    pub fn arm(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub const fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }

    pub fn time_until(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }
}

pub struct Controller {
    platform: Box<dyn Platform + Send>,
    topology: Topology,
    config: AppConfig,
    engine: Engine,
    state: EngineState,
    enabled: bool,
    schedule: TickSchedule,
    deferred: VecDeque<Command>,
}

impl Controller {
    /// The first tick is armed after the configured start-up delay
    pub fn new(platform: Box<dyn Platform + Send>, topology: Topology, config: AppConfig) -> Self {
        let enabled = config.hotplug.enabled;
        let mut schedule = TickSchedule::default();
        if enabled {
            schedule.arm(Duration::from_millis(config.hotplug.startup_delay_ms));
        }

        Self {
            platform,
            topology,
            config,
            engine: Engine::new(),
            state: EngineState::Active,
            enabled,
            schedule,
            deferred: VecDeque::new(),
        }
    }

    pub const fn state(&self) -> EngineState {
        self.state
    }

    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub const fn schedule(&self) -> &TickSchedule {
        &self.schedule
    }

    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    pub const fn topology(&self) -> &Topology {
        &self.topology
    }

    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn online_cores(&self) -> Vec<CoreId> {
        self.topology
            .cores()
            .filter(|&core| self.platform.is_core_online(core))
            .collect()
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.config.hotplug.delay_ms)
    }

    /// Next one-shot command queued by the controller itself
    pub fn take_deferred(&mut self) -> Option<Command> {
        self.deferred.pop_front()
    }

    pub fn handle(&mut self, command: Command) -> ControlFlow<()> {
        debug!("Handling {command:?}");
        match command {
            Command::Display(DisplayEvent::Off) => self.suspend(),
            Command::Display(DisplayEvent::On) => self.resume(),
            Command::Reload(config) => self.apply_config(*config),
            Command::AllCoresUp => {
                self.all_cores_up();
            }
            Command::Shutdown => {
                self.shutdown();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Run one decision tick if the engine is active, then re-arm the schedule
    pub fn fire_tick(&mut self) -> usize {
        self.schedule.cancel();
        if self.state != EngineState::Active || !self.enabled {
            return 0;
        }

        let actions = self
            .engine
            .tick(self.platform.as_ref(), &self.topology, &self.config);
        self.schedule.arm(self.tick_interval());
        actions
    }

    /// Display off: collapse to CPU 0 and stop ticking
    pub fn suspend(&mut self) {
        self.schedule.cancel();

        let cores: Vec<CoreId> = self.topology.cores().rev().collect();
        for core in cores {
            if core == PRIMARY_CORE || !self.platform.is_core_online(core) {
                continue;
            }
            self.engine.switch_core(self.platform.as_ref(), core, false);
        }

        self.state = EngineState::Suspended;
        info!("Suspended");
    }

    /// Display on: restore every core, then resume ticking if enabled
    pub fn resume(&mut self) {
        self.deferred.push_back(Command::AllCoresUp);
        if self.enabled {
            self.schedule.arm(self.tick_interval());
        }

        self.state = EngineState::Active;
        info!("Resumed");
    }

    /// Operator switch. Disabling only stops the tick; enabling restores all
    /// cores first. While suspended, only the flag changes.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;

        if enabled {
            if self.state == EngineState::Active {
                self.deferred.push_back(Command::AllCoresUp);
                self.schedule.arm(self.tick_interval());
            }
            info!("Enabled");
        } else {
            self.schedule.cancel();
            info!("Disabled");
        }
    }

    /// New tunables apply from the next tick on
    pub fn apply_config(&mut self, config: AppConfig) {
        let enabled = config.hotplug.enabled;
        self.config = config;
        self.set_enabled(enabled);
    }

    /// Bring every offline core online, ignoring load. Returns how many came up.
    pub fn all_cores_up(&mut self) -> usize {
        let cores: Vec<CoreId> = self.topology.cores().collect();
        cores
            .into_iter()
            .filter(|&core| !self.platform.is_core_online(core))
            .filter(|&core| self.engine.switch_core(self.platform.as_ref(), core, true))
            .count()
    }

    pub fn shutdown(&mut self) {
        self.schedule.cancel();
        if self.config.daemon.restore_on_exit {
            let restored = self.all_cores_up();
            debug!("Restored {restored} cores before exit");
        }
        info!("Controller stopped");
    }
}

/// Serve commands until `Shutdown` arrives or every sender is gone, firing
/// ticks whenever the schedule is due. `on_step` runs after every iteration.
pub fn run_controller(
    mut controller: Controller,
    rx: &Receiver<Command>,
    mut on_step: impl FnMut(&Controller),
) -> Controller {
    loop {
        while let Some(command) = controller.take_deferred() {
            if controller.handle(command).is_break() {
                return controller;
            }
        }

        let received = match controller.schedule().time_until(Instant::now()) {
            Some(wait) => rx.recv_timeout(wait),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(command) => {
                if controller.handle(command).is_break() {
                    on_step(&controller);
                    return controller;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Command channel closed, stopping controller");
                controller.shutdown();
                return controller;
            }
        }

        if controller.schedule().is_due(Instant::now()) {
            controller.fire_tick();
        }

        on_step(&controller);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::fake::FakePlatform;
    use std::sync::Arc;
    use std::sync::mpsc::channel;
    use std::thread;

    fn controller_with(config: AppConfig) -> (Arc<FakePlatform>, Controller) {
        let platform = Arc::new(FakePlatform::new(&[(0..4, 2_000), (4..8, 2_800)]));
        let topology = Topology::new(vec![(0..4).collect(), (4..8).collect()]).unwrap();
        let controller = Controller::new(Box::new(Arc::clone(&platform)), topology, config);
        (platform, controller)
    }

    fn drain(controller: &mut Controller) {
        while let Some(command) = controller.take_deferred() {
            let _ = controller.handle(command);
        }
    }

    #[test]
    fn arms_start_up_delay_only_when_enabled() {
        let (_, controller) = controller_with(AppConfig::default());
        assert!(controller.schedule().is_armed());
        let wait = controller.schedule().time_until(Instant::now()).unwrap();
        assert!(wait > Duration::from_secs(19));

        let mut config = AppConfig::default();
        config.hotplug.enabled = false;
        let (_, controller) = controller_with(config);
        assert!(!controller.schedule().is_armed());
    }

    #[test]
    fn suspend_collapses_to_primary_core_idempotently() {
        let (platform, mut controller) = controller_with(AppConfig::default());
        platform.set_online(0..8, true);

        controller.suspend();
        assert_eq!(platform.online_cores(), vec![0]);
        assert_eq!(
            platform.actions().iter().map(|&(core, _)| core).collect::<Vec<_>>(),
            vec![7, 6, 5, 4, 3, 2, 1]
        );
        assert_eq!(controller.state(), EngineState::Suspended);
        assert!(!controller.schedule().is_armed());

        platform.clear_actions();
        controller.suspend();
        assert_eq!(platform.online_cores(), vec![0]);
        assert!(platform.actions().is_empty());
        assert_eq!(controller.engine().stats().times_hotplugged(4), 1);
    }

    #[test]
    fn rejected_offline_does_not_abort_suspend() {
        let (platform, mut controller) = controller_with(AppConfig::default());
        platform.set_online(0..8, true);
        platform.reject(5);

        controller.suspend();
        assert_eq!(platform.online_cores(), vec![0, 5]);
    }

    #[test]
    fn resume_restores_every_core_and_ticking() {
        let (platform, mut controller) = controller_with(AppConfig::default());
        platform.set_online([2, 5], true);
        controller.suspend();

        let _ = controller.handle(Command::Display(DisplayEvent::On));
        drain(&mut controller);

        assert_eq!(platform.online_cores(), (0..8).collect::<Vec<_>>());
        assert_eq!(controller.state(), EngineState::Active);
        let wait = controller.schedule().time_until(Instant::now()).unwrap();
        assert!(wait <= Duration::from_millis(20));
    }

    #[test]
    fn resume_while_disabled_does_not_tick() {
        let mut config = AppConfig::default();
        config.hotplug.enabled = false;
        let (platform, mut controller) = controller_with(config);

        let _ = controller.handle(Command::Display(DisplayEvent::Off));
        let _ = controller.handle(Command::Display(DisplayEvent::On));
        drain(&mut controller);

        assert_eq!(platform.online_cores().len(), 8);
        assert!(!controller.schedule().is_armed());
        assert_eq!(controller.fire_tick(), 0);
    }

    #[test]
    fn disable_keeps_cores_and_enable_restores_them() {
        let (platform, mut controller) = controller_with(AppConfig::default());
        platform.set_online([1, 4], true);

        controller.set_enabled(false);
        drain(&mut controller);
        assert_eq!(platform.online_cores(), vec![0, 1, 4]);
        assert!(!controller.schedule().is_armed());
        assert!(!controller.is_enabled());

        controller.set_enabled(true);
        drain(&mut controller);
        assert_eq!(platform.online_cores().len(), 8);
        assert!(controller.schedule().is_armed());
    }

    #[test]
    fn enable_while_suspended_waits_for_resume() {
        let mut config = AppConfig::default();
        config.hotplug.enabled = false;
        let (platform, mut controller) = controller_with(config);
        controller.suspend();

        controller.set_enabled(true);
        drain(&mut controller);
        assert_eq!(platform.online_cores(), vec![0]);
        assert!(!controller.schedule().is_armed());

        controller.resume();
        assert!(controller.schedule().is_armed());
    }

    #[test]
    fn ticks_only_while_active_and_rearm() {
        let (platform, mut controller) = controller_with(AppConfig::default());
        platform.set_frequency([0], 1_900);

        assert_eq!(controller.fire_tick(), 1);
        assert!(controller.schedule().is_armed());
        assert_eq!(controller.engine().counter().get(), 0);

        controller.suspend();
        assert_eq!(controller.fire_tick(), 0);
        assert!(!controller.schedule().is_armed());
        assert_eq!(platform.online_cores(), vec![0]);
    }

    #[test]
    fn reload_applies_tunables_and_operator_switch() {
        let (_, mut controller) = controller_with(AppConfig::default());

        let mut config = AppConfig::default();
        config.hotplug.enabled = false;
        config.hotplug.cycle_up = 5;
        let _ = controller.handle(Command::Reload(Box::new(config)));

        assert!(!controller.is_enabled());
        assert_eq!(controller.config().hotplug.cycle_up, 5);
        assert!(!controller.schedule().is_armed());
    }

    #[test]
    fn shutdown_restores_cores_when_configured() {
        let (platform, mut controller) = controller_with(AppConfig::default());
        assert!(controller.handle(Command::Shutdown).is_break());
        assert_eq!(platform.online_cores().len(), 8);

        let mut config = AppConfig::default();
        config.daemon.restore_on_exit = false;
        let (platform, mut controller) = controller_with(config);
        assert!(controller.handle(Command::Shutdown).is_break());
        assert_eq!(platform.online_cores(), vec![0]);
    }

    #[test]
    fn queued_commands_are_applied_in_order() {
        let (platform, controller) = controller_with(AppConfig::default());
        let (tx, rx) = channel();
        tx.send(Command::Display(DisplayEvent::Off)).unwrap();
        tx.send(Command::Display(DisplayEvent::On)).unwrap();
        tx.send(Command::Shutdown).unwrap();

        let controller = run_controller(controller, &rx, |_| {});
        assert_eq!(controller.state(), EngineState::Active);
        assert_eq!(platform.online_cores().len(), 8);
        assert!(!controller.schedule().is_armed());
    }

    #[test]
    fn display_off_during_ticking_then_back_on() {
        let mut config = AppConfig::default();
        config.hotplug.startup_delay_ms = 0;
        config.hotplug.delay_ms = 1;
        let (platform, controller) = controller_with(config);
        platform.set_frequency(0..4, 1_900);
        platform.set_frequency(4..8, 2_700);

        let (tx, rx) = channel();
        let (step_tx, step_rx) = channel();
        let worker = thread::spawn(move || {
            run_controller(controller, &rx, move |c| {
                let _ = step_tx.send((c.state(), c.online_cores()));
            })
        });

        let wait_for = |wanted: &dyn Fn(EngineState, &[CoreId]) -> bool| {
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if let Ok((state, online)) = step_rx.recv_timeout(Duration::from_millis(100)) {
                    if wanted(state, &online) {
                        return true;
                    }
                }
            }
            false
        };

        // Let the policy grow at least one core before the display goes off
        assert!(wait_for(&|_, online| online.len() > 1));

        tx.send(Command::Display(DisplayEvent::Off)).unwrap();
        assert!(wait_for(&|state, _| state == EngineState::Suspended));
        assert_eq!(platform.online_cores(), vec![0]);

        tx.send(Command::Display(DisplayEvent::On)).unwrap();
        assert!(wait_for(&|state, online| {
            state == EngineState::Active && online.len() == 8
        }));

        tx.send(Command::Shutdown).unwrap();
        let controller = worker.join().unwrap();
        assert!(!controller.schedule().is_armed());
        assert_eq!(platform.online_cores().len(), 8);
    }
}
