use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::audio::{AudioManager, Sound};
use crate::compiler::Compiler;
use crate::config::{RuntimeConfig, StopMode};
use crate::error::{HatchError, HatchResult};
use crate::hat::{EventPayload, Hat, KeyIndex};
use crate::lock;
use crate::project::{AssetSource, ProjectJson, TargetJson};
use crate::scheduler::{script_action, Action, Scheduler, Task};
use crate::scope::Scope;
use crate::target::{Target, TargetState};
use crate::value::Value;

/// A loaded project: its targets, the scheduler that runs their scripts and
/// the shared runtime services (audio, pointer, timer, randomness).
pub struct Environment {
    config: RuntimeConfig,
    stage: Arc<Target>,
    /// Back to front.
    sprites: Vec<Arc<Target>>,
    by_name: HashMap<String, Arc<Target>>,
    scheduler: Scheduler,
    audio: Mutex<AudioManager>,
    pointer: Mutex<(f64, f64)>,
    timer_origin: Mutex<Instant>,
    stop_epoch: AtomicU64,
    rng: Mutex<SmallRng>,
}

impl Environment {
    /// Builds every target, loads its sounds and registers its compiled hats.
    /// Any target that fails to build or compile aborts the load.
    pub fn load(
        project: &ProjectJson,
        assets: &dyn AssetSource,
        config: RuntimeConfig,
    ) -> HatchResult<Arc<Self>> {
        let stage_json = project.stage()?;
        let stage = Arc::new(build_target(stage_json, assets, None)?);
        let shared = stage.scope().clone();

        let mut loaded: Vec<(&TargetJson, Arc<Target>)> = vec![(stage_json, stage.clone())];
        for json in project.sprites() {
            let sprite = build_target(json, assets, Some(shared.clone()))?;
            loaded.push((json, Arc::new(sprite)));
        }

        let scheduler = Scheduler::new();
        let mut audio = AudioManager::default();
        let mut by_name = HashMap::new();
        for (json, target) in &loaded {
            let hats = Compiler::new(json, target.scope())
                .hats()
                .inspect_err(|e| error!("[Hatch loader] Failed to compile '{}': {e}", json.name))?;
            for (script, hat) in hats {
                scheduler.register(hat, json.name.clone(), script_action(script));
            }
            let sounds = json.sounds.iter().map(|s| Sound::load(s, assets)).collect();
            audio.register(json.name.clone(), sounds);
            by_name.insert(json.name.clone(), target.clone());
        }
        info!(
            "[Hatch loader] Loaded {} targets with {} tasks",
            loaded.len(),
            scheduler.task_count()
        );

        let sprites = loaded.into_iter().skip(1).map(|(_, t)| t).collect();
        Ok(Arc::new(Self {
            config,
            stage,
            sprites,
            by_name,
            scheduler,
            audio: Mutex::new(audio),
            pointer: Mutex::new((0.0, 0.0)),
            timer_origin: Mutex::new(Instant::now()),
            stop_epoch: AtomicU64::new(0),
            rng: Mutex::new(SmallRng::from_entropy()),
        }))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn stage(&self) -> &Arc<Target> {
        &self.stage
    }

    pub fn sprites(&self) -> &[Arc<Target>] {
        &self.sprites
    }

    pub fn target(&self, name: &str) -> Option<Arc<Target>> {
        self.by_name.get(name).cloned()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Registers a native handler next to the compiled scripts.
    pub fn register(&self, hat: Hat, target: &str, action: Action) -> HatchResult<Arc<Task>> {
        if !self.by_name.contains_key(target) {
            return Err(HatchError::UnknownTarget(target.to_string()));
        }
        Ok(self.scheduler.register(hat, target, action))
    }

    pub fn audio(&self) -> MutexGuard<'_, AudioManager> {
        lock(&self.audio)
    }

    pub fn rng(&self) -> MutexGuard<'_, SmallRng> {
        lock(&self.rng)
    }

    /// Makes `operator_random` reproducible.
    pub fn seed_random(&self, seed: u64) {
        *lock(&self.rng) = SmallRng::seed_from_u64(seed);
    }

    pub fn pointer(&self) -> (f64, f64) {
        *lock(&self.pointer)
    }

    pub fn set_pointer(&self, x: f64, y: f64) {
        *lock(&self.pointer) = (x, y);
    }

    /// Seconds since the last timer reset.
    pub fn timer(&self) -> f64 {
        lock(&self.timer_origin).elapsed().as_secs_f64()
    }

    pub fn reset_timer(&self) {
        *lock(&self.timer_origin) = Instant::now();
    }

    pub fn stop_epoch(&self) -> u64 {
        self.stop_epoch.load(Ordering::Acquire)
    }

    pub fn activate(
        self: &Arc<Self>,
        hat: &Hat,
        payload: Option<&EventPayload>,
    ) -> Vec<JoinHandle<()>> {
        self.scheduler.activate(hat, payload, self)
    }

    pub fn fire_program_start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.reset_timer();
        self.activate(&Hat::ProgramStart, None)
    }

    /// Fires the key hat for a host key code; codes outside the key table are ignored.
    pub fn key_down(self: &Arc<Self>, code: u32) -> Vec<JoinHandle<()>> {
        match KeyIndex::from_code(code) {
            Some(key) => self.activate(&Hat::KeyPressed(key), None),
            None => Vec::new(),
        }
    }

    /// Pointer press at a stage coordinate.
    pub fn pointer_down(self: &Arc<Self>, x: f64, y: f64) -> Vec<JoinHandle<()>> {
        self.set_pointer(x, y);
        self.activate(&Hat::EntityClicked, Some(&EventPayload::Point { x, y }))
    }

    pub fn broadcast(self: &Arc<Self>, message: &str) -> Vec<JoinHandle<()>> {
        self.activate(&Hat::MessageReceived(message.to_string()), None)
    }

    /// Broadcasts and waits until every unit it launched has ended.
    pub async fn broadcast_and_wait(self: &Arc<Self>, message: &str) {
        for handle in self.broadcast(message) {
            if let Err(e) = handle.await {
                debug!("[Hatch scheduler] '{message}' receiver did not complete: {e}");
            }
        }
    }

    /// Switches the backdrop and fires its hats.
    pub fn switch_backdrop(self: &Arc<Self>, which: &Value) -> Vec<JoinHandle<()>> {
        match self.stage.switch_costume(which) {
            Some(name) => self.activate(&Hat::BackdropSwitched(name), None),
            None => Vec::new(),
        }
    }

    /// "Stop all": exits the process, or with [`StopMode::Scoped`] cancels
    /// every running unit at its next suspension point.
    pub fn stop_all(&self) {
        self.audio().stop_all();
        match self.config.stop_mode {
            StopMode::Process => {
                info!("[Hatch vm] Stop all: exiting");
                std::process::exit(0);
            }
            StopMode::Scoped => {
                self.stop_epoch.fetch_add(1, Ordering::AcqRel);
                info!("[Hatch vm] Stop all: cancelling running scripts");
            }
        }
    }

    /// State of every target in draw order, stage first.
    pub fn render_list(&self) -> Vec<(String, TargetState)> {
        let mut list: Vec<_> = self
            .sprites
            .iter()
            .map(|s| (s.name().to_string(), s.state()))
            .collect();
        list.sort_by_key(|(_, state)| state.layer);
        list.insert(0, (self.stage.name().to_string(), self.stage.state()));
        list
    }
}

fn build_target(
    json: &TargetJson,
    assets: &dyn AssetSource,
    shared: Option<Arc<Scope>>,
) -> HatchResult<Target> {
    Target::from_json(json, assets, shared)
        .inspect_err(|e| error!("[Hatch loader] Failed to load '{}': {e}", json.name))
}
