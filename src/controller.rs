//! Per-surface entry point: the readiness gate in front of a
//! [`MarkerManager`].
//!
//! Operations submitted before the map surface is attached and its style
//! loaded are queued in arrival order. Once both signals are in, the
//! surface is initialized with bounded retries, the queue is drained, and
//! the gate opens. The queue is capped; beyond the cap submissions fail
//! with [`MarkerError::QueueFull`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::core::config::MarkerOptions;
use crate::icons::{AssetSource, AvatarComposer, IconResolver, ImageFetcher};
use crate::markers::{
    ClusteringOptions, MarkerManager, MarkerOperation, MarkerSpec, MarkerState, MarkerUpdate,
};
use crate::surface::{MapSurface, ReadinessState, RetryPolicy, SurfaceWorker};
use crate::{runtime, MarkerError, Result};

struct Gate {
    state: ReadinessState,
    state_tx: watch::Sender<ReadinessState>,
    /// Attached but not yet handed to a worker
    surface: Option<Box<dyn MapSurface>>,
    style_ready: bool,
    pending: VecDeque<MarkerOperation>,
    manager: Option<MarkerManager>,
    /// Bumped on detach so in-flight initialization stands down
    generation: u64,
}

impl Gate {
    fn transition(&mut self, state: ReadinessState) {
        if self.state != state {
            log::info!("marker surface {} -> {}", self.state, state);
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }
}

struct ControllerInner {
    options: MarkerOptions,
    icons: Arc<IconResolver>,
    avatars: Arc<AvatarComposer>,
    gate: Mutex<Gate>,
}

/// Marker controller for one map surface instance. Cheap to clone.
#[derive(Clone)]
pub struct MarkerController {
    inner: Arc<ControllerInner>,
}

impl MarkerController {
    /// Controller fetching network images over HTTP with no bundled assets
    pub fn new(options: MarkerOptions) -> Self {
        let icons = Arc::new(IconResolver::with_capacity(options.cache.icon_capacity));
        Self::with_resolver(options, icons)
    }

    pub fn with_sources(
        options: MarkerOptions,
        fetcher: Arc<dyn ImageFetcher>,
        assets: Arc<dyn AssetSource>,
    ) -> Self {
        let icons = Arc::new(IconResolver::new(
            options.cache.icon_capacity,
            fetcher,
            assets,
        ));
        Self::with_resolver(options, icons)
    }

    fn with_resolver(options: MarkerOptions, icons: Arc<IconResolver>) -> Self {
        let avatars = Arc::new(AvatarComposer::new(
            options.cache.avatar_capacity,
            icons.clone(),
        ));
        let (state_tx, _) = watch::channel(ReadinessState::NotReady);
        Self {
            inner: Arc::new(ControllerInner {
                options,
                icons,
                avatars,
                gate: Mutex::new(Gate {
                    state: ReadinessState::NotReady,
                    state_tx,
                    surface: None,
                    style_ready: false,
                    pending: VecDeque::new(),
                    manager: None,
                    generation: 0,
                }),
            }),
        }
    }

    /// Options handed to every manager this controller creates
    pub fn options(&self) -> &MarkerOptions {
        &self.inner.options
    }

    /// Icon resolver shared across surfaces; survives detach
    pub fn icons(&self) -> &Arc<IconResolver> {
        &self.inner.icons
    }

    /// Avatar composer shared across surfaces; survives detach
    pub fn avatars(&self) -> &Arc<AvatarComposer> {
        &self.inner.avatars
    }

    /// The map surface exists. Must be called within a tokio runtime.
    /// Replaces any surface attached earlier.
    pub fn attach_surface(&self, surface: Box<dyn MapSurface>) {
        let previous = {
            let mut gate = self.inner.gate();
            let previous = gate.manager.take();
            if previous.is_some() || gate.state == ReadinessState::Initializing {
                gate.generation += 1;
                gate.transition(ReadinessState::NotReady);
            }
            gate.surface = Some(surface);
            previous
        };
        if let Some(manager) = previous {
            manager.shutdown();
        }
        self.inner.maybe_initialize();
    }

    /// The surface's style finished loading. Also retries initialization
    /// after the gate became unavailable.
    pub fn style_loaded(&self) {
        self.inner.gate().style_ready = true;
        self.inner.maybe_initialize();
    }

    /// The surface is gone. Markers are dropped, queued operations are kept
    /// for the next surface.
    pub fn detach_surface(&self) {
        let manager = {
            let mut gate = self.inner.gate();
            gate.generation += 1;
            gate.style_ready = false;
            gate.surface = None;
            gate.transition(ReadinessState::NotReady);
            gate.manager.take()
        };
        if let Some(manager) = manager {
            manager.shutdown();
        }
    }

    /// Current gate state
    pub fn readiness(&self) -> ReadinessState {
        self.inner.gate().state
    }

    /// Wait until the gate is ready or has given up
    pub async fn wait_for_readiness(&self) -> ReadinessState {
        let mut state = self.inner.gate().state_tx.subscribe();
        let settled = state
            .wait_for(|s| matches!(s, ReadinessState::Ready | ReadinessState::Unavailable))
            .await
            .map(|s| *s);
        settled.unwrap_or_else(|_| self.readiness())
    }

    /// Operations queued until the surface is ready
    pub fn pending_operations(&self) -> usize {
        self.inner.gate().pending.len()
    }

    /// The active manager, once the gate is ready
    pub fn manager(&self) -> Option<MarkerManager> {
        self.inner.gate().manager.clone()
    }

    /// Current markers, sorted by id; empty until ready
    pub fn snapshot(&self) -> Vec<MarkerState> {
        self.manager().map(|m| m.markers()).unwrap_or_default()
    }

    /// Wait for in-flight work on the active manager to reach the surface
    pub async fn settle(&self) -> Result<()> {
        match self.manager() {
            Some(manager) => manager.settle().await,
            None => Ok(()),
        }
    }

    /// Apply an operation now, or queue it until the surface is ready
    pub async fn submit(&self, operation: MarkerOperation) -> Result<()> {
        let manager = {
            let mut gate = self.inner.gate();
            match (&gate.state, &gate.manager) {
                (ReadinessState::Ready, Some(manager)) => manager.clone(),
                _ => {
                    let cap = self.inner.options.readiness.max_pending_operations;
                    if gate.pending.len() >= cap {
                        log::warn!(
                            "dropping {}: {} operations already queued while {}",
                            operation.name(),
                            cap,
                            gate.state
                        );
                        return Err(MarkerError::QueueFull(cap));
                    }
                    log::debug!("queueing {} while surface is {}", operation.name(), gate.state);
                    gate.pending.push_back(operation);
                    return Ok(());
                }
            }
        };
        manager.execute(operation).await
    }

    /// [`submit`](Self::submit) reduced to the host acknowledgement
    pub async fn acknowledge(&self, operation: MarkerOperation) -> bool {
        let name = operation.name();
        match self.submit(operation).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("{} failed: {}", name, e);
                false
            }
        }
    }

    pub async fn add_markers(
        &self,
        markers: Vec<MarkerSpec>,
        clustering: Option<ClusteringOptions>,
    ) -> bool {
        self.acknowledge(MarkerOperation::Add {
            markers,
            clustering,
        })
        .await
    }

    pub async fn update_markers(&self, updates: Vec<MarkerUpdate>) -> bool {
        self.acknowledge(MarkerOperation::Update(updates)).await
    }

    pub async fn remove_markers(&self, ids: Vec<String>) -> bool {
        self.acknowledge(MarkerOperation::Remove(ids)).await
    }

    pub async fn clear_all_markers(&self) -> bool {
        self.acknowledge(MarkerOperation::ClearAll).await
    }

    pub async fn set_clustering_options(&self, options: ClusteringOptions) -> bool {
        self.acknowledge(MarkerOperation::SetClustering(options)).await
    }
}

impl ControllerInner {
    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn maybe_initialize(self: &Arc<Self>) {
        let (surface, generation) = {
            let mut gate = self.gate();
            let idle = matches!(
                gate.state,
                ReadinessState::NotReady | ReadinessState::Unavailable
            );
            if !gate.style_ready || !idle {
                return;
            }
            let Some(surface) = gate.surface.take() else {
                return;
            };
            gate.transition(ReadinessState::Initializing);
            (surface, gate.generation)
        };

        let inner = self.clone();
        runtime::spawn(async move { inner.initialize(surface, generation).await });
    }

    async fn initialize(self: Arc<Self>, surface: Box<dyn MapSurface>, generation: u64) {
        let (handle, worker) = SurfaceWorker::spawn(surface);
        let policy = RetryPolicy::from(&self.options.readiness);

        let attempt = policy
            .run(|number| {
                let handle = handle.clone();
                async move {
                    log::debug!("initializing map surface, attempt {}", number);
                    handle.initialize().await
                }
            })
            .await;

        if let Err(e) = attempt {
            log::error!(
                "map surface unavailable after {} attempts: {}",
                policy.max_attempts,
                e
            );
            handle.shutdown();
            let surface = worker.await.ok();
            let mut gate = self.gate();
            if gate.generation == generation {
                gate.transition(ReadinessState::Unavailable);
                // Keep the surface so a later style signal can retry
                if gate.surface.is_none() {
                    gate.surface = surface;
                }
            }
            return;
        }

        let manager = MarkerManager::new(
            self.options.clone(),
            handle,
            self.icons.clone(),
            self.avatars.clone(),
        );

        loop {
            let next = {
                let mut gate = self.gate();
                if gate.generation != generation {
                    drop(gate);
                    manager.shutdown();
                    return;
                }
                match gate.pending.pop_front() {
                    Some(operation) => operation,
                    None => {
                        gate.manager = Some(manager);
                        gate.transition(ReadinessState::Ready);
                        return;
                    }
                }
            };
            let name = next.name();
            if let Err(e) = manager.execute(next).await {
                log::warn!("queued {} failed: {}", name, e);
            }
        }
    }
}
