//! Render-thread executor.
//!
//! A single task owns the [`MapSurface`] and drains an ordered command
//! channel; every annotation mutation in the crate is marshalled onto it
//! through a cloneable [`SurfaceHandle`]. The worker keys annotations by
//! marker id, so commands addressed to a marker that was removed or
//! cleared in the meantime are no-ops.

use fxhash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::core::geo::LatLng;
use crate::icons::cache::MarkerBitmap;
use crate::markers::spec::ClusteringOptions;
use crate::surface::adapter::{Annotation, AnnotationHandle, MapSurface};
use crate::{runtime, MarkerError, Result};

/// Reply to an attach, resolved once the worker has processed it
pub type PendingAttach = oneshot::Receiver<Result<AnnotationHandle>>;

enum SurfaceCommand {
    Initialize {
        reply: oneshot::Sender<Result<()>>,
    },
    Attach {
        annotation: Annotation,
        reply: oneshot::Sender<Result<AnnotationHandle>>,
    },
    Move {
        marker_id: String,
        position: LatLng,
    },
    SetImage {
        marker_id: String,
        image: MarkerBitmap,
    },
    Detach {
        marker_ids: Vec<String>,
    },
    DetachAll,
    Configure {
        options: ClusteringOptions,
    },
    Barrier {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

struct Attached {
    handle: AnnotationHandle,
    annotation: Annotation,
}

pub struct SurfaceWorker {
    surface: Box<dyn MapSurface>,
    attached: FxHashMap<String, Attached>,
    commands: mpsc::UnboundedReceiver<SurfaceCommand>,
}

impl SurfaceWorker {
    /// Move `surface` onto its own task. The join handle yields the surface
    /// back once every handle is dropped or [`SurfaceHandle::shutdown`] is
    /// called.
    pub fn spawn(surface: Box<dyn MapSurface>) -> (SurfaceHandle, JoinHandle<Box<dyn MapSurface>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Self {
            surface,
            attached: FxHashMap::default(),
            commands: rx,
        };
        (SurfaceHandle { commands: tx }, runtime::spawn(worker.run()))
    }

    async fn run(mut self) -> Box<dyn MapSurface> {
        while let Some(command) = self.commands.recv().await {
            if !self.handle(command) {
                break;
            }
        }
        log::debug!("surface worker stopped with {} annotations", self.attached.len());
        self.surface
    }

    fn handle(&mut self, command: SurfaceCommand) -> bool {
        match command {
            SurfaceCommand::Initialize { reply } => {
                let _ = reply.send(self.surface.initialize());
            }
            SurfaceCommand::Attach { annotation, reply } => {
                let _ = reply.send(self.attach(annotation));
            }
            SurfaceCommand::Move {
                marker_id,
                position,
            } => self.move_annotation(&marker_id, position),
            SurfaceCommand::SetImage { marker_id, image } => self.set_image(&marker_id, image),
            SurfaceCommand::Detach { marker_ids } => {
                for marker_id in marker_ids {
                    self.detach(&marker_id);
                }
            }
            SurfaceCommand::DetachAll => self.detach_all(),
            SurfaceCommand::Configure { options } => {
                if let Err(e) = self.surface.set_clustering(&options) {
                    log::warn!("failed to apply clustering options: {}", e);
                }
            }
            SurfaceCommand::Barrier { reply } => {
                let _ = reply.send(());
            }
            SurfaceCommand::Shutdown => return false,
        }
        true
    }

    fn attach(&mut self, annotation: Annotation) -> Result<AnnotationHandle> {
        // Replace rather than duplicate
        self.detach(&annotation.marker_id);
        let handle = self.surface.add_annotation(&annotation)?;
        self.attached.insert(
            annotation.marker_id.clone(),
            Attached { handle, annotation },
        );
        Ok(handle)
    }

    fn move_annotation(&mut self, marker_id: &str, position: LatLng) {
        let Some(entry) = self.attached.get_mut(marker_id) else {
            log::debug!("move for detached marker {} ignored", marker_id);
            return;
        };
        entry.annotation.position = position;
        if let Err(e) = self.surface.move_annotation(entry.handle, position) {
            log::warn!("moving {} failed ({}), recreating annotation", marker_id, e);
            self.recreate(marker_id);
        }
    }

    fn set_image(&mut self, marker_id: &str, image: MarkerBitmap) {
        let Some(entry) = self.attached.get_mut(marker_id) else {
            log::debug!("image for detached marker {} ignored", marker_id);
            return;
        };
        entry.annotation.image = image;
        if let Err(e) = self.surface.set_annotation_image(entry.handle, &entry.annotation.image) {
            log::warn!("image swap on {} failed ({}), recreating annotation", marker_id, e);
            self.recreate(marker_id);
        }
    }

    /// Detach and re-add from the last known annotation state
    fn recreate(&mut self, marker_id: &str) {
        let Some(entry) = self.attached.remove(marker_id) else {
            return;
        };
        if let Err(e) = self.surface.remove_annotation(entry.handle) {
            log::debug!("removing stale {} failed: {}", entry.handle, e);
        }
        match self.surface.add_annotation(&entry.annotation) {
            Ok(handle) => {
                self.attached.insert(
                    marker_id.to_string(),
                    Attached {
                        handle,
                        annotation: entry.annotation,
                    },
                );
            }
            Err(e) => log::error!("could not recreate annotation for {}: {}", marker_id, e),
        }
    }

    fn detach(&mut self, marker_id: &str) {
        if let Some(entry) = self.attached.remove(marker_id) {
            if let Err(e) = self.surface.remove_annotation(entry.handle) {
                log::warn!("failed to remove {} for {}: {}", entry.handle, marker_id, e);
            }
        }
    }

    fn detach_all(&mut self) {
        if let Err(e) = self.surface.remove_all() {
            log::warn!("bulk removal failed ({}), removing individually", e);
            for (_, entry) in self.attached.drain() {
                let _ = self.surface.remove_annotation(entry.handle);
            }
        }
        self.attached.clear();
    }
}

/// Cloneable sender side of a surface worker.
///
/// Enqueueing never blocks, so it is safe to call while holding the marker
/// store lock; that is what keeps surface commands in store order.
#[derive(Clone)]
pub struct SurfaceHandle {
    commands: mpsc::UnboundedSender<SurfaceCommand>,
}

impl SurfaceHandle {
    fn send(&self, command: SurfaceCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| MarkerError::SurfaceUnavailable("surface worker stopped".into()))
    }

    async fn reply<T>(receiver: oneshot::Receiver<T>) -> Result<T> {
        receiver
            .await
            .map_err(|_| MarkerError::SurfaceUnavailable("surface worker dropped a reply".into()))
    }

    pub async fn initialize(&self) -> Result<()> {
        let (reply, receiver) = oneshot::channel();
        self.send(SurfaceCommand::Initialize { reply })?;
        Self::reply(receiver).await?
    }

    /// Enqueue an attach and return a receiver for its handle
    pub fn attach(&self, annotation: Annotation) -> Result<PendingAttach> {
        let (reply, receiver) = oneshot::channel();
        self.send(SurfaceCommand::Attach { annotation, reply })?;
        Ok(receiver)
    }

    pub fn move_to(&self, marker_id: &str, position: LatLng) -> Result<()> {
        self.send(SurfaceCommand::Move {
            marker_id: marker_id.to_string(),
            position,
        })
    }

    pub fn set_image(&self, marker_id: &str, image: MarkerBitmap) -> Result<()> {
        self.send(SurfaceCommand::SetImage {
            marker_id: marker_id.to_string(),
            image,
        })
    }

    pub fn detach(&self, marker_ids: Vec<String>) -> Result<()> {
        self.send(SurfaceCommand::Detach { marker_ids })
    }

    pub fn detach_all(&self) -> Result<()> {
        self.send(SurfaceCommand::DetachAll)
    }

    pub fn configure(&self, options: ClusteringOptions) -> Result<()> {
        self.send(SurfaceCommand::Configure { options })
    }

    /// Resolves once every command enqueued before it has been applied
    pub async fn barrier(&self) -> Result<()> {
        let (reply, receiver) = oneshot::channel();
        self.send(SurfaceCommand::Barrier { reply })?;
        Self::reply(receiver).await
    }

    /// Stop the worker after the commands already queued
    pub fn shutdown(&self) {
        let _ = self.send(SurfaceCommand::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}
