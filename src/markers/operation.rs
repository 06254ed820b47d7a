use crate::markers::spec::{ClusteringOptions, MarkerSpec, MarkerUpdate};

/// One typed request from the host, as queued by the readiness gate and
/// executed by the marker manager.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerOperation {
    Add {
        markers: Vec<MarkerSpec>,
        clustering: Option<ClusteringOptions>,
    },
    Update(Vec<MarkerUpdate>),
    Remove(Vec<String>),
    ClearAll,
    SetClustering(ClusteringOptions),
}

impl MarkerOperation {
    pub fn add(markers: Vec<MarkerSpec>) -> Self {
        Self::Add {
            markers,
            clustering: None,
        }
    }

    /// Method name as used on the host channel
    pub fn name(&self) -> &'static str {
        match self {
            Self::Add { .. } => "addMarkers",
            Self::Update(_) => "updateMarkers",
            Self::Remove(_) => "removeMarkers",
            Self::ClearAll => "clearAllMarkers",
            Self::SetClustering(_) => "setClusteringOptions",
        }
    }
}
