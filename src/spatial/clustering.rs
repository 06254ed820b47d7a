use fxhash::FxHashMap;

use crate::core::geo::LatLng;
use crate::markers::spec::ClusteringOptions;

/// A group of markers that render as one symbol at a given zoom
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Unique identifier for the cluster
    pub id: String,
    /// Mean position of the members
    pub center: LatLng,
    /// Marker ids, sorted
    pub members: Vec<String>,
    /// Zoom level at which this cluster was created
    pub zoom_level: f64,
}

impl Cluster {
    fn new(id: String, mut items: Vec<(&str, LatLng)>, zoom_level: f64) -> Self {
        items.sort_by(|a, b| a.0.cmp(b.0));
        let count = items.len().max(1) as f64;
        let (lat, lng) = items
            .iter()
            .fold((0.0, 0.0), |(lat, lng), (_, p)| (lat + p.lat, lng + p.lng));

        Self {
            id,
            center: LatLng::new(lat / count, lng / count),
            members: items.into_iter().map(|(id, _)| id.to_string()).collect(),
            zoom_level,
        }
    }

    fn single(marker_id: &str, position: LatLng, zoom_level: f64) -> Self {
        Self::new(
            format!("single_{}", marker_id),
            vec![(marker_id, position)],
            zoom_level,
        )
    }

    /// Get the number of markers in the cluster
    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// Check if this is a single-marker cluster
    pub fn is_single(&self) -> bool {
        self.members.len() == 1
    }

    pub fn contains(&self, marker_id: &str) -> bool {
        self.members.iter().any(|id| id == marker_id)
    }
}

/// Grid-based clustering of marker positions.
///
/// Markers are projected to world pixels at `zoom` and bucketed into square
/// cells `cluster_radius` pixels wide. At or above `max_zoom`, or when
/// clustering is disabled, every marker is its own cluster. Output is
/// sorted by cluster id.
pub fn cluster_markers<'a, I>(markers: I, options: &ClusteringOptions, zoom: f64) -> Vec<Cluster>
where
    I: IntoIterator<Item = (&'a str, LatLng)>,
{
    let mut clusters: Vec<Cluster> = if !options.clusters_at(zoom) {
        markers
            .into_iter()
            .map(|(id, position)| Cluster::single(id, position, zoom))
            .collect()
    } else {
        let grid_size = options.cluster_radius as f64;
        let mut grid: FxHashMap<(i64, i64), Vec<(&str, LatLng)>> = FxHashMap::default();

        for (id, position) in markers {
            let pixel = position.project(zoom);
            let cell = (
                (pixel.x / grid_size).floor() as i64,
                (pixel.y / grid_size).floor() as i64,
            );
            grid.entry(cell).or_default().push((id, position));
        }

        grid.into_iter()
            .map(|((grid_x, grid_y), items)| {
                if items.len() == 1 {
                    Cluster::single(items[0].0, items[0].1, zoom)
                } else {
                    Cluster::new(format!("cluster_{}_{}", grid_x, grid_y), items, zoom)
                }
            })
            .collect()
    };

    clusters.sort_by(|a, b| a.id.cmp(&b.id));
    clusters
}
