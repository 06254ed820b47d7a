//! Marker descriptions as they arrive from the host, decoded from loosely
//! typed JSON maps.
//!
//! Decoding is tolerant per entry: one malformed marker is skipped with a
//! warning while the rest of the batch proceeds.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::constants::{
    DEFAULT_CLUSTER_MAX_ZOOM, DEFAULT_CLUSTER_RADIUS, DEFAULT_ICON_SIZE, MAX_ICON_DIMENSION,
};
use crate::core::geo::LatLng;
use crate::icons::source::{clamp_dimension, IconRequest, IconSource, MarkerColor};
use crate::{MarkerError, Result};

/// Full description of a marker to create
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSpec {
    pub id: String,
    pub position: LatLng,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub icon_source: IconSource,
    pub icon_data: Option<String>,
    /// Takes rendering priority over the icon source when non-empty
    pub avatar_url: Option<String>,
    pub width: u32,
    pub height: u32,
    pub color: Option<MarkerColor>,
}

impl MarkerSpec {
    pub fn new(id: impl Into<String>, position: LatLng) -> Self {
        Self {
            id: id.into(),
            position,
            title: None,
            subtitle: None,
            icon_source: IconSource::DefaultIcon,
            icon_data: None,
            avatar_url: None,
            width: DEFAULT_ICON_SIZE.0,
            height: DEFAULT_ICON_SIZE.1,
            color: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    pub fn with_icon(mut self, source: IconSource, data: impl Into<String>) -> Self {
        self.icon_source = source;
        self.icon_data = Some(data.into());
        self
    }

    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }

    /// Icon size, clamped to `1..=MAX_ICON_DIMENSION`
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = clamp_dimension(width);
        self.height = clamp_dimension(height);
        self
    }

    pub fn with_color(mut self, color: MarkerColor) -> Self {
        self.color = Some(color);
        self
    }

    /// Marker implied by an update for an id that does not exist yet
    pub fn from_update(update: &MarkerUpdate) -> Self {
        let mut spec = Self::new(update.id.clone(), update.position);
        spec.avatar_url = update.avatar_url.clone();
        spec
    }

    /// The avatar URL, if set and non-empty
    pub fn avatar(&self) -> Option<&str> {
        self.avatar_url.as_deref().filter(|url| !url.is_empty())
    }

    pub fn icon_request(&self) -> IconRequest {
        IconRequest::new(self.icon_source, self.icon_data.clone())
            .with_size(self.width, self.height)
            .with_color(self.color)
    }

    /// Avatars are square; use the larger requested dimension
    pub fn avatar_size(&self) -> u32 {
        clamp_dimension(self.width.max(self.height))
    }

    /// Decode one marker map. `id`, `latitude` and `longitude` are required.
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| MarkerError::InvalidMarker("marker is not a map".into()))?;

        let id = required_id(value)?;
        let position = required_position(value, &id)?;
        let mut spec = Self::new(id, position);

        spec.title = string_field(map.get("title"));
        spec.subtitle = string_field(map.get("subtitle"));
        spec.icon_data = string_field(map.get("iconData"));
        spec.avatar_url = string_field(map.get("avatarUrl"));

        if let Some(name) = map.get("iconSource").and_then(Value::as_str) {
            spec.icon_source = IconSource::from_name(name).unwrap_or_else(|| {
                log::warn!("marker {}: unknown iconSource {:?}, using default", spec.id, name);
                IconSource::DefaultIcon
            });
        }
        let has_payload = spec.icon_data.as_deref().is_some_and(|d| !d.is_empty());
        if spec.icon_source.needs_payload() && !has_payload {
            log::warn!(
                "marker {}: {:?} icon without iconData, using default",
                spec.id,
                spec.icon_source
            );
            spec.icon_source = IconSource::DefaultIcon;
        }

        spec.width = dimension_field(map.get("iconWidth")).unwrap_or(DEFAULT_ICON_SIZE.0);
        spec.height = dimension_field(map.get("iconHeight")).unwrap_or(DEFAULT_ICON_SIZE.1);
        spec.color = map.get("color").and_then(color_field);

        Ok(spec)
    }
}

/// Position (and optional avatar) change for an existing marker
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerUpdate {
    pub id: String,
    pub position: LatLng,
    pub avatar_url: Option<String>,
}

impl MarkerUpdate {
    pub fn new(id: impl Into<String>, position: LatLng) -> Self {
        Self {
            id: id.into(),
            position,
            avatar_url: None,
        }
    }

    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        if !value.is_object() {
            return Err(MarkerError::InvalidMarker("update is not a map".into()));
        }
        let id = required_id(value)?;
        let position = required_position(value, &id)?;
        Ok(Self {
            avatar_url: string_field(value.get("avatarUrl")),
            id,
            position,
        })
    }
}

/// Decode every well-formed marker, skipping the rest
pub fn parse_markers(values: &[Value]) -> Vec<MarkerSpec> {
    values
        .iter()
        .filter_map(|value| match MarkerSpec::from_value(value) {
            Ok(spec) => Some(spec),
            Err(e) => {
                log::warn!("skipping malformed marker: {}", e);
                None
            }
        })
        .collect()
}

/// Decode every well-formed update, skipping the rest
pub fn parse_updates(values: &[Value]) -> Vec<MarkerUpdate> {
    values
        .iter()
        .filter_map(|value| match MarkerUpdate::from_value(value) {
            Ok(update) => Some(update),
            Err(e) => {
                log::warn!("skipping malformed marker update: {}", e);
                None
            }
        })
        .collect()
}

/// Marker clustering settings for one map surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusteringOptions {
    pub enabled: bool,
    /// Pixel radius within which markers group
    #[serde(alias = "radius")]
    pub cluster_radius: u32,
    /// Zoom level at and above which markers render ungrouped
    #[serde(alias = "clusterMaxZoom")]
    pub max_zoom: u32,
}

impl ClusteringOptions {
    pub fn new(enabled: bool, cluster_radius: u32, max_zoom: u32) -> Self {
        Self {
            enabled,
            cluster_radius,
            max_zoom,
        }
    }

    /// Lenient decode: omitted or mistyped fields fall back to defaults
    pub fn from_value(value: &Value) -> Self {
        let defaults = Self::default();
        let number = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| value.get(*name).and_then(number_field))
        };
        Self {
            enabled: value
                .get("enabled")
                .and_then(Value::as_bool)
                .unwrap_or(defaults.enabled),
            cluster_radius: number(&["clusterRadius", "radius"])
                .map(|r| r.max(0.0).round() as u32)
                .unwrap_or(defaults.cluster_radius),
            max_zoom: number(&["maxZoom", "clusterMaxZoom"])
                .map(|z| z.max(0.0).round() as u32)
                .unwrap_or(defaults.max_zoom),
        }
    }

    /// Whether markers group at the given zoom level
    pub fn clusters_at(&self, zoom: f64) -> bool {
        self.enabled && self.cluster_radius > 0 && zoom < self.max_zoom as f64
    }
}

impl Default for ClusteringOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            cluster_radius: DEFAULT_CLUSTER_RADIUS,
            max_zoom: DEFAULT_CLUSTER_MAX_ZOOM,
        }
    }
}

fn required_id(value: &Value) -> Result<String> {
    value
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| MarkerError::InvalidMarker("missing id".into()))
}

fn required_position(value: &Value, id: &str) -> Result<LatLng> {
    let lat = value.get("latitude").and_then(number_field);
    let lng = value.get("longitude").and_then(number_field);
    match (lat, lng) {
        (Some(lat), Some(lng)) => {
            let position = LatLng::new(lat, lng);
            if position.is_valid() {
                Ok(position)
            } else {
                Err(MarkerError::InvalidMarker(format!(
                    "{}: coordinates out of range ({}, {})",
                    id, lat, lng
                )))
            }
        }
        _ => Err(MarkerError::InvalidMarker(format!(
            "{}: missing latitude/longitude",
            id
        ))),
    }
}

/// Numbers may arrive as ints, floats or numeric strings
fn number_field(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_field(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

/// Positive icon edge, clamped to `MAX_ICON_DIMENSION`
fn dimension_field(value: Option<&Value>) -> Option<u32> {
    value
        .and_then(number_field)
        .filter(|d| d.is_finite() && *d >= 1.0)
        .map(|d| {
            if d > MAX_ICON_DIMENSION as f64 {
                log::warn!("icon dimension {} clamped to {}", d, MAX_ICON_DIMENSION);
            }
            clamp_dimension(d.round().min(MAX_ICON_DIMENSION as f64) as u32)
        })
}

fn color_field(value: &Value) -> Option<MarkerColor> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|v| v as u64))
            .map(MarkerColor::from_packed),
        Value::String(s) => MarkerColor::from_hex(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_marker_decodes() {
        let spec = MarkerSpec::from_value(&json!({
            "id": "driver-1",
            "latitude": 37.0,
            "longitude": -122,
            "title": "Driver",
            "subtitle": "On the way",
            "iconSource": "networkUrl",
            "iconData": "https://cdn/pin.png",
            "iconWidth": 48.0,
            "iconHeight": 32,
            "color": 0xFF4CAF50u32
        }))
        .unwrap();

        assert_eq!(spec.id, "driver-1");
        assert_eq!(spec.position, LatLng::new(37.0, -122.0));
        assert_eq!(spec.title.as_deref(), Some("Driver"));
        assert_eq!(spec.icon_source, IconSource::NetworkUrl);
        assert_eq!((spec.width, spec.height), (48, 32));
        assert_eq!(spec.color, Some(MarkerColor(0x4CAF50)));
        assert_eq!(spec.avatar(), None);
    }

    #[test]
    fn test_defaults_applied() {
        let spec = MarkerSpec::from_value(&json!({
            "id": "a", "latitude": 1, "longitude": 2, "iconSource": "sparkles"
        }))
        .unwrap();
        assert_eq!(spec.icon_source, IconSource::DefaultIcon);
        assert_eq!((spec.width, spec.height), (40, 40));
        assert_eq!(spec.color, None);
    }

    #[test]
    fn test_oversized_icon_is_clamped() {
        let spec = MarkerSpec::from_value(&json!({
            "id": "huge", "latitude": 1, "longitude": 2,
            "iconWidth": 1e12, "iconHeight": "30000"
        }))
        .unwrap();
        assert_eq!((spec.width, spec.height), (MAX_ICON_DIMENSION, MAX_ICON_DIMENSION));
        assert_eq!(spec.avatar_size(), MAX_ICON_DIMENSION);

        let built = MarkerSpec::new("b", LatLng::new(0.0, 0.0)).with_size(u32::MAX, 0);
        assert_eq!((built.width, built.height), (MAX_ICON_DIMENSION, 1));
    }

    #[test]
    fn test_missing_icon_data_uses_default() {
        let spec = MarkerSpec::from_value(&json!({
            "id": "a", "latitude": 1, "longitude": 2, "iconSource": "networkUrl", "iconData": ""
        }))
        .unwrap();
        assert_eq!(spec.icon_source, IconSource::DefaultIcon);
    }

    #[test]
    fn test_empty_avatar_does_not_take_priority() {
        let spec = MarkerSpec::new("a", LatLng::new(0.0, 0.0)).with_avatar("");
        assert_eq!(spec.avatar(), None);
        let spec = spec.with_avatar("https://a/me.png");
        assert_eq!(spec.avatar(), Some("https://a/me.png"));
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let markers = parse_markers(&[
            json!({"id": "ok", "latitude": 1.0, "longitude": 2.0}),
            json!({"latitude": 1.0, "longitude": 2.0}),
            json!({"id": "no-lat", "longitude": 2.0}),
            json!({"id": "bad", "latitude": 123.0, "longitude": 2.0}),
            json!("not a map"),
            json!({"id": "string-coords", "latitude": "1.5", "longitude": "2.5"}),
        ]);
        let ids: Vec<_> = markers.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["ok", "string-coords"]);
    }

    #[test]
    fn test_updates_decode() {
        let updates = parse_updates(&[
            json!({"id": "a", "latitude": 1.0, "longitude": 2.0, "avatarUrl": "https://a/x.png"}),
            json!({"id": "b", "latitude": 1.0}),
        ]);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].avatar_url.as_deref(), Some("https://a/x.png"));

        let implied = MarkerSpec::from_update(&updates[0]);
        assert_eq!(implied.id, "a");
        assert_eq!(implied.avatar(), Some("https://a/x.png"));
        assert_eq!(implied.icon_source, IconSource::DefaultIcon);
    }

    #[test]
    fn test_color_strings() {
        let spec = MarkerSpec::from_value(&json!({
            "id": "a", "latitude": 0, "longitude": 0, "color": "#FF0000"
        }))
        .unwrap();
        assert_eq!(spec.color, Some(MarkerColor(0xFF0000)));
    }

    #[test]
    fn test_clustering_options() {
        assert_eq!(
            ClusteringOptions::from_value(&json!({})),
            ClusteringOptions::new(true, 50, 14)
        );
        assert_eq!(
            ClusteringOptions::from_value(&json!({"enabled": false, "radius": 80, "maxZoom": 12.0})),
            ClusteringOptions::new(false, 80, 12)
        );
        assert_eq!(
            ClusteringOptions::from_value(&json!({"clusterRadius": 30, "clusterMaxZoom": 16})),
            ClusteringOptions::new(true, 30, 16)
        );

        let options = ClusteringOptions::default();
        assert!(options.clusters_at(10.0));
        assert!(!options.clusters_at(14.0));
        assert!(!ClusteringOptions::new(false, 50, 14).clusters_at(1.0));
    }
}
