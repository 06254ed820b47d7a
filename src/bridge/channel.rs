//! Host method-call surface.
//!
//! The host sends `{method, arguments}` pairs with loosely typed JSON
//! arguments. Calls are decoded into [`MarkerOperation`]s and routed to the
//! controller of the addressed map context; the reply is a boolean
//! acknowledgement.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::controller::MarkerController;
use crate::markers::{parse_markers, parse_updates, ClusteringOptions, MarkerOperation};
use crate::{MarkerError, Result};

/// Marker methods understood on the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerMethod {
    AddMarkers,
    UpdateMarkers,
    RemoveMarkers,
    ClearAllMarkers,
    SetClusteringOptions,
}

impl MarkerMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "addMarkers" => Some(Self::AddMarkers),
            "updateMarkers" => Some(Self::UpdateMarkers),
            "removeMarkers" => Some(Self::RemoveMarkers),
            "clearAllMarkers" => Some(Self::ClearAllMarkers),
            "setClusteringOptions" => Some(Self::SetClusteringOptions),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AddMarkers => "addMarkers",
            Self::UpdateMarkers => "updateMarkers",
            Self::RemoveMarkers => "removeMarkers",
            Self::ClearAllMarkers => "clearAllMarkers",
            Self::SetClusteringOptions => "setClusteringOptions",
        }
    }
}

/// One call from the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }

    /// Decode into an operation. Malformed entries inside a list are
    /// skipped; a missing top-level list or an unknown method is an error.
    pub fn decode(&self) -> Result<MarkerOperation> {
        let method = MarkerMethod::from_name(&self.method)
            .ok_or_else(|| MarkerError::UnknownMethod(self.method.clone()))?;

        let operation = match method {
            MarkerMethod::AddMarkers => MarkerOperation::Add {
                markers: parse_markers(self.list("markers")?),
                clustering: self
                    .arguments
                    .get("clustering")
                    .filter(|c| c.is_object())
                    .map(ClusteringOptions::from_value),
            },
            MarkerMethod::UpdateMarkers => {
                MarkerOperation::Update(parse_updates(self.list("markers")?))
            }
            MarkerMethod::RemoveMarkers => {
                let ids = self
                    .list("markerIds")?
                    .iter()
                    .filter_map(|id| match id.as_str() {
                        Some(id) => Some(id.to_string()),
                        None => {
                            log::warn!("skipping non-string marker id {}", id);
                            None
                        }
                    })
                    .collect();
                MarkerOperation::Remove(ids)
            }
            MarkerMethod::ClearAllMarkers => MarkerOperation::ClearAll,
            MarkerMethod::SetClusteringOptions => {
                MarkerOperation::SetClustering(ClusteringOptions::from_value(&self.arguments))
            }
        };
        Ok(operation)
    }

    fn list(&self, key: &str) -> Result<&[Value]> {
        self.arguments
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                MarkerError::InvalidArguments(format!("{} requires a '{}' list", self.method, key))
            })
    }
}

/// Which map view a call is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SurfaceContext {
    FullScreen,
    Embedded,
}

impl fmt::Display for SurfaceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FullScreen => f.write_str("full-screen"),
            Self::Embedded => f.write_str("embedded"),
        }
    }
}

/// Routes host calls to the controller registered for each context.
/// Both contexts expose the same operations.
#[derive(Default)]
pub struct MarkerChannel {
    controllers: RwLock<FxHashMap<SurfaceContext, MarkerController>>,
}

impl MarkerChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller, returning the one it replaces
    pub fn register(
        &self,
        context: SurfaceContext,
        controller: MarkerController,
    ) -> Option<MarkerController> {
        self.controllers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(context, controller)
    }

    pub fn unregister(&self, context: SurfaceContext) -> Option<MarkerController> {
        self.controllers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&context)
    }

    pub fn controller(&self, context: SurfaceContext) -> Option<MarkerController> {
        self.controllers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&context)
            .cloned()
    }

    /// Decode and dispatch one call, returning the acknowledgement
    pub async fn handle(&self, context: SurfaceContext, call: &MethodCall) -> bool {
        let Some(controller) = self.controller(context) else {
            log::warn!("{} called on {} with no map attached", call.method, context);
            return false;
        };
        match call.decode() {
            Ok(operation) => controller.acknowledge(operation).await,
            Err(e) => {
                log::warn!("rejecting {} on {}: {}", call.method, context, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::LatLng;
    use serde_json::json;

    #[test]
    fn test_decode_add_with_clustering() {
        let call = MethodCall::new(
            "addMarkers",
            json!({
                "markers": [
                    {"id": "A", "latitude": 37.0, "longitude": -122.0},
                    {"id": "broken"}
                ],
                "clustering": {"enabled": false, "clusterRadius": 70}
            }),
        );

        match call.decode().unwrap() {
            MarkerOperation::Add {
                markers,
                clustering,
            } => {
                assert_eq!(markers.len(), 1);
                assert_eq!(markers[0].position, LatLng::new(37.0, -122.0));
                assert_eq!(clustering, Some(ClusteringOptions::new(false, 70, 14)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_remove_and_clear() {
        let remove = MethodCall::new("removeMarkers", json!({"markerIds": ["A", 7, "Z"]}));
        assert_eq!(
            remove.decode().unwrap(),
            MarkerOperation::Remove(vec!["A".into(), "Z".into()])
        );

        let clear = MethodCall::new("clearAllMarkers", Value::Null);
        assert_eq!(clear.decode().unwrap(), MarkerOperation::ClearAll);
    }

    #[test]
    fn test_decode_clustering_defaults() {
        let call = MethodCall::new("setClusteringOptions", Value::Null);
        assert_eq!(
            call.decode().unwrap(),
            MarkerOperation::SetClustering(ClusteringOptions::default())
        );
    }

    #[test]
    fn test_structural_errors() {
        assert!(matches!(
            MethodCall::new("updateMarkers", json!({})).decode(),
            Err(MarkerError::InvalidArguments(_))
        ));
        assert!(matches!(
            MethodCall::new("removeMarkers", json!({"markerIds": "A"})).decode(),
            Err(MarkerError::InvalidArguments(_))
        ));
        assert!(matches!(
            MethodCall::new("startNavigation", json!({})).decode(),
            Err(MarkerError::UnknownMethod(_))
        ));
    }

    #[test]
    fn test_method_call_deserializes() {
        let call: MethodCall =
            serde_json::from_str(r#"{"method": "clearAllMarkers"}"#).unwrap();
        assert_eq!(call.arguments, Value::Null);
        assert_eq!(MarkerMethod::from_name(&call.method), Some(MarkerMethod::ClearAllMarkers));
    }

    #[tokio::test]
    async fn test_unregistered_context_fails() {
        let channel = MarkerChannel::new();
        let call = MethodCall::new("clearAllMarkers", Value::Null);
        assert!(!channel.handle(SurfaceContext::Embedded, &call).await);
    }
}
