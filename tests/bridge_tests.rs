mod common;

use common::*;
use navmarkers::prelude::*;
use serde_json::json;

async fn ready(channel: &MarkerChannel, context: SurfaceContext) -> MemoryProbe {
    let (controller, _) = controller();
    let (surface, probe) = surface();
    controller.attach_surface(surface);
    controller.style_loaded();
    assert_eq!(controller.wait_for_readiness().await, ReadinessState::Ready);
    channel.register(context, controller);
    probe
}

async fn settle(channel: &MarkerChannel, context: SurfaceContext) {
    channel.controller(context).unwrap().settle().await.unwrap();
}

/// Each map context has its own markers behind the same channel
#[tokio::test]
async fn test_contexts_are_independent() {
    let channel = MarkerChannel::new();
    let full = ready(&channel, SurfaceContext::FullScreen).await;
    let embedded = ready(&channel, SurfaceContext::Embedded).await;

    let add = MethodCall::new(
        "addMarkers",
        json!({
            "markers": [
                {"id": "A", "latitude": 37.0, "longitude": -122.0, "title": "Alice"},
                {"id": "B", "latitude": 37.1, "longitude": -122.1}
            ],
            "clustering": {"enabled": true, "clusterRadius": 50, "maxZoom": 14}
        }),
    );
    assert!(channel.handle(SurfaceContext::FullScreen, &add).await);

    let other = MethodCall::new(
        "addMarkers",
        json!({"markers": [{"id": "X", "latitude": 1.0, "longitude": 1.0}]}),
    );
    assert!(channel.handle(SurfaceContext::Embedded, &other).await);

    settle(&channel, SurfaceContext::FullScreen).await;
    settle(&channel, SurfaceContext::Embedded).await;

    assert_eq!(full.marker_ids(), vec!["A".to_string(), "B".to_string()]);
    assert_eq!(full.annotation("A").unwrap().title.as_deref(), Some("Alice"));
    assert_eq!(full.clustering(), Some(ClusteringOptions::new(true, 50, 14)));
    assert_eq!(embedded.marker_ids(), vec!["X".to_string()]);
}

/// Update, remove and clear round trip through the channel
#[tokio::test]
async fn test_method_round_trip() {
    let channel = MarkerChannel::new();
    let probe = ready(&channel, SurfaceContext::FullScreen).await;
    let ctx = SurfaceContext::FullScreen;

    let update = MethodCall::new(
        "updateMarkers",
        json!({"markers": [
            {"id": "A", "latitude": 10.0, "longitude": 20.0},
            {"id": "B", "latitude": 11.0, "longitude": 21.0},
            {"latitude": 0.0}
        ]}),
    );
    assert!(channel.handle(ctx, &update).await);
    settle(&channel, ctx).await;
    assert_eq!(probe.marker_ids(), vec!["A".to_string(), "B".to_string()]);
    assert_eq!(probe.annotation("A").unwrap().position, LatLng::new(10.0, 20.0));

    let remove = MethodCall::new("removeMarkers", json!({"markerIds": ["A", 7, "Z"]}));
    assert!(channel.handle(ctx, &remove).await);
    settle(&channel, ctx).await;
    assert_eq!(probe.marker_ids(), vec!["B".to_string()]);

    let clear = MethodCall::new("clearAllMarkers", json!(null));
    assert!(channel.handle(ctx, &clear).await);
    settle(&channel, ctx).await;
    assert_eq!(probe.annotation_count(), 0);
}

/// Calls that cannot be decoded or routed are refused
#[tokio::test]
async fn test_rejected_calls() {
    let channel = MarkerChannel::new();
    let add = MethodCall::new(
        "addMarkers",
        json!({"markers": [{"id": "A", "latitude": 1.0, "longitude": 1.0}]}),
    );

    // Nothing registered for the context
    assert!(!channel.handle(SurfaceContext::Embedded, &add).await);

    let probe = ready(&channel, SurfaceContext::Embedded).await;
    assert!(!channel.handle(SurfaceContext::Embedded, &MethodCall::new("zoomTo", json!({}))).await);
    assert!(
        !channel
            .handle(SurfaceContext::Embedded, &MethodCall::new("addMarkers", json!({})))
            .await
    );
    assert!(
        !channel
            .handle(SurfaceContext::Embedded, &MethodCall::new("removeMarkers", json!({"ids": []})))
            .await
    );

    channel.unregister(SurfaceContext::Embedded);
    assert!(!channel.handle(SurfaceContext::Embedded, &add).await);
    assert_eq!(probe.annotation_count(), 0);
}

/// Oversized icon dimensions are clamped and the whole batch is still added
#[tokio::test]
async fn test_oversized_icon_is_clamped() {
    let channel = MarkerChannel::new();
    let probe = ready(&channel, SurfaceContext::Embedded).await;

    let add = MethodCall::new(
        "addMarkers",
        json!({"markers": [
            {"id": "ok", "latitude": 1.0, "longitude": 1.0},
            {"id": "huge", "latitude": 2.0, "longitude": 2.0, "iconWidth": 1e12, "iconHeight": 1e12}
        ]}),
    );
    assert!(channel.handle(SurfaceContext::Embedded, &add).await);
    settle(&channel, SurfaceContext::Embedded).await;

    assert_eq!(probe.marker_ids(), vec!["huge".to_string(), "ok".to_string()]);
    assert_eq!(probe.annotation("ok").unwrap().image.dimensions(), (40, 40));
    assert_eq!(
        probe.annotation("huge").unwrap().image.dimensions(),
        (navmarkers::constants::MAX_ICON_DIMENSION, navmarkers::constants::MAX_ICON_DIMENSION)
    );
}

/// Calls decoded from a host JSON payload
#[tokio::test]
async fn test_call_from_json_payload() {
    let channel = MarkerChannel::new();
    let probe = ready(&channel, SurfaceContext::FullScreen).await;

    let call: MethodCall = serde_json::from_str(
        r#"{"method": "setClusteringOptions", "arguments": {"enabled": false, "radius": 30}}"#,
    )
    .unwrap();
    assert!(channel.handle(SurfaceContext::FullScreen, &call).await);
    settle(&channel, SurfaceContext::FullScreen).await;

    let applied = probe.clustering().unwrap();
    assert!(!applied.enabled);
    assert_eq!(applied.cluster_radius, 30);
}
