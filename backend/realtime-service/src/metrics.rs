use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge, Encoder, IntCounterVec, IntGauge, TextEncoder,
};

pub static WS_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("ws_connections", "Open realtime connections").unwrap()
});

pub static WS_FRAMES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ws_frames_total",
        "Inbound realtime frames by type",
        &["frame_type"]
    )
    .unwrap()
});

pub static WS_PUBLISH_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ws_publish_total",
        "Realtime publishes by scope and delivery path",
        &["scope", "path"]
    )
    .unwrap()
});

pub static WS_FANOUT_DELIVER_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ws_fanout_deliver_total",
        "Frames delivered locally from the broker subscription",
        &["path"]
    )
    .unwrap()
});

pub fn record_connection(delta: i64) {
    WS_CONNECTIONS.add(delta);
}

pub fn record_frame(frame_type: &str) {
    WS_FRAMES_TOTAL.with_label_values(&[frame_type]).inc();
}

pub fn record_publish(scope: &str, path: &str) {
    WS_PUBLISH_TOTAL.with_label_values(&[scope, path]).inc();
}

pub fn record_fanout_deliver(path: &str) {
    WS_FANOUT_DELIVER_TOTAL.with_label_values(&[path]).inc();
}

/// Render the default registry in prometheus text format.
pub fn gather() -> String {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_counter_renders() {
        record_publish("conversation", "local");
        record_frame("PING");
        let text = gather();
        assert!(text.contains("ws_publish_total"));
    }
}
