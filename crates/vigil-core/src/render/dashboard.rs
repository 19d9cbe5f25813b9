// Dashboard definitions (Grafana JSON model).
//
// One dashboard per device: a header text panel, a status stat panel,
// and one panel per probed endpoint. The uid is derived from the device
// name and panel ids are positional, so output is stable across passes
// (serde_json's default map keeps keys sorted).

use serde_json::{Value, json};

use vigil_api::Endpoint;
use vigil_config::Device;

/// Grafana caps uids at 40 characters.
const UID_MAX: usize = 40;

/// Render the dashboard JSON for one device (pretty-printed, trailing
/// newline).
pub fn dashboard_fragment(device: &Device, endpoints: &[Endpoint], degraded: Option<&str>) -> String {
    let mut panels = Vec::new();
    let mut next_id = 1;
    let mut y = 0;

    panels.push(header_panel(device, endpoints, degraded, &mut next_id, y));
    y += 3;
    panels.push(status_panel(device, &mut next_id, y));
    y += 4;

    for pair in endpoints.chunks(2) {
        for (i, endpoint) in pair.iter().enumerate() {
            let x = u32::try_from(i).unwrap_or(0) * 12;
            panels.push(endpoint_panel(device, endpoint, &mut next_id, x, y));
        }
        y += 8;
    }

    let dashboard = json!({
        "uid": dashboard_uid(&device.name),
        "title": format!("{} Dashboard", device.name),
        "tags": ["vigil", device.kind],
        "timezone": "browser",
        "schemaVersion": 39,
        "refresh": "30s",
        "panels": panels,
    });

    // json! output of a json! literal cannot fail to serialize.
    let mut text = serde_json::to_string_pretty(&dashboard).unwrap_or_default();
    text.push('\n');
    text
}

/// Deterministic uid: `vigil-` plus the device name lowercased with
/// non-alphanumeric runs collapsed to `-`.
fn dashboard_uid(name: &str) -> String {
    let mut uid = String::from("vigil-");
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            uid.push(ch.to_ascii_lowercase());
        } else if !uid.ends_with('-') {
            uid.push('-');
        }
    }
    let uid = uid.trim_end_matches('-').to_owned();
    uid.chars().take(UID_MAX).collect()
}

fn header_panel(
    device: &Device,
    endpoints: &[Endpoint],
    degraded: Option<&str>,
    next_id: &mut u32,
    y: u32,
) -> Value {
    let description = if device.description.is_empty() {
        "No description"
    } else {
        device.description.as_str()
    };
    let status_line = match degraded {
        Some(reason) => format!("**Status**: degraded ({reason})"),
        None => format!("**Status**: data from {} endpoints", endpoints.len()),
    };
    let content = format!(
        "# {} ({})\n\n**Description**: {}\n\n{}",
        device.name, device.kind, description, status_line
    );

    json!({
        "type": "text",
        "title": format!("{} Overview", device.name),
        "gridPos": {"x": 0, "y": y, "w": 24, "h": 3},
        "id": take_id(next_id),
        "options": {"mode": "markdown", "content": content},
    })
}

fn status_panel(device: &Device, next_id: &mut u32, y: u32) -> Value {
    json!({
        "type": "stat",
        "title": "Device Status",
        "gridPos": {"x": 0, "y": y, "w": 24, "h": 4},
        "id": take_id(next_id),
        "options": {
            "colorMode": "value",
            "graphMode": "area",
            "justifyMode": "auto",
            "textMode": "auto",
        },
        "fieldConfig": {
            "defaults": {
                "mappings": [{
                    "type": "value",
                    "options": {
                        "0": {"color": "red", "text": "Offline"},
                        "1": {"color": "green", "text": "Online"},
                    },
                }],
                "thresholds": {
                    "mode": "absolute",
                    "steps": [
                        {"color": "red", "value": null},
                        {"color": "green", "value": 1},
                    ],
                },
                "color": {"mode": "thresholds"},
            },
        },
        "targets": [{
            "expr": format!(
                "http_response_result_code{{device_name=\"{}\"}} == bool 0",
                device.name
            ),
            "refId": "A",
            "legendFormat": "Status",
        }],
    })
}

fn endpoint_panel(
    device: &Device,
    endpoint: &Endpoint,
    next_id: &mut u32,
    x: u32,
    y: u32,
) -> Value {
    json!({
        "type": "timeseries",
        "title": format!("{} {}", endpoint.method, endpoint.path),
        "gridPos": {"x": x, "y": y, "w": 12, "h": 8},
        "id": take_id(next_id),
        "targets": [{
            "expr": format!(
                "http_response_response_time{{device_name=\"{}\", endpoint=\"{}\"}}",
                device.name, endpoint.path
            ),
            "refId": "A",
            "legendFormat": "response time",
        }],
        "fieldConfig": {
            "defaults": {
                "unit": "s",
                "thresholds": {
                    "mode": "absolute",
                    "steps": [
                        {"color": "green", "value": null},
                        {"color": "yellow", "value": 1},
                        {"color": "red", "value": 5},
                    ],
                },
            },
        },
    })
}

fn take_id(next_id: &mut u32) -> u32 {
    let id = *next_id;
    *next_id += 1;
    id
}
