// Poller config fragments (Telegraf input syntax).
//
// One fragment per device. Bearer-style tokens are never inlined; the
// fragment references the env key exported to the secrets file, which
// the polling agent substitutes at load time. Output carries no
// timestamps so regeneration with unchanged inputs is byte-identical.

use std::fmt::Write as _;

use vigil_api::Endpoint;
use vigil_config::{AuthType, Device, GlobalDefaults};

use crate::tokens::secret_key_for;

/// Static banner at the top of every generated fragment.
const BANNER: &str = "# Managed by vigil. Do not edit.";

/// Base poller config written once per pass alongside the per-device
/// fragments: agent defaults, the metrics output, and host-level inputs.
/// Excluded from stale cleanup.
pub const BASE_POLLER_CONFIG: &str = r#"# Managed by vigil. Do not edit.
# Agent defaults and host-level monitoring.

[agent]
  interval = "60s"
  round_interval = true
  metric_batch_size = 1000
  metric_buffer_limit = 10000
  flush_interval = "10s"
  omit_hostname = false

[[outputs.prometheus_client]]
  listen = ":9273"
  metric_version = 2
  path = "/metrics"

[[inputs.cpu]]
  percpu = true
  totalcpu = true

[[inputs.disk]]
  ignore_fs = ["tmpfs", "devtmpfs", "devfs", "overlay", "squashfs"]

[[inputs.mem]]

[[inputs.system]]

[[inputs.internal]]
  collect_memstats = true
"#;

/// Render the poller fragment for one device.
///
/// Healthy devices get one probe block per endpoint plus a scrape block
/// when the device declares a metrics surface. `degraded` carries the
/// failure reason; degraded devices (and devices with no endpoints) get
/// a single health probe of the base URL instead.
pub fn poller_fragment(
    device: &Device,
    endpoints: &[Endpoint],
    global: &GlobalDefaults,
    degraded: Option<&str>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{BANNER}");
    let _ = writeln!(
        out,
        "# Device: {} ({})",
        toml_escape(&device.name),
        toml_escape(&device.kind)
    );

    if let Some(reason) = degraded {
        push_health_probe(&mut out, device, global, Some(reason));
        return out;
    }

    if endpoints.is_empty() {
        push_health_probe(&mut out, device, global, None);
    } else {
        for endpoint in endpoints {
            push_probe(&mut out, device, global, endpoint);
        }
    }

    if device.api.metrics_type.as_deref() == Some("prometheus") {
        push_scrape(&mut out, device, global);
    }

    out
}

fn push_probe(out: &mut String, device: &Device, global: &GlobalDefaults, endpoint: &Endpoint) {
    let url = join_url(&device.api.base_url, &endpoint.path);

    let _ = writeln!(out, "\n[[inputs.http_response]]");
    let _ = writeln!(out, "  interval = \"{}s\"", global.polling_interval);
    let _ = writeln!(out, "  urls = [\"{}\"]", toml_escape(&url));
    let _ = writeln!(out, "  method = \"{}\"", toml_escape(&endpoint.method));
    let _ = writeln!(out, "  response_timeout = \"{}s\"", global.timeout);
    if !device.api.verify_ssl {
        let _ = writeln!(out, "  insecure_skip_verify = true");
    }
    if endpoint.nested_json {
        let _ = writeln!(out, "  data_format = \"json_v2\"");
    }

    push_auth(out, device);

    let _ = writeln!(out, "  [inputs.http_response.tags]");
    let _ = writeln!(out, "    critical = \"{}\"", endpoint.critical);
    push_device_tags(out, device);
    let _ = writeln!(out, "    endpoint = \"{}\"", toml_escape(&endpoint.path));
}

fn push_health_probe(
    out: &mut String,
    device: &Device,
    global: &GlobalDefaults,
    reason: Option<&str>,
) {
    let _ = writeln!(out, "\n[[inputs.http_response]]");
    let _ = writeln!(out, "  interval = \"{}s\"", global.polling_interval);
    let _ = writeln!(out, "  urls = [\"{}\"]", toml_escape(&device.api.base_url));
    let _ = writeln!(out, "  method = \"GET\"");
    let _ = writeln!(out, "  response_timeout = \"{}s\"", global.timeout);
    if !device.api.verify_ssl {
        let _ = writeln!(out, "  insecure_skip_verify = true");
    }
    // Degraded devices may have no live token behind the env key, so
    // their probe goes out bare.
    if reason.is_none() {
        push_auth(out, device);
    }

    let _ = writeln!(out, "  [inputs.http_response.tags]");
    push_device_tags(out, device);
    if let Some(reason) = reason {
        let _ = writeln!(out, "    reason = \"{}\"", toml_escape(reason));
        let _ = writeln!(out, "    status = \"degraded\"");
    }
}

fn push_scrape(out: &mut String, device: &Device, global: &GlobalDefaults) {
    let path = device.api.metrics_path.as_deref().unwrap_or("/metrics");
    let url = join_url(&device.api.base_url, path);

    let _ = writeln!(out, "\n[[inputs.prometheus]]");
    let _ = writeln!(out, "  interval = \"{}s\"", global.polling_interval);
    let _ = writeln!(out, "  urls = [\"{}\"]", toml_escape(&url));
    if !device.api.verify_ssl {
        let _ = writeln!(out, "  insecure_skip_verify = true");
    }
    let _ = writeln!(out, "  [inputs.prometheus.tags]");
    push_device_tags(out, device);
}

/// Auth material for probe requests. Token-based schemes reference the
/// secrets-file env key; only basic credentials appear in the fragment.
fn push_auth(out: &mut String, device: &Device) {
    match device.api.auth_type {
        AuthType::None => {}
        AuthType::Basic => {
            let username = device.api.username.as_deref().unwrap_or_default();
            let password = device.api.password.as_deref().unwrap_or_default();
            let _ = writeln!(out, "  username = \"{}\"", toml_escape(username));
            let _ = writeln!(out, "  password = \"{}\"", toml_escape(password));
        }
        AuthType::Bearer | AuthType::TokenFromAuth => {
            let key = secret_key_for(&device.name);
            let _ = writeln!(out, "  [inputs.http_response.headers]");
            let _ = writeln!(out, "    Authorization = \"Bearer ${{{key}}}\"");
        }
    }
}

fn push_device_tags(out: &mut String, device: &Device) {
    let _ = writeln!(out, "    device_name = \"{}\"", toml_escape(&device.name));
    let _ = writeln!(out, "    device_type = \"{}\"", toml_escape(&device.kind));
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn toml_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vigil_config::parse_inventory;

    fn device(doc: &str) -> Device {
        parse_inventory(doc).expect("parses").devices.remove(0)
    }

    #[test]
    fn healthy_fragment_has_one_block_per_endpoint() {
        let device = device(
            r"
devices:
  - name: cam
    type: camera
    api:
      base_url: http://cam.local/
",
        );
        let endpoints = vec![
            Endpoint {
                path: "/status".into(),
                method: "GET".into(),
                critical: true,
                nested_json: false,
            },
            Endpoint {
                path: "/streams".into(),
                method: "GET".into(),
                critical: false,
                nested_json: true,
            },
        ];

        let fragment = poller_fragment(&device, &endpoints, &GlobalDefaults::default(), None);

        assert_eq!(fragment.matches("[[inputs.http_response]]").count(), 2);
        assert!(fragment.contains("urls = [\"http://cam.local/status\"]"));
        assert!(fragment.contains("data_format = \"json_v2\""));
        assert!(fragment.contains("critical = \"true\""));
        assert!(!fragment.contains("Authorization"));
    }

    #[test]
    fn token_device_references_env_key_not_token_value() {
        let device = device(
            r"
devices:
  - name: b
    api:
      base_url: http://b
      auth_type: token_from_auth
      auth_endpoint: /login
      token_path: data.token
      username: u
      password: p
",
        );
        let endpoints = vec![Endpoint {
            path: "/health".into(),
            method: "GET".into(),
            critical: false,
            nested_json: false,
        }];

        let fragment = poller_fragment(&device, &endpoints, &GlobalDefaults::default(), None);

        assert!(fragment.contains("Authorization = \"Bearer ${B_TOKEN}\""));
    }

    #[test]
    fn degraded_fragment_is_a_tagged_health_probe() {
        let device = device(
            r"
devices:
  - name: flaky
    api: {base_url: 'http://flaky:9000'}
",
        );

        let fragment = poller_fragment(
            &device,
            &[],
            &GlobalDefaults::default(),
            Some("auth endpoint returned HTTP 500"),
        );

        assert_eq!(fragment.matches("[[inputs.http_response]]").count(), 1);
        assert!(fragment.contains("urls = [\"http://flaky:9000\"]"));
        assert!(fragment.contains("status = \"degraded\""));
        assert!(fragment.contains("reason = \"auth endpoint returned HTTP 500\""));
    }

    #[test]
    fn metrics_surface_adds_a_scrape_block() {
        let device = device(
            r"
devices:
  - name: gateway
    api:
      base_url: http://gw
      metrics_type: prometheus
      metrics_path: /internal/metrics
",
        );

        let fragment = poller_fragment(&device, &[], &GlobalDefaults::default(), None);

        assert!(fragment.contains("[[inputs.prometheus]]"));
        assert!(fragment.contains("urls = [\"http://gw/internal/metrics\"]"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let device = device(
            r"
devices:
  - name: stable
    api: {base_url: http://s}
",
        );
        let first = poller_fragment(&device, &[], &GlobalDefaults::default(), None);
        let second = poller_fragment(&device, &[], &GlobalDefaults::default(), None);
        assert_eq!(first, second);
    }

    #[test]
    fn insecure_devices_skip_verification() {
        let device = device(
            r"
devices:
  - name: selfsigned
    api: {base_url: 'https://s', verify_ssl: false}
",
        );
        let fragment = poller_fragment(&device, &[], &GlobalDefaults::default(), None);
        assert!(fragment.contains("insecure_skip_verify = true"));
    }
}
