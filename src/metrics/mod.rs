//! CPU and memory history of a database container, read from the metrics
//! agent running on the destination server.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::types::MetricsSettings;
use crate::error::MetricsError;
use crate::executor::remote::RemoteExec;
use crate::resource::descriptor::Server;

const UNAUTHORIZED: &str = "Unauthorized";
const UNKNOWN_AGENT_ERROR: &str = "Metrics agent returned an error without a message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Cpu,
    Memory,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
        }
    }

    /// Field of each agent sample that carries the value.
    fn value_field(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "percent",
            MetricKind::Memory => "used",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sample: unix timestamp and value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricPoint {
    pub timestamp: i64,
    pub value: f64,
}

pub struct MetricsQuery {
    exec: Arc<dyn RemoteExec>,
    settings: MetricsSettings,
}

impl MetricsQuery {
    pub fn new(exec: Arc<dyn RemoteExec>, settings: MetricsSettings) -> Self {
        Self { exec, settings }
    }

    /// Samples for `container_name` since `since`, oldest first as reported.
    pub async fn query(
        &self,
        server: &Server,
        container_name: &str,
        metric: MetricKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricPoint>, MetricsError> {
        let token = server
            .metrics_token
            .as_ref()
            .ok_or(MetricsError::Unauthorized)?;
        let command = self.history_command(token.expose(), container_name, metric, since);

        tracing::debug!(
            server = %server.name,
            container = container_name,
            metric = %metric,
            "Querying metrics agent"
        );
        let output = self
            .exec
            .execute(&[command], server, false)
            .await
            .map_err(|source| MetricsError::Remote {
                container: container_name.to_string(),
                metric: metric.as_str(),
                source,
            })?;
        parse_history(metric, &output.stdout())
    }

    /// Convenience wrapper over the last `mins` minutes.
    pub async fn recent(
        &self,
        server: &Server,
        container_name: &str,
        metric: MetricKind,
        mins: Option<i64>,
    ) -> Result<Vec<MetricPoint>, MetricsError> {
        let mins = mins.unwrap_or(self.settings.default_window_mins);
        let since = Utc::now() - chrono::Duration::minutes(mins);
        self.query(server, container_name, metric, since).await
    }

    pub fn history_command(
        &self,
        token: &str,
        container_name: &str,
        metric: MetricKind,
        since: DateTime<Utc>,
    ) -> String {
        let from = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        format!(
            "docker exec {} sh -c 'curl -H \"Authorization: Bearer {}\" http://localhost:{}/api/container/{}/{}/history?from={}'",
            self.settings.agent_container,
            token,
            self.settings.agent_port,
            container_name,
            metric,
            from
        )
    }
}

/// Decode the agent response into samples.
pub fn parse_history(metric: MetricKind, body: &str) -> Result<Vec<MetricPoint>, MetricsError> {
    if body.contains("error") {
        return Err(agent_error(body));
    }

    let samples: Vec<Value> = serde_json::from_str(body)?;
    Ok(samples
        .iter()
        .map(|sample| MetricPoint {
            timestamp: sample.get("time").map(as_i64).unwrap_or_default(),
            value: sample
                .get(metric.value_field())
                .map(as_f64)
                .unwrap_or_default(),
        })
        .collect())
}

fn agent_error(body: &str) -> MetricsError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| UNKNOWN_AGENT_ERROR.to_string());

    if message == UNAUTHORIZED {
        MetricsError::Unauthorized
    } else {
        MetricsError::Agent(message)
    }
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn as_i64(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or_default(),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64))
            .unwrap_or_default(),
        _ => 0,
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or_default(),
        Value::String(s) => s.trim().parse().unwrap_or_default(),
        _ => 0.0,
    }
}
