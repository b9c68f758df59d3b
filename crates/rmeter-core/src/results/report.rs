use crate::config::ReportOptions;
use crate::engine::aggregator::TickMetrics;
use crate::error::RmeterError;
use crate::model::AttackResult;
use std::fs::File;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Writes the two CSV logs a run produces: one row per request (optional,
/// only when `streamRequests` is set - expensive at high RPS) and one row
/// per finished tick. Filenames carry the run name, a run id and the start
/// time so repeated runs against the same target never clobber each
/// other's logs.
pub struct Report {
    requests_writer: Option<csv::Writer<File>>,
    percs_writer: Option<csv::Writer<File>>,
    pub requests_path: Option<PathBuf>,
    pub percs_path: Option<PathBuf>,
}

impl Report {
    pub fn new(name: &str, options: &ReportOptions, run_id: Uuid, started_unix: i64) -> Result<Self, RmeterError> {
        let Some(dir) = &options.csv_dir else {
            return Ok(Report {
                requests_writer: None,
                percs_writer: None,
                requests_path: None,
                percs_path: None,
            });
        };
        let dir = Path::new(dir);
        std::fs::create_dir_all(dir)?;

        let percs_path = dir.join(format!("percs_{name}_{}_{started_unix}.csv", run_id.as_hyphenated()));
        let mut percs_writer = csv::Writer::from_path(&percs_path)?;
        percs_writer.write_record(["request_label", "tick", "rate", "p50_ms", "p95_ms", "p99_ms"])?;

        let (requests_writer, requests_path) = if options.stream_requests {
            let path = dir.join(format!("requests_{name}_{}_{started_unix}.csv", run_id.as_hyphenated()));
            let mut writer = csv::Writer::from_path(&path)?;
            writer.write_record(["request_label", "begin_unix_nanos", "end_unix_nanos", "elapsed_ms", "status_code", "error"])?;
            (Some(writer), Some(path))
        } else {
            (None, None)
        };

        Ok(Report {
            requests_writer,
            percs_writer: Some(percs_writer),
            requests_path,
            percs_path: Some(percs_path),
        })
    }

    pub fn write_request(&mut self, result: &AttackResult) -> Result<(), RmeterError> {
        let Some(writer) = &mut self.requests_writer else {
            return Ok(());
        };
        writer.write_record(&[
            result.result.request_label.clone(),
            result.begin.timestamp_nanos_opt().unwrap_or_default().to_string(),
            result.end.timestamp_nanos_opt().unwrap_or_default().to_string(),
            result.elapsed.as_millis().to_string(),
            result.result.status_code.map(|c| c.to_string()).unwrap_or_default(),
            result.result.error.clone().unwrap_or_default(),
        ])?;
        Ok(())
    }

    pub fn write_tick(&mut self, tick: &TickMetrics, request_label: &str) -> Result<(), RmeterError> {
        let Some(writer) = &mut self.percs_writer else {
            return Ok(());
        };
        writer.write_record(&[
            request_label.to_string(),
            tick.tick.to_string(),
            (tick.metrics.rate as i64).to_string(),
            tick.metrics.p50_ms.to_string(),
            tick.metrics.p95_ms.to_string(),
            tick.metrics.p99_ms.to_string(),
        ])?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), RmeterError> {
        if let Some(w) = &mut self.requests_writer {
            w.flush()?;
        }
        if let Some(w) = &mut self.percs_writer {
            w.flush()?;
        }
        Ok(())
    }
}

/// Renders a tick series as a self-contained HTML report. Kept deliberately
/// simple - a table, no charting library - since the percs CSV is the
/// source of truth and this is just a human-friendly view on top of it.
pub fn render_html_report(name: &str, ticks: &[TickMetrics]) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>");
    out.push_str(&html_escape(name));
    out.push_str(" - rmeter report</title><style>");
    out.push_str("body{font-family:monospace;background:#111;color:#ddd;padding:1rem}table{border-collapse:collapse;width:100%}td,th{border:1px solid #444;padding:4px 8px;text-align:right}th{background:#222}");
    out.push_str("</style></head><body>");
    out.push_str(&format!("<h1>{}</h1>", html_escape(name)));
    out.push_str("<table><tr><th>tick</th><th>step</th><th>rate</th><th>target</th><th>success</th><th>p50</th><th>p95</th><th>p99</th><th>max</th></tr>");
    for t in ticks {
        out.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{:.1}</td><td>{:.1}</td><td>{:.2}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            t.tick, t.step, t.metrics.rate, t.metrics.target_rate, t.metrics.success,
            t.metrics.p50_ms, t.metrics.p95_ms, t.metrics.p99_ms, t.metrics.max_ms
        ));
    }
    out.push_str("</table></body></html>");
    out
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttackToken, DoResult};
    use chrono::Utc;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn sample_tick() -> TickMetrics {
        TickMetrics {
            tick: 1,
            step: 0,
            target_rps: 10,
            metrics: crate::engine::aggregator::Metrics {
                requests: 10,
                target_rate: 10.0,
                rate: 9.5,
                success: 1.0,
                mean_ms: 12.0,
                p50_ms: 10,
                p95_ms: 20,
                p99_ms: 25,
                max_ms: 30,
                status_codes: HashMap::new(),
                errors: vec![],
            },
            samples: vec![],
        }
    }

    fn sample_result() -> AttackResult {
        let begin = Utc::now();
        AttackResult {
            token: AttackToken { target_rps: 10, step: 0, tick: 1 },
            begin,
            end: begin,
            elapsed: std::time::Duration::from_millis(12),
            result: DoResult::ok("GET", 200, 10, 10),
        }
    }

    #[test]
    fn disabled_report_is_a_no_op() {
        let mut report = Report::new("test", &ReportOptions::default(), Uuid::nil(), 0).unwrap();
        assert!(report.write_tick(&sample_tick(), "GET").is_ok());
        assert!(report.requests_path.is_none());
    }

    #[test]
    fn enabled_report_writes_percs_csv() {
        let dir = tempdir().unwrap();
        let options = ReportOptions {
            csv_dir: Some(dir.path().to_string_lossy().to_string()),
            html_report: false,
            stream_requests: false,
        };
        let mut report = Report::new("loadtest", &options, Uuid::nil(), 1234).unwrap();
        report.write_tick(&sample_tick(), "GET").unwrap();
        report.flush().unwrap();

        let percs_path = report.percs_path.unwrap();
        assert!(percs_path.exists());
        let contents = std::fs::read_to_string(percs_path).unwrap();
        assert!(contents.contains("p50_ms"));
        assert!(contents.contains("10"));
    }

    #[test]
    fn stream_requests_enables_the_request_log() {
        let dir = tempdir().unwrap();
        let options = ReportOptions {
            csv_dir: Some(dir.path().to_string_lossy().to_string()),
            html_report: false,
            stream_requests: true,
        };
        let mut report = Report::new("loadtest", &options, Uuid::nil(), 1234).unwrap();
        report.write_request(&sample_result()).unwrap();
        report.flush().unwrap();
        let path = report.requests_path.unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.contains("200"));
    }

    #[test]
    fn html_report_escapes_the_run_name() {
        let html = render_html_report("<script>", &[sample_tick()]);
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }
}
