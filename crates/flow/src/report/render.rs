//! HTML and plain-text rendering of the aggregate report

use std::fmt::Write;

use minijinja::{context, Environment, UndefinedBehavior};
use serde::Serialize;
use tracing::error;

use super::{AggregateReport, ReportError};

/// A rendered report and the file name it should be saved under
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedReport {
    Html(String),
    /// Used when the template could not be rendered
    Text(String),
}

impl RenderedReport {
    pub fn file_name(&self) -> &'static str {
        match self {
            RenderedReport::Html(_) => "report.html",
            RenderedReport::Text(_) => "report.txt",
        }
    }

    pub fn contents(&self) -> &str {
        match self {
            RenderedReport::Html(s) | RenderedReport::Text(s) => s,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, RenderedReport::Text(_))
    }
}

#[derive(Serialize)]
struct ChartPoint<'a> {
    step: &'a str,
    avg: f64,
    p95: f64,
    p99: f64,
}

/// Render `report` with `template`, falling back to plain text on any error
pub fn render(report: &AggregateReport, template: &str) -> RenderedReport {
    match render_html(report, template) {
        Ok(html) => RenderedReport::Html(html),
        Err(e) => {
            error!(error = %e, "report template failed, writing plain-text report");
            RenderedReport::Text(render_text(report))
        }
    }
}

pub fn render_html(report: &AggregateReport, template: &str) -> Result<String, ReportError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_template("report", template)?;

    let chart: Vec<ChartPoint> = report
        .steps
        .iter()
        .map(|s| ChartPoint {
            step: &s.name,
            avg: s.avg_ms,
            p95: s.p95_ms,
            p99: s.p99_ms,
        })
        .collect();

    let html = env.get_template("report")?.render(context! {
        title => report.title,
        duration_secs => report.duration_secs,
        flow => report.flow,
        steps => report.steps,
        thresholds => report.thresholds,
        latency_chart_data => serde_json::to_string(&chart)?,
    })?;
    Ok(html)
}

/// Plain-text summary carrying the same numbers as the HTML report
pub fn render_text(report: &AggregateReport) -> String {
    let mut out = String::new();
    let flow = &report.flow;

    // Writing into a String cannot fail.
    let _ = writeln!(out, "{}", report.title);
    let _ = writeln!(out, "{}", "=".repeat(report.title.len().max(20)));
    let _ = writeln!(out, "Duration: {:.2}s", report.duration_secs);
    let _ = writeln!(out);
    let _ = writeln!(out, "Business flow '{}'", flow.name);
    let _ = writeln!(
        out,
        "  iterations {}  success {} ({:.2}%)  failure {} ({:.2}%)",
        flow.count, flow.success_count, flow.success_pct, flow.failure_count, flow.failure_pct
    );
    let _ = writeln!(out, "  avg {:.2}ms  p95 {:.2}ms", flow.avg_ms, flow.p95_ms);
    for (state, count) in &flow.aborted_at {
        let _ = writeln!(out, "  aborted at {:<12} {}", state, count);
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<20} {:>8} {:>8} {:>9} {:>9} {:>10} {:>10} {:>10} {:>10}",
        "STEP", "COUNT", "RATE/S", "SUCCESS%", "FAILURE%", "AVG_MS", "P90_MS", "P95_MS", "P99_MS"
    );
    for step in &report.steps {
        let _ = writeln!(
            out,
            "{:<20} {:>8} {:>8.2} {:>9.2} {:>9.2} {:>10.2} {:>10.2} {:>10.2} {:>10.2}",
            step.name,
            step.count,
            step.rate_per_sec,
            step.success_pct,
            step.failure_pct,
            step.avg_ms,
            step.p90_ms,
            step.p95_ms,
            step.p99_ms
        );
    }

    if !report.thresholds.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Thresholds");
        for t in &report.thresholds {
            let verdict = if t.passed { "PASS" } else { "FAIL" };
            let _ = writeln!(out, "  [{}] {} (observed {:.4})", verdict, t.expression, t.observed);
        }
    }

    out
}

pub const REPORT_TEMPLATE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{{ title }} - {{ flow.name }}</title>
    <script src="https://cdn.jsdelivr.net/npm/chart.js"></script>
    <style>
        :root {
            --bg-primary: #1a1a2e;
            --bg-secondary: #16213e;
            --bg-card: #1f2940;
            --text-primary: #eee;
            --text-secondary: #888;
            --accent: #0f3460;
            --success: #00d26a;
            --danger: #e74c3c;
        }

        * { margin: 0; padding: 0; box-sizing: border-box; }

        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: var(--bg-primary);
            color: var(--text-primary);
            line-height: 1.6;
        }

        .container { max-width: 1400px; margin: 0 auto; padding: 20px; }

        header {
            background: var(--bg-secondary);
            padding: 30px;
            margin-bottom: 30px;
            border-radius: 10px;
        }

        h1 { font-size: 2rem; margin-bottom: 10px; }
        .subtitle { color: var(--text-secondary); font-size: 1.1rem; }

        .stats-grid {
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(200px, 1fr));
            gap: 20px;
            margin-bottom: 30px;
        }

        .stat-card {
            background: var(--bg-card);
            padding: 20px;
            border-radius: 10px;
            text-align: center;
        }

        .stat-value { font-size: 2rem; font-weight: bold; color: var(--success); }
        .stat-value.bad { color: var(--danger); }
        .stat-label { color: var(--text-secondary); font-size: 0.9rem; margin-top: 5px; }

        .panel {
            background: var(--bg-card);
            padding: 20px;
            border-radius: 10px;
            margin-bottom: 20px;
        }

        .panel-title { font-size: 1.2rem; margin-bottom: 15px; }

        table { width: 100%; border-collapse: collapse; margin-top: 10px; }
        th, td { padding: 12px; text-align: left; border-bottom: 1px solid var(--accent); }
        th { color: var(--text-secondary); font-weight: normal; }
        td { font-family: monospace; }

        .pass { color: var(--success); }
        .fail { color: var(--danger); }

        canvas { max-height: 300px; }
    </style>
</head>
<body>
    <div class="container">
        <header>
            <h1>{{ title }}</h1>
            <div class="subtitle">{{ flow.name }} flow | Duration: {{ duration_secs }}s</div>
        </header>

        <div class="stats-grid">
            <div class="stat-card">
                <div class="stat-value">{{ flow.count }}</div>
                <div class="stat-label">Iterations</div>
            </div>
            <div class="stat-card">
                <div class="stat-value">{{ flow.success_count }}</div>
                <div class="stat-label">Successful flows</div>
            </div>
            <div class="stat-card">
                <div class="stat-value{% if flow.failure_count > 0 %} bad{% endif %}">{{ flow.failure_count }}</div>
                <div class="stat-label">Failed flows</div>
            </div>
            <div class="stat-card">
                <div class="stat-value">{{ flow.success_pct }}%</div>
                <div class="stat-label">Flow success rate</div>
            </div>
            <div class="stat-card">
                <div class="stat-value">{{ flow.p95_ms }}ms</div>
                <div class="stat-label">P95 flow duration</div>
            </div>
        </div>

        <div class="panel">
            <div class="panel-title">Steps</div>
            <table>
                <thead>
                    <tr>
                        <th>Step</th>
                        <th>State</th>
                        <th>Count</th>
                        <th>Rate/s</th>
                        <th>Success %</th>
                        <th>Failure %</th>
                        <th>Avg</th>
                        <th>Min</th>
                        <th>P90</th>
                        <th>P95</th>
                        <th>P99</th>
                        <th>Max</th>
                    </tr>
                </thead>
                <tbody>
                    {% for step in steps %}
                    <tr>
                        <td>{{ step.name }}</td>
                        <td>{{ step.state }}</td>
                        <td>{{ step.count }}</td>
                        <td>{{ step.rate_per_sec }}</td>
                        <td class="pass">{{ step.success_pct }}</td>
                        <td{% if step.failure_pct > 0 %} class="fail"{% endif %}>{{ step.failure_pct }}</td>
                        <td>{{ step.avg_ms }}</td>
                        <td>{{ step.min_ms }}</td>
                        <td>{{ step.p90_ms }}</td>
                        <td>{{ step.p95_ms }}</td>
                        <td>{{ step.p99_ms }}</td>
                        <td>{{ step.max_ms }}</td>
                    </tr>
                    {% endfor %}
                </tbody>
            </table>
        </div>

        {% if flow.aborted_at %}
        <div class="panel">
            <div class="panel-title">Where flows stopped</div>
            <table>
                <thead><tr><th>State</th><th>Aborted iterations</th></tr></thead>
                <tbody>
                    {% for state, count in flow.aborted_at|items %}
                    <tr><td>{{ state }}</td><td class="fail">{{ count }}</td></tr>
                    {% endfor %}
                </tbody>
            </table>
        </div>
        {% endif %}

        {% if thresholds %}
        <div class="panel">
            <div class="panel-title">Thresholds</div>
            <table>
                <thead><tr><th>Expression</th><th>Observed</th><th>Result</th></tr></thead>
                <tbody>
                    {% for t in thresholds %}
                    <tr>
                        <td>{{ t.expression }}</td>
                        <td>{{ t.observed|round(4) }}</td>
                        <td class="{% if t.passed %}pass{% else %}fail{% endif %}">{% if t.passed %}PASS{% else %}FAIL{% endif %}</td>
                    </tr>
                    {% endfor %}
                </tbody>
            </table>
        </div>
        {% endif %}

        <div class="panel">
            <div class="panel-title">Step latency (ms)</div>
            <canvas id="latencyChart"></canvas>
        </div>
    </div>

    <script>
        const latencyData = {{ latency_chart_data|safe }};
        new Chart(document.getElementById('latencyChart'), {
            type: 'bar',
            data: {
                labels: latencyData.map(d => d.step),
                datasets: [
                    { label: 'Avg', data: latencyData.map(d => d.avg), backgroundColor: 'rgb(52, 152, 219)' },
                    { label: 'P95', data: latencyData.map(d => d.p95), backgroundColor: 'rgb(243, 156, 18)' },
                    { label: 'P99', data: latencyData.map(d => d.p99), backgroundColor: 'rgb(231, 76, 60)' },
                ]
            },
            options: {
                responsive: true,
                scales: {
                    x: { grid: { display: false } },
                    y: { grid: { color: 'rgba(255,255,255,0.1)' }, beginAtZero: true }
                }
            }
        });
    </script>
</body>
</html>
"##;
