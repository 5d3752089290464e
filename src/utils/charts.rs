//! SVG line charts for per-epoch training curves.

use std::fs;
use std::path::Path;

const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 80.0;
const MARGIN_LEFT: f64 = 80.0;

pub const COLOR_TRAIN: &str = "#3498db";
pub const COLOR_VALIDATION: &str = "#e74c3c";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

/// A data series for a line chart
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub points: Vec<(f64, f64)>,
    pub color: String,
}

impl DataSeries {
    /// Series indexed by epoch (1-based on the x axis)
    pub fn per_epoch(name: &str, values: &[f64], color: &str) -> Self {
        Self {
            name: name.to_string(),
            points: values
                .iter()
                .enumerate()
                .map(|(i, v)| ((i + 1) as f64, *v))
                .collect(),
            color: color.to_string(),
        }
    }
}

/// Render a line chart to `output_path` as SVG.
///
/// The y axis spans the data range padded by 5%; flat or single-point
/// series still get a non-degenerate axis.
pub fn generate_line_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    series: &[DataSeries],
    output_path: &Path,
) -> std::io::Result<()> {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let (x_min, x_max, y_min, y_max) = find_ranges(series);

    let scale_x = |x: f64| MARGIN_LEFT + ((x - x_min) / (x_max - x_min)) * plot_width;
    let scale_y = |y: f64| MARGIN_TOP + plot_height - ((y - y_min) / (y_max - y_min)) * plot_height;

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}">"#,
        w = CHART_WIDTH,
        h = CHART_HEIGHT
    ));
    svg.push_str(&format!(
        r#"<rect width="{}" height="{}" fill="white"/>"#,
        CHART_WIDTH, CHART_HEIGHT
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="35" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        CHART_WIDTH / 2.0,
        COLOR_TEXT,
        escape_xml(title)
    ));

    for i in 0..=5 {
        let value = y_min + (i as f64 / 5.0) * (y_max - y_min);
        let y = scale_y(value);
        svg.push_str(&format!(
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
            MARGIN_LEFT,
            y,
            MARGIN_LEFT + plot_width,
            y,
            COLOR_GRID
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}">{:.3}</text>"#,
            MARGIN_LEFT - 10.0,
            y + 4.0,
            COLOR_TEXT,
            value
        ));
    }

    // Axes
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT,
        MARGIN_TOP + plot_height,
        MARGIN_LEFT + plot_width,
        MARGIN_TOP + plot_height,
        COLOR_AXIS
    ));
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT,
        MARGIN_TOP,
        MARGIN_LEFT,
        MARGIN_TOP + plot_height,
        COLOR_AXIS
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">{}</text>"#,
        MARGIN_LEFT + plot_width / 2.0,
        CHART_HEIGHT - 20.0,
        COLOR_TEXT,
        escape_xml(x_label)
    ));
    svg.push_str(&format!(
        r#"<text x="20" y="{mid}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}" transform="rotate(-90 20 {mid})">{}</text>"#,
        COLOR_TEXT,
        escape_xml(y_label),
        mid = CHART_HEIGHT / 2.0
    ));

    for data in series.iter().filter(|s| !s.points.is_empty()) {
        let path: Vec<String> = data
            .points
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| {
                let cmd = if i == 0 { "M" } else { "L" };
                format!("{} {} {}", cmd, scale_x(x), scale_y(y))
            })
            .collect();
        svg.push_str(&format!(
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="3"/>"#,
            path.join(" "),
            data.color
        ));
        for &(x, y) in &data.points {
            svg.push_str(&format!(
                r#"<circle cx="{}" cy="{}" r="4" fill="{}" stroke="white" stroke-width="2"/>"#,
                scale_x(x),
                scale_y(y),
                data.color
            ));
        }
    }

    if let Some(first) = series.first() {
        for &(x, _) in &first.points {
            svg.push_str(&format!(
                r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="11" fill="{}">{:.0}</text>"#,
                scale_x(x),
                MARGIN_TOP + plot_height + 20.0,
                COLOR_TEXT,
                x
            ));
        }
    }

    // Legend
    let mut legend_y = MARGIN_TOP + 10.0;
    for data in series {
        svg.push_str(&format!(
            r#"<rect x="{}" y="{}" width="15" height="15" fill="{}"/>"#,
            CHART_WIDTH - MARGIN_RIGHT - 120.0,
            legend_y,
            data.color
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            CHART_WIDTH - MARGIN_RIGHT - 100.0,
            legend_y + 12.0,
            COLOR_TEXT,
            escape_xml(&data.name)
        ));
        legend_y += 25.0;
    }

    svg.push_str("</svg>");
    fs::write(output_path, svg)
}

fn find_ranges(series: &[DataSeries]) -> (f64, f64, f64, f64) {
    let mut x_min = f64::MAX;
    let mut x_max = f64::MIN;
    let mut y_min = f64::MAX;
    let mut y_max = f64::MIN;

    for &(x, y) in series.iter().flat_map(|s| s.points.iter()) {
        if !y.is_finite() {
            continue;
        }
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }

    if x_min > x_max {
        return (0.0, 1.0, 0.0, 1.0);
    }
    if (x_max - x_min).abs() < f64::EPSILON {
        x_min -= 1.0;
        x_max += 1.0;
    }
    let pad = ((y_max - y_min) * 0.05).max(1e-3);
    (x_min, x_max, y_min - pad, y_max + pad)
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
