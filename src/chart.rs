//! Error-by-pitch chart rendering
//!
//! Two side-by-side stacked bar panels: absolute correct/incorrect counts on
//! the left and their shares of the bin total on the right. Only off-screen
//! backends are used, so rendering works without a display. PDF output is
//! drawn as SVG first and converted with `svg2pdf`.

use crate::analysis::PitchBin;
use crate::config::ReportConfig;
use crate::error::{EvalError, Result};
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::{Path, PathBuf};
use tracing::info;

const CORRECT_COLOR: RGBColor = RGBColor(0, 128, 0);
const INCORRECT_COLOR: RGBColor = RGBColor(255, 0, 0);

/// Half the width of a bar in bin units
const BAR_HALF_WIDTH: f64 = 0.4;

/// Render the chart once per configured image format
pub fn render_charts(
    bins: &[PitchBin],
    output_dir: &Path,
    report: &ReportConfig,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(report.image_formats.len());
    for format in &report.image_formats {
        let path = output_dir.join(format!("{}.{}", report.bins_stem, format));
        render_error_by_pitch(bins, &path, report)?;
        written.push(path);
    }
    Ok(written)
}

/// Render the chart to `path`; the backend follows the file extension
pub fn render_error_by_pitch(bins: &[PitchBin], path: &Path, report: &ReportConfig) -> Result<()> {
    let size = (report.image_size[0], report.image_size[1]);
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    match extension {
        "svg" => {
            let root = SVGBackend::new(path, size).into_drawing_area();
            draw_error_by_pitch(&root, bins, &report.title)?;
            root.present().map_err(chart_error("write chart"))?;
        }
        "png" => {
            let root = BitMapBackend::new(path, size).into_drawing_area();
            draw_error_by_pitch(&root, bins, &report.title)?;
            root.present().map_err(chart_error("write chart"))?;
        }
        "pdf" => {
            let svg = render_svg_string(bins, report)?;
            let pdf = svg_to_pdf(&svg)?;
            std::fs::write(path, pdf)?;
        }
        other => {
            return Err(EvalError::Chart(format!(
                "unsupported chart format '{}'",
                other
            )))
        }
    }

    info!(path = %path.display(), "rendered chart");
    Ok(())
}

/// Render the chart into an in-memory SVG document
pub fn render_svg_string(bins: &[PitchBin], report: &ReportConfig) -> Result<String> {
    let size = (report.image_size[0], report.image_size[1]);
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, size).into_drawing_area();
        draw_error_by_pitch(&root, bins, &report.title)?;
        root.present().map_err(chart_error("finish svg"))?;
    }
    Ok(svg)
}

fn svg_to_pdf(svg: &str) -> Result<Vec<u8>> {
    let mut options = svg2pdf::usvg::Options::default();
    options.fontdb_mut().load_system_fonts();
    let tree = svg2pdf::usvg::Tree::from_str(svg, &options).map_err(chart_error("parse svg"))?;
    svg2pdf::to_pdf(
        &tree,
        svg2pdf::ConversionOptions::default(),
        svg2pdf::PageOptions::default(),
    )
    .map_err(chart_error("convert svg to pdf"))
}

fn draw_error_by_pitch<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    bins: &[PitchBin],
    title: &str,
) -> Result<()> {
    root.fill(&WHITE).map_err(chart_error("fill background"))?;
    let body = root
        .titled(title, ("sans-serif", 24))
        .map_err(chart_error("draw title"))?;
    let panels = body.split_evenly((1, 2));

    let max_total = bins.iter().map(|b| b.total).max().unwrap_or(0).max(1) as f64;
    draw_stacked_panel(
        &panels[0],
        bins,
        "count",
        max_total * 1.05,
        |b| (b.correct as f64, b.incorrect as f64),
        ("correct", "incorrect"),
    )?;
    draw_stacked_panel(
        &panels[1],
        bins,
        "share of bin",
        1.0,
        |b| {
            (
                b.correct_perc.unwrap_or(0.0),
                b.incorrect_perc.unwrap_or(0.0),
            )
        },
        ("correct_perc", "incorrect_perc"),
    )?;

    Ok(())
}

fn draw_stacked_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    bins: &[PitchBin],
    y_desc: &str,
    y_max: f64,
    values: impl Fn(&PitchBin) -> (f64, f64),
    labels: (&str, &str),
) -> Result<()> {
    let n = bins.len().max(1) as f64;
    let bin_labels: Vec<String> = bins.iter().map(|b| b.bin.to_string()).collect();

    let mut chart = ChartBuilder::on(area)
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5f64..(n - 0.5), 0.0f64..y_max)
        .map_err(chart_error("build chart"))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(bins.len())
        .x_label_formatter(&|x| bin_label(&bin_labels, *x))
        .x_desc("bin")
        .y_desc(y_desc)
        .draw()
        .map_err(chart_error("draw mesh"))?;

    chart
        .draw_series(bins.iter().enumerate().map(|(i, b)| {
            let (lower, _) = values(b);
            let x = i as f64;
            Rectangle::new(
                [(x - BAR_HALF_WIDTH, 0.0), (x + BAR_HALF_WIDTH, lower)],
                CORRECT_COLOR.filled(),
            )
        }))
        .map_err(chart_error("draw bars"))?
        .label(labels.0)
        .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], CORRECT_COLOR.filled()));

    chart
        .draw_series(bins.iter().enumerate().map(|(i, b)| {
            let (lower, upper) = values(b);
            let x = i as f64;
            Rectangle::new(
                [(x - BAR_HALF_WIDTH, lower), (x + BAR_HALF_WIDTH, lower + upper)],
                INCORRECT_COLOR.filled(),
            )
        }))
        .map_err(chart_error("draw bars"))?
        .label(labels.1)
        .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], INCORRECT_COLOR.filled()));

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(chart_error("draw legend"))?;

    Ok(())
}

/// Axis label for a bar position; blank between bars
pub fn bin_label(labels: &[String], x: f64) -> String {
    let idx = x.round();
    if (x - idx).abs() > 1e-6 || idx < 0.0 {
        return String::new();
    }
    labels.get(idx as usize).cloned().unwrap_or_default()
}

fn chart_error<E: std::fmt::Debug>(action: &'static str) -> impl Fn(E) -> EvalError {
    move |e| EvalError::Chart(format!("Failed to {}: {:?}", action, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_label_positions() {
        let labels: Vec<String> = ["0", "8", "16"].iter().map(|s| s.to_string()).collect();
        assert_eq!(bin_label(&labels, 0.0), "0");
        assert_eq!(bin_label(&labels, 2.0), "16");
        assert_eq!(bin_label(&labels, 1.5), "");
        assert_eq!(bin_label(&labels, -1.0), "");
        assert_eq!(bin_label(&labels, 3.0), "");
    }

    fn sample_bins() -> Vec<PitchBin> {
        (0..16u32)
            .map(|i| match i {
                3 => PitchBin::from_counts(i * 8, 0, 0),
                _ => PitchBin::from_counts(i * 8, u64::from(i) + 1, 2),
            })
            .collect()
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = render_error_by_pitch(
            &sample_bins(),
            &dir.path().join("chart.gif"),
            &ReportConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::Chart(_)));
    }

    #[test]
    fn test_svg_chart_has_title_and_bars() {
        let report = ReportConfig::default();
        let svg = render_svg_string(&sample_bins(), &report).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains(&report.title));
        assert!(svg.contains("<rect"));
    }

    #[test]
    fn test_render_charts_writes_every_format() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = ReportConfig::default();
        report.image_formats = vec!["pdf".to_string(), "svg".to_string()];

        let written = render_charts(&sample_bins(), dir.path(), &report).unwrap();
        assert_eq!(
            written,
            vec![
                dir.path().join("error_by_midi_valid_bins.pdf"),
                dir.path().join("error_by_midi_valid_bins.svg"),
            ]
        );

        let pdf = std::fs::read(&written[0]).unwrap();
        assert!(pdf.starts_with(b"%PDF"));
        let svg = std::fs::read_to_string(&written[1]).unwrap();
        assert!(!svg.is_empty());
        assert!(svg.contains(&report.title));
    }
}
