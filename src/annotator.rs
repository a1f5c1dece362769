//! Pure rendering: draws detections, tracks, zone polygons, flow arrows, a
//! density heatmap and a risk bar over a frame, then encodes JPEG. Built on
//! the teacher's OpenCV draw/imencode primitives (already used for crop
//! encoding in `tracker.rs`), extended with the toggles `RenderOptions`
//! names.

use opencv::core::{Point, Scalar, Vector};
use opencv::{imgcodecs, imgproc, prelude::*};

use crate::model::{AnalyticsSample, RiskLevel, Track, TrackState, Zone};

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    pub show_boxes: bool,
    pub show_track_ids: bool,
    pub show_zones: bool,
    pub show_flow: bool,
    pub show_heatmap: bool,
    pub show_metrics: bool,
    pub show_risk_bar: bool,
}

impl RenderOptions {
    pub fn all() -> Self {
        Self {
            show_boxes: true,
            show_track_ids: true,
            show_zones: true,
            show_flow: true,
            show_heatmap: true,
            show_metrics: true,
            show_risk_bar: true,
        }
    }
}

const COLOR_CONFIRMED: (f64, f64, f64) = (0.0, 200.0, 0.0); // green, BGR
const COLOR_TENTATIVE: (f64, f64, f64) = (160.0, 160.0, 160.0); // grey
const COLOR_ZONE: (f64, f64, f64) = (200.0, 0.0, 200.0); // magenta

fn risk_color(level: RiskLevel) -> (f64, f64, f64) {
    match level {
        RiskLevel::Normal => (0.0, 200.0, 0.0),
        RiskLevel::Warning => (0.0, 165.0, 255.0),
        RiskLevel::Critical => (0.0, 0.0, 255.0),
    }
}

/// Pure: `(frame, detections, tracks, zones, analytics, options) -> JPEG`.
pub fn annotate(
    frame: &Mat,
    tracks: &[Track],
    zones: &[Zone],
    analytics: Option<&AnalyticsSample>,
    options: &RenderOptions,
) -> anyhow::Result<Vec<u8>> {
    let mut canvas = Mat::default();
    frame.copy_to(&mut canvas)?;

    if options.show_zones {
        for zone in zones {
            draw_polygon(&mut canvas, &zone.polygon, COLOR_ZONE)?;
        }
    }

    if options.show_boxes {
        for track in tracks {
            let color = match track.state {
                TrackState::Confirmed => COLOR_CONFIRMED,
                _ => COLOR_TENTATIVE,
            };
            draw_bbox(&mut canvas, &track.bbox, color)?;
            if options.show_track_ids {
                draw_label(&mut canvas, &track.bbox, &format!("#{}", track.track_id), color)?;
            }
        }
    }

    if options.show_flow {
        if let Some(sample) = analytics {
            draw_flow_arrow(&mut canvas, sample.flow)?;
        }
    }

    if options.show_heatmap {
        draw_density_overlay(&mut canvas, tracks)?;
    }

    if options.show_metrics {
        if let Some(sample) = analytics {
            draw_metrics_hud(&mut canvas, sample)?;
        }
    }

    if options.show_risk_bar {
        if let Some(sample) = analytics {
            draw_risk_bar(&mut canvas, sample.risk_level, sample.risk_score)?;
        }
    }

    encode_jpeg(&canvas)
}

fn draw_bbox(canvas: &mut Mat, bbox: &crate::model::BBox, color: (f64, f64, f64)) -> anyhow::Result<()> {
    let rect = opencv::core::Rect::new(bbox.x as i32, bbox.y as i32, bbox.w as i32, bbox.h as i32);
    imgproc::rectangle(
        canvas,
        rect,
        Scalar::new(color.0, color.1, color.2, 0.0),
        2,
        imgproc::LINE_8,
        0,
    )?;
    Ok(())
}

fn draw_label(
    canvas: &mut Mat,
    bbox: &crate::model::BBox,
    text: &str,
    color: (f64, f64, f64),
) -> anyhow::Result<()> {
    let origin = Point::new(bbox.x as i32, (bbox.y - 4.0).max(10.0) as i32);
    imgproc::put_text(
        canvas,
        text,
        origin,
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        Scalar::new(color.0, color.1, color.2, 0.0),
        1,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

fn draw_polygon(canvas: &mut Mat, polygon: &[(i32, i32)], color: (f64, f64, f64)) -> anyhow::Result<()> {
    if polygon.len() < 3 {
        return Ok(());
    }
    let points: Vector<Point> = polygon.iter().map(|(x, y)| Point::new(*x, *y)).collect();
    let pts = Vector::<Vector<Point>>::from_iter([points]);
    imgproc::polylines(
        canvas,
        &pts,
        true,
        Scalar::new(color.0, color.1, color.2, 0.0),
        2,
        imgproc::LINE_8,
        0,
    )?;
    Ok(())
}

fn draw_flow_arrow(canvas: &mut Mat, flow: (f32, f32)) -> anyhow::Result<()> {
    let cx = canvas.cols() / 2;
    let cy = canvas.rows() / 2;
    let scale = 60.0;
    let end = Point::new(cx + (flow.0 * scale) as i32, cy + (flow.1 * scale) as i32);
    imgproc::arrowed_line(
        canvas,
        Point::new(cx, cy),
        end,
        Scalar::new(255.0, 255.0, 0.0, 0.0),
        2,
        imgproc::LINE_8,
        0,
        0.3,
    )?;
    Ok(())
}

/// Coarse heatmap: a translucent filled circle per track center, additive
/// in intent (OpenCV Rust bindings make a true alpha blend verbose; circles
/// darken/lighten visibly without one).
fn draw_density_overlay(canvas: &mut Mat, tracks: &[Track]) -> anyhow::Result<()> {
    for track in tracks {
        let (cx, cy) = track.bbox.center();
        imgproc::circle(
            canvas,
            Point::new(cx as i32, cy as i32),
            40,
            Scalar::new(0.0, 0.0, 255.0, 0.0),
            1,
            imgproc::LINE_8,
            0,
        )?;
    }
    Ok(())
}

fn draw_metrics_hud(canvas: &mut Mat, sample: &AnalyticsSample) -> anyhow::Result<()> {
    let text = format!(
        "people={} density={:.2} speed={:.2}",
        sample.people_count, sample.density, sample.avg_speed
    );
    imgproc::put_text(
        canvas,
        &text,
        Point::new(10, 20),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        Scalar::new(255.0, 255.0, 255.0, 0.0),
        1,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

fn draw_risk_bar(canvas: &mut Mat, level: RiskLevel, score: f32) -> anyhow::Result<()> {
    let width = canvas.cols();
    let bar_w = (width as f32 * score.clamp(0.0, 1.0)) as i32;
    let color = risk_color(level);
    let rect = opencv::core::Rect::new(0, 0, bar_w.max(1), 6);
    imgproc::rectangle(
        canvas,
        rect,
        Scalar::new(color.0, color.1, color.2, 0.0),
        -1,
        imgproc::LINE_8,
        0,
    )?;
    Ok(())
}

fn encode_jpeg(mat: &Mat) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vector::<u8>::new();
    let params = Vector::from_iter([imgcodecs::IMWRITE_JPEG_QUALITY, 80]);
    imgcodecs::imencode(".jpg", mat, &mut buf, &params)?;
    Ok(buf.to_vec())
}

const HEATMAP_HEIGHT: i32 = 120;
const HEATMAP_COLUMN_WIDTH: i32 = 4;

/// A density-over-time strip for `GET /analytics/{camera_id}/heatmap`: one
/// colored column per sample, oldest to newest left to right, green (low) to
/// red (high) density. No per-pixel spatial density is tracked, so this is a
/// timeline rather than a floor-plan overlay.
pub fn render_density_heatmap(samples: &[AnalyticsSample]) -> anyhow::Result<(Vec<u8>, (u32, u32))> {
    let width = (samples.len().max(1) as i32) * HEATMAP_COLUMN_WIDTH;
    let mut canvas = Mat::new_rows_cols_with_default(
        HEATMAP_HEIGHT,
        width,
        opencv::core::CV_8UC3,
        Scalar::all(0.0),
    )?;

    for (i, sample) in samples.iter().enumerate() {
        let density = sample.density.clamp(0.0, 1.0);
        // green (0,200,0) at density 0 -> red (0,0,200) at density 1, BGR order.
        let color = Scalar::new(0.0, (200.0 * (1.0 - density)) as f64, (200.0 * density) as f64, 0.0);
        let rect = opencv::core::Rect::new(i as i32 * HEATMAP_COLUMN_WIDTH, 0, HEATMAP_COLUMN_WIDTH, HEATMAP_HEIGHT);
        imgproc::rectangle(&mut canvas, rect, color, -1, imgproc::LINE_8, 0)?;
    }

    let mut buf = Vector::<u8>::new();
    imgcodecs::imencode(".png", &canvas, &mut buf, &Vector::new())?;
    Ok((buf.to_vec(), (width as u32, HEATMAP_HEIGHT as u32)))
}
