//! Appearance re-identification stage.
//!
//! `Extract(image, bbox) -> embedding of dimension E=512`. New relative to
//! the teacher — it only ever cropped and timestamped. Reuses the teacher's
//! crop/resize primitives (see `detector.rs`'s letterbox) for a different
//! purpose: producing a fixed-length, L2-normalized appearance signature.

use opencv::core::{Mat, Rect, Vector};
use opencv::{imgproc, prelude::*};

use crate::model::BBox;

pub const EMBEDDING_DIM: usize = 512;
const APPEARANCE_DIM: usize = 256;
const COLOR_DIM: usize = 256;
const APPEARANCE_GRID: i32 = 16; // 16x16 = 256 cells

/// Re-id capability — concrete implementations are injected at startup.
pub trait ReidExtractor: Send + Sync {
    fn extract(&self, frame: &Mat, bbox: &BBox) -> Option<Vec<f32>>;
}

pub struct FusionReid;

impl ReidExtractor for FusionReid {
    fn extract(&self, frame: &Mat, bbox: &BBox) -> Option<Vec<f32>> {
        let crop = crop_bbox(frame, bbox)?;
        let appearance = appearance_feature(&crop).ok()?;
        let color = color_histogram(&crop).ok()?;

        let mut fused = Vec::with_capacity(EMBEDDING_DIM);
        fused.extend_from_slice(&appearance);
        fused.extend_from_slice(&color);
        l2_normalize(&mut fused);
        Some(fused)
    }
}

fn crop_bbox(frame: &Mat, bbox: &BBox) -> Option<Mat> {
    let fw = frame.cols();
    let fh = frame.rows();
    let x1 = (bbox.x as i32).clamp(0, fw.max(1) - 1);
    let y1 = (bbox.y as i32).clamp(0, fh.max(1) - 1);
    let x2 = ((bbox.x + bbox.w) as i32).clamp(x1 + 1, fw);
    let y2 = ((bbox.y + bbox.h) as i32).clamp(y1 + 1, fh);
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    let roi = Rect::new(x1, y1, x2 - x1, y2 - y1);
    Mat::roi(frame, roi).ok().and_then(|r| r.try_clone().ok())
}

/// Coarse appearance signature: grayscale, resized to a fixed grid,
/// intensities normalized to [0,1]. Grounded on `detector.rs`'s
/// `mat_to_chw_f32` pixel-normalization idiom, repurposed for a single-
/// channel fixed-size descriptor instead of a model input tensor.
fn appearance_feature(crop: &Mat) -> anyhow::Result<[f32; APPEARANCE_DIM]> {
    let mut gray = Mat::default();
    imgproc::cvt_color(crop, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;

    let mut resized = Mat::default();
    imgproc::resize(
        &gray,
        &mut resized,
        opencv::core::Size::new(APPEARANCE_GRID, APPEARANCE_GRID),
        0.0,
        0.0,
        imgproc::INTER_AREA,
    )?;

    let data = resized.data_bytes()?;
    let mut out = [0f32; APPEARANCE_DIM];
    for (i, px) in data.iter().take(APPEARANCE_DIM).enumerate() {
        out[i] = *px as f32 / 255.0;
    }
    Ok(out)
}

/// HSV color histogram (16 hue bins x 16 saturation bins = 256), normalized
/// to sum to 1.
fn color_histogram(crop: &Mat) -> anyhow::Result<[f32; COLOR_DIM]> {
    let mut hsv = Mat::default();
    imgproc::cvt_color(crop, &mut hsv, imgproc::COLOR_BGR2HSV, 0)?;

    let images = Vector::<Mat>::from_iter([hsv]);
    let channels = Vector::<i32>::from_iter([0, 1]);
    let hist_size = Vector::<i32>::from_iter([16, 16]);
    let ranges = Vector::<f32>::from_iter([0.0, 180.0, 0.0, 256.0]);
    let mask = Mat::default();

    let mut hist = Mat::default();
    imgproc::calc_hist(
        &images,
        &channels,
        &mask,
        &mut hist,
        &hist_size,
        &ranges,
        false,
    )?;

    let total: f32 = {
        let mut sum = 0f32;
        let flat = hist.reshape(1, 1)?;
        for i in 0..flat.cols() {
            sum += *flat.at::<f32>(i)?;
        }
        sum
    };

    let mut out = [0f32; COLOR_DIM];
    if total > 0.0 {
        let flat = hist.reshape(1, 1)?;
        for i in 0..(COLOR_DIM as i32).min(flat.cols()) {
            out[i as usize] = *flat.at::<f32>(i)? / total;
        }
    }
    Ok(out)
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// `e <- (1-alpha) e + alpha e_new`, renormalized so the invariant L2 norm
/// stays in [0.95, 1.05] holds after update.
pub fn ema_update(current: &mut Vec<f32>, new: &[f32], alpha: f32) {
    if current.is_empty() {
        *current = new.to_vec();
        l2_normalize(current);
        return;
    }
    for (c, n) in current.iter_mut().zip(new.iter()) {
        *c = (1.0 - alpha) * *c + alpha * *n;
    }
    l2_normalize(current);
}

/// Cosine similarity in [-1,1], clipped to [0,1] for downstream thresholds.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= 1e-12 || norm_b <= 1e-12 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_normalize_unit_vector() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ema_update_stays_within_norm_invariant() {
        let mut current = vec![1.0, 0.0, 0.0];
        l2_normalize(&mut current);
        let new = vec![0.0, 1.0, 0.0];
        for _ in 0..20 {
            ema_update(&mut current, &new, 0.3);
            let norm: f32 = current.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!(norm >= 0.95 && norm <= 1.05, "norm {norm} out of invariant range");
        }
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let a = vec![0.6, 0.8];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn cosine_similarity_never_negative_after_clip() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
