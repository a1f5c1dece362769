//! Person detector stage.
//!
//! `Detect(image) -> [Detection]`, filtered to class `person`, confidence ≥
//! `ConfThreshold`, after NMS. Stateless from the caller's point of view —
//! `YoloDetector` holds a loaded ONNX Runtime session but never mutates
//! shared state, matching the capability-interface design note.

use anyhow::Result;
use ndarray::{Array, CowArray};
use opencv::core::Mat;
use opencv::{imgproc, prelude::*};
use ort::{Environment, Session, SessionBuilder, Value};
use std::sync::Arc;

use crate::model::BBox;

/// COCO class id for "person" in the standard YOLOv8 label map.
const PERSON_CLASS_ID: usize = 0;

#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
}

/// Detector capability — concrete implementations are injected at startup.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Mat) -> Vec<Detection>;
}

pub struct YoloDetector {
    session: Session,
    input_size: u32,
    conf_threshold: f32,
    nms_threshold: f32,
}

impl YoloDetector {
    pub fn new(
        model_path: &str,
        input_size: u32,
        conf_threshold: f32,
        nms_threshold: f32,
        use_openvino: bool,
    ) -> Result<Self> {
        let env = Arc::new(Environment::builder().with_name("crowdmon_detector").build()?);

        let mut builder = SessionBuilder::new(&env)?
            .with_optimization_level(ort::GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?;

        if use_openvino {
            builder = builder.with_execution_providers([
                ort::ExecutionProvider::OpenVINO(ort::OpenVINOExecutionProviderOptions::default()),
                ort::ExecutionProvider::CPU(Default::default()),
            ])?;
        } else {
            builder = builder.with_execution_providers([
                ort::ExecutionProvider::XNNPACK(Default::default()),
                ort::ExecutionProvider::CPU(Default::default()),
            ])?;
        }

        let session = builder.with_model_from_file(model_path)?;

        Ok(Self { session, input_size, conf_threshold, nms_threshold })
    }

    fn run_inference(&self, frame: &Mat) -> Result<Vec<Detection>> {
        let sz = self.input_size as i32;
        let (letterboxed, scale, pad_x, pad_y) = letterbox(frame, sz)?;

        let mut rgb = Mat::default();
        imgproc::cvt_color(&letterboxed, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
        let data = mat_to_chw_f32(&rgb, sz as usize)?;

        let array = CowArray::from(
            Array::from_shape_vec((1, 3, sz as usize, sz as usize), data)?.into_dyn(),
        );
        let inputs = vec![Value::from_array(self.session.allocator(), &array)?];
        let outputs = self.session.run(inputs)?;

        let output = outputs[0].try_extract::<f32>()?;
        let view = output.view();
        let shape = view.shape();
        let num_boxes = shape[2];
        let num_classes = shape[1] - 4;

        let mut candidates = Vec::new();
        for i in 0..num_boxes {
            let score = view[[0, 4 + PERSON_CLASS_ID, i]];
            if score < self.conf_threshold {
                continue;
            }
            // Confirm this is the argmax class for the box, not just "person
            // scored above threshold while something else scored higher".
            let mut max_score = score;
            for c in 0..num_classes {
                let s = view[[0, 4 + c, i]];
                if s > max_score {
                    max_score = s;
                }
            }
            if max_score > score {
                continue;
            }

            let cx = view[[0, 0, i]];
            let cy = view[[0, 1, i]];
            let bw = view[[0, 2, i]];
            let bh = view[[0, 3, i]];

            let s = sz as f32;
            let x1 = ((cx - bw / 2.0 - pad_x as f32) / scale as f32).max(0.0);
            let y1 = ((cy - bh / 2.0 - pad_y as f32) / scale as f32).max(0.0);
            let x2 = ((cx + bw / 2.0 - pad_x as f32) / scale as f32).min(s / scale as f32);
            let y2 = ((cy + bh / 2.0 - pad_y as f32) / scale as f32).min(s / scale as f32);

            if x2 <= x1 || y2 <= y1 {
                continue;
            }

            candidates.push(Detection {
                bbox: BBox { x: x1, y: y1, w: x2 - x1, h: y2 - y1 },
                confidence: score,
            });
        }

        Ok(non_max_suppression(candidates, self.nms_threshold))
    }
}

impl Detector for YoloDetector {
    fn detect(&self, frame: &Mat) -> Vec<Detection> {
        match self.run_inference(frame) {
            Ok(detections) => detections,
            Err(err) => {
                tracing::warn!("detector inference failed: {:#}", err);
                Vec::new()
            }
        }
    }
}

fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
    let mut kept: Vec<Detection> = Vec::new();
    'outer: for c in candidates {
        for k in &kept {
            if iou(&c.bbox, &k.bbox) > iou_threshold {
                continue 'outer;
            }
        }
        kept.push(c);
    }
    kept
}

pub fn iou(a: &BBox, b: &BBox) -> f32 {
    let ax2 = a.x + a.w;
    let ay2 = a.y + a.h;
    let bx2 = b.x + b.w;
    let by2 = b.y + b.h;

    let ix1 = a.x.max(b.x);
    let iy1 = a.y.max(b.y);
    let ix2 = ax2.min(bx2);
    let iy2 = ay2.min(by2);

    let iw = (ix2 - ix1).max(0.0);
    let ih = (iy2 - iy1).max(0.0);
    let inter = iw * ih;
    if inter <= 0.0 {
        return 0.0;
    }

    let area_a = a.w * a.h;
    let area_b = b.w * b.h;
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

fn letterbox(src: &Mat, target: i32) -> Result<(Mat, f64, i32, i32)> {
    use opencv::core::{Scalar, Size};
    let w = src.cols();
    let h = src.rows();
    let scale = (target as f64 / w.max(h) as f64).min(1.0);
    let new_w = (w as f64 * scale) as i32;
    let new_h = (h as f64 * scale) as i32;

    let mut resized = Mat::default();
    imgproc::resize(src, &mut resized, Size::new(new_w, new_h), 0.0, 0.0, imgproc::INTER_LINEAR)?;

    let pad_x = (target - new_w) / 2;
    let pad_y = (target - new_h) / 2;

    let mut padded = Mat::default();
    opencv::core::copy_make_border(
        &resized,
        &mut padded,
        pad_y,
        target - new_h - pad_y,
        pad_x,
        target - new_w - pad_x,
        opencv::core::BORDER_CONSTANT,
        Scalar::new(114.0, 114.0, 114.0, 0.0),
    )?;

    Ok((padded, scale, pad_x, pad_y))
}

fn mat_to_chw_f32(mat: &Mat, size: usize) -> Result<Vec<f32>> {
    let total = 3 * size * size;
    let mut out = vec![0f32; total];
    let data = mat.data_bytes()?;

    for h in 0..size {
        for w in 0..size {
            let pixel_idx = (h * size + w) * 3;
            for c in 0..3usize {
                let chw_idx = c * size * size + h * size + w;
                out[chw_idx] = data[pixel_idx + c] as f32 / 255.0;
            }
        }
    }
    Ok(out)
}
