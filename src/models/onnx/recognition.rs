//! CRNN text recognition with greedy CTC decoding.

use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::Array4;
use tracing::{debug, warn};

use super::preprocess::{Normalize, width_at_height};
use super::session::{OnnxSession, tensor_view};
use crate::core::errors::BatchError;
use crate::domain::{PageText, TextLine};
use crate::models::{DetectionModel, PageBatch, RecognitionModel, RecognitionOptions};
use crate::processors::Rect;
use crate::utils::BBoxCrop;

/// Height every line crop is resized to.
pub const REC_IMAGE_HEIGHT: u32 = 48;
/// Widest crop fed to the recognizer after resizing.
pub const REC_MAX_WIDTH: u32 = 3200;

/// Greedy CTC decoding over a character dictionary.
///
/// Index 0 is the CTC blank, followed by the dictionary entries and a
/// trailing space.
#[derive(Debug, Clone)]
pub struct CtcDecoder {
    charset: Vec<String>,
}

impl CtcDecoder {
    pub fn from_dictionary(entries: impl IntoIterator<Item = String>) -> Self {
        let mut charset = vec![String::new()];
        charset.extend(entries);
        charset.push(" ".to_string());
        Self { charset }
    }

    pub fn vocab_len(&self) -> usize {
        self.charset.len()
    }

    /// Decodes one sequence of `steps` rows of per-class probabilities.
    ///
    /// Repeated indices collapse and blanks are dropped. The confidence is the
    /// mean probability of the kept characters, 0.0 for an empty result.
    pub fn decode(&self, probs: &[f32], classes: usize) -> (String, f32) {
        let mut text = String::new();
        let mut kept = Vec::new();
        let mut previous = 0usize;

        for step in probs.chunks_exact(classes.max(1)) {
            let (index, prob) = step
                .iter()
                .copied()
                .enumerate()
                .fold((0, f32::MIN), |best, (i, p)| if p > best.1 { (i, p) } else { best });
            if index != 0 && index != previous {
                if let Some(ch) = self.charset.get(index) {
                    text.push_str(ch);
                    kept.push(prob);
                }
            }
            previous = index;
        }

        let confidence = if kept.is_empty() {
            0.0
        } else {
            kept.iter().sum::<f32>() / kept.len() as f32
        };
        (text, confidence)
    }
}

/// Recognition model backed by an ONNX session.
///
/// Lines are found by running the detector on the same high-resolution
/// batch, then cropped and decoded in width-sorted chunks.
#[derive(Debug)]
pub struct OnnxTextRecognizer {
    session: OnnxSession,
    decoder: CtcDecoder,
    batch_size: usize,
}

impl OnnxTextRecognizer {
    pub fn new(session: OnnxSession, decoder: CtcDecoder, batch_size: usize) -> Self {
        Self {
            session,
            decoder,
            batch_size: batch_size.max(1),
        }
    }

    /// Decodes each crop, preserving input order.
    fn recognize_crops(&self, crops: &[RgbImage]) -> Result<Vec<(String, f32)>, BatchError> {
        let mut order: Vec<usize> = (0..crops.len()).collect();
        order.sort_by(|&a, &b| {
            let ratio = |i: usize| crops[i].width() as f32 / crops[i].height().max(1) as f32;
            ratio(a).total_cmp(&ratio(b))
        });

        let mut results = vec![(String::new(), 0.0); crops.len()];
        for chunk in order.chunks(self.batch_size) {
            let widths: Vec<u32> = chunk
                .iter()
                .map(|&i| {
                    width_at_height(crops[i].width(), crops[i].height(), REC_IMAGE_HEIGHT, REC_MAX_WIDTH)
                })
                .collect();
            let max_width = widths.iter().copied().max().unwrap_or(1);

            let mut pixels =
                Array4::<f32>::zeros((chunk.len(), 3, REC_IMAGE_HEIGHT as usize, max_width as usize));
            for (slot, (&i, &width)) in chunk.iter().zip(&widths).enumerate() {
                let resized = imageops::resize(&crops[i], width, REC_IMAGE_HEIGHT, FilterType::Triangle);
                Normalize::SYMMETRIC.write(&resized, &mut pixels, slot);
            }

            let input = tensor_view(&pixels).map_err(|e| self.session.error("input tensor", e))?;
            let mut session = self.session.lock()?;
            let outputs = session
                .run(ort::inputs![input])
                .map_err(|e| self.session.error("forward pass", e))?;
            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| self.session.error("output extraction", e))?;

            // [N, T, C]
            if shape.len() != 3 || shape[0] as usize != chunk.len() {
                return Err(BatchError::inference(
                    self.session.name(),
                    format!("unexpected output shape {:?} for {} crops", &shape[..], chunk.len()),
                ));
            }
            let classes = shape[2] as usize;
            if classes != self.decoder.vocab_len() {
                debug!(
                    "{}: output has {} classes, dictionary has {}",
                    self.session.name(),
                    classes,
                    self.decoder.vocab_len()
                );
            }
            let per_crop = shape[1] as usize * classes;
            for (slot, &i) in chunk.iter().enumerate() {
                let probs = &data[slot * per_crop..(slot + 1) * per_crop];
                results[i] = self.decoder.decode(probs, classes);
            }
        }
        Ok(results)
    }
}

impl RecognitionModel for OnnxTextRecognizer {
    fn recognize(
        &self,
        batch: &PageBatch<'_>,
        detector: &dyn DetectionModel,
        _options: RecognitionOptions,
    ) -> Result<Vec<PageText>, BatchError> {
        let detections = detector.detect(batch)?;
        BatchError::check_batch_len("detection", batch.len(), detections.len())?;

        let mut pages = Vec::with_capacity(batch.len());
        for (image, detection) in batch.images.iter().zip(detections) {
            let mut boxes = Vec::with_capacity(detection.bboxes.len());
            let mut crops = Vec::with_capacity(detection.bboxes.len());
            for found in detection.bboxes {
                match BBoxCrop::crop_rect(image, &found.bbox) {
                    Ok(crop) => {
                        boxes.push(found.bbox);
                        crops.push(crop);
                    }
                    Err(e) => warn!("{}: skipping line crop: {}", batch.document_id, e),
                }
            }

            let lines = boxes
                .into_iter()
                .zip(self.recognize_crops(&crops)?)
                .filter(|(_, (text, _))| !text.trim().is_empty())
                .map(|(bbox, (text, confidence))| TextLine::new(bbox, text, confidence))
                .collect();
            pages.push(PageText::new(lines, Rect::from_size(image.width(), image.height())));
        }
        Ok(pages)
    }
}
