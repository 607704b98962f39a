use super::types::{Detection, NormalizedRegion, QualityTag};

const BASE_SCORE: f32 = 0.5;
const SIZE_WEIGHT: f32 = 0.3;
const CONFIDENCE_WEIGHT: f32 = 0.4;
const CENTRALITY_WEIGHT: f32 = 0.2;

/// Heuristic face quality in `[0, 1]`.
///
/// Larger, more central, higher-confidence faces score higher; provider tags
/// and description keywords nudge the result up or down.
#[derive(Debug, Clone, Default)]
pub struct QualityScorer;

impl QualityScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(
        &self,
        detection: &Detection,
        region: &NormalizedRegion,
        image_width: u32,
        image_height: u32,
    ) -> f32 {
        let (w, h) = (image_width.max(1) as f32, image_height.max(1) as f32);

        // Area as a fraction of the image.
        let normalized_area = (region.width as f32 / w) * (region.height as f32 / h);
        let size_term = (normalized_area * 10.0).min(1.0);

        // Distance from the image center in percentage space.
        let cx = (region.x as f32 + region.width as f32 / 2.0) / w * 100.0;
        let cy = (region.y as f32 + region.height as f32 / 2.0) / h * 100.0;
        let distance = ((cx - 50.0).powi(2) + (cy - 50.0).powi(2)).sqrt();
        let max_distance = (50.0f32 * 50.0 + 50.0 * 50.0).sqrt();
        let centrality_term = (1.0 - distance / max_distance).max(0.0);

        let confidence = if detection.confidence.is_finite() {
            detection.confidence
        } else {
            0.0
        };

        let score = BASE_SCORE
            + SIZE_WEIGHT * size_term
            + CONFIDENCE_WEIGHT * (confidence / 100.0)
            + CENTRALITY_WEIGHT * centrality_term
            + tag_bonus(detection);

        score.clamp(0.0, 1.0)
    }
}

fn tag_bonus(detection: &Detection) -> f32 {
    let description = detection.description.to_lowercase();
    let mut bonus = 0.0;

    if detection.quality == QualityTag::Clear {
        bonus += 0.1;
    }
    if description.contains("frontal") {
        bonus += 0.1;
    }
    if description.contains("profile") {
        bonus -= 0.1;
    }
    if description.contains("blurry") {
        bonus -= 0.2;
    }

    bonus
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faces::types::BoundingBox;

    fn detection(confidence: f32, description: &str) -> Detection {
        Detection::new("f", BoundingBox::new(0.0, 0.0, 1.0, 1.0), confidence)
            .with_description(description)
    }

    const CENTERED: NormalizedRegion = NormalizedRegion { x: 270, y: 190, width: 100, height: 100 };

    #[test]
    fn test_score_components() {
        // Small centered face: area 100*100 / (640*480) = 0.0326 -> size term 0.326.
        let score = QualityScorer::new().score(&detection(50.0, ""), &CENTERED, 640, 480);
        let expected: f32 = 0.5 + 0.3 * (10_000.0 / 307_200.0 * 10.0) + 0.4 * 0.5 + 0.2 * 1.0;
        assert!((score - expected.min(1.0)).abs() < 1e-4, "{} vs {}", score, expected);
    }

    #[test]
    fn test_corner_face_scores_lower() {
        let scorer = QualityScorer::new();
        let corner = NormalizedRegion { x: 0, y: 0, width: 10, height: 10 };
        let d = detection(0.0, "blurry profile");

        let centered = scorer.score(&d, &CENTERED, 640, 480);
        let cornered = scorer.score(&d, &corner, 640, 480);
        assert!(cornered < centered);
    }

    #[test]
    fn test_tag_bonuses_are_additive() {
        let scorer = QualityScorer::new();
        let tiny = NormalizedRegion { x: 0, y: 0, width: 1, height: 1 };

        let plain = scorer.score(&detection(0.0, ""), &tiny, 1000, 1000);
        let blurry_profile = scorer.score(&detection(0.0, "Blurry PROFILE shot"), &tiny, 1000, 1000);
        assert!((plain - blurry_profile - 0.3).abs() < 1e-4);

        let clear_frontal = scorer.score(
            &detection(0.0, "frontal view").with_quality(QualityTag::Clear),
            &tiny,
            1000,
            1000,
        );
        assert!((clear_frontal - plain - 0.2).abs() < 1e-4);
    }

    #[test]
    fn test_score_always_in_unit_range() {
        let scorer = QualityScorer::new();
        let regions = [
            CENTERED,
            NormalizedRegion { x: 0, y: 0, width: 640, height: 480 },
            NormalizedRegion { x: 639, y: 479, width: 1, height: 1 },
        ];
        let confidences = [-1e9, -100.0, 0.0, 55.5, 100.0, 250.0, 1e9, f32::NAN, f32::INFINITY];
        let descriptions = ["", "clear frontal", "blurry profile blurry", "🙂 unknown text"];

        for region in &regions {
            for &confidence in &confidences {
                for description in &descriptions {
                    let score = scorer.score(&detection(confidence, description), region, 640, 480);
                    assert!((0.0..=1.0).contains(&score), "score {} out of range", score);
                }
            }
        }
    }
}
