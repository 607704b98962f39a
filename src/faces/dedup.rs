//! Merging of duplicate detections from a single provider response.
//!
//! Vision models regularly report the same face twice with slightly
//! different boxes. Pairs are compared in percentage space and duplicate
//! groups collapse into one [`Detection`] with `merged_from > 1`.

use std::collections::HashSet;

use super::types::{BoundingBox, Detection, QualityTag};
use crate::config::{DedupConfig, GroupingStrategy};

/// Intersection over Union of two boxes in the same coordinate space.
pub fn compute_iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let union = a.area() + b.area() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Euclidean distance between box centers, in the boxes' own units.
pub fn center_distance(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let (ax, ay) = a.center();
    let (bx, by) = b.center();
    ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
}

/// `min(area) / max(area)`, 0 when either box is empty.
pub fn size_similarity(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let (area_a, area_b) = (a.area(), b.area());
    if area_a <= 0.0 || area_b <= 0.0 {
        return 0.0;
    }
    area_a.min(area_b) / area_a.max(area_b)
}

/// Summary of one deduplication pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupStats {
    pub original: usize,
    pub remaining: usize,
    pub removed: usize,
    pub merged_groups: usize,
    /// Percentage of input detections removed.
    pub rate: f32,
}

pub struct Deduplicator {
    config: DedupConfig,
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    /// High overlap, or close centers with similar sizes.
    pub fn are_duplicates(&self, a: &Detection, b: &Detection) -> bool {
        let (ba, bb) = (&a.bounding_box, &b.bounding_box);

        let iou = compute_iou(ba, bb);
        if iou >= self.config.overlap_threshold {
            return true;
        }

        center_distance(ba, bb) <= self.config.max_center_distance
            && size_similarity(ba, bb) >= self.config.min_size_similarity
    }

    /// Collapse duplicate groups. Groups appear in the order of their first
    /// member; detections without duplicates are returned untouched.
    ///
    /// Grouping repeats on its own output until no two results are
    /// duplicates, so a merged box that lands next to a detection left out
    /// of its group is folded in as well.
    pub fn deduplicate(&self, detections: &[Detection]) -> Vec<Detection> {
        let mut current = detections.to_vec();
        let mut passes = 0;

        while current.len() > 1 {
            let groups = match self.config.grouping {
                GroupingStrategy::Complete => self.complete_groups(&current),
                GroupingStrategy::Transitive => self.transitive_groups(&current),
            };
            if groups.len() == current.len() {
                break;
            }

            current = groups
                .iter()
                .map(|group| {
                    let members: Vec<&Detection> = group.iter().map(|&i| &current[i]).collect();
                    merge_group(&members)
                })
                .collect();
            passes += 1;
        }

        let removed = detections.len() - current.len();
        if removed > 0 {
            tracing::info!(
                original = detections.len(),
                remaining = current.len(),
                removed,
                passes,
                "Merged duplicate face detections"
            );
        }

        current
    }

    pub fn stats(&self, original: &[Detection], deduplicated: &[Detection]) -> DedupStats {
        let removed = original.len().saturating_sub(deduplicated.len());
        DedupStats {
            original: original.len(),
            remaining: deduplicated.len(),
            removed,
            merged_groups: deduplicated.iter().filter(|d| d.merged_from > 1).count(),
            rate: if original.is_empty() {
                0.0
            } else {
                removed as f32 / original.len() as f32 * 100.0
            },
        }
    }

    /// Greedy complete linkage: a candidate joins the open group only if it
    /// duplicates every member already in it.
    fn complete_groups(&self, detections: &[Detection]) -> Vec<Vec<usize>> {
        let mut assigned = vec![false; detections.len()];
        let mut groups = Vec::new();

        for i in 0..detections.len() {
            if assigned[i] {
                continue;
            }

            let mut group = vec![i];
            assigned[i] = true;

            for j in (i + 1)..detections.len() {
                if assigned[j] {
                    continue;
                }
                if group.iter().all(|&m| self.are_duplicates(&detections[m], &detections[j])) {
                    group.push(j);
                    assigned[j] = true;
                }
            }

            groups.push(group);
        }

        groups
    }

    /// Connected components of the duplicate relation.
    fn transitive_groups(&self, detections: &[Detection]) -> Vec<Vec<usize>> {
        let mut parent: Vec<usize> = (0..detections.len()).collect();

        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }

        for i in 0..detections.len() {
            for j in (i + 1)..detections.len() {
                if self.are_duplicates(&detections[i], &detections[j]) {
                    let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                    if ri != rj {
                        // Smallest index stays root so group order follows first occurrence.
                        parent[ri.max(rj)] = ri.min(rj);
                    }
                }
            }
        }

        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut root_slot: Vec<Option<usize>> = vec![None; detections.len()];

        for i in 0..detections.len() {
            let root = find(&mut parent, i);
            match root_slot[root] {
                Some(slot) => groups[slot].push(i),
                None => {
                    root_slot[root] = Some(groups.len());
                    groups.push(vec![i]);
                }
            }
        }

        groups
    }
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

fn merge_group(members: &[&Detection]) -> Detection {
    if let [single] = members {
        return (*single).clone();
    }

    // First member wins ties.
    let best = members
        .iter()
        .copied()
        .reduce(|best, d| if d.confidence > best.confidence { d } else { best })
        .unwrap_or(members[0]);

    let n = members.len() as f32;
    let sum = members.iter().fold(BoundingBox::new(0.0, 0.0, 0.0, 0.0), |acc, d| {
        BoundingBox::new(
            acc.x + d.bounding_box.x,
            acc.y + d.bounding_box.y,
            acc.width + d.bounding_box.width,
            acc.height + d.bounding_box.height,
        )
    });

    let mut seen = HashSet::new();
    let distinctive_features = members
        .iter()
        .flat_map(|d| d.distinctive_features.iter())
        .filter(|f| seen.insert(f.as_str()))
        .cloned()
        .collect();

    Detection {
        id: best.id.clone(),
        bounding_box: BoundingBox::new(
            round2(sum.x / n),
            round2(sum.y / n),
            round2(sum.width / n),
            round2(sum.height / n),
        ),
        confidence: best.confidence,
        description: best.description.clone(),
        quality: QualityTag::best(members.iter().map(|d| d.quality)),
        distinctive_features,
        merged_from: members.iter().map(|d| d.merged_from).sum(),
    }
}
