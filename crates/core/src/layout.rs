use serde::{Deserialize, Serialize};

use crate::normalization::{collapse_spaced_letters, fix_missing_spaces, normalize_whitespace};

/// Vertical tolerance when regrouping whole-stream items into lines.
pub const REGROUP_LINE_TOLERANCE: f64 = 2.0;

/// A decoded glyph run with its user-space box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextItem {
    pub text: String,
    #[serde(default)]
    pub x0: f64,
    #[serde(default)]
    pub y0: f64,
    #[serde(default)]
    pub x1: f64,
    #[serde(default)]
    pub y1: f64,
    #[serde(default = "default_has_box")]
    pub has_box: bool,
}

fn default_has_box() -> bool {
    true
}

impl TextItem {
    pub fn new(text: impl Into<String>, x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            text: text.into(),
            x0,
            y0,
            x1,
            y1,
            has_box: true,
        }
    }

    /// Item carrying only text, used when the decoder had no geometry.
    pub fn unboxed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            x0: 0.0,
            y0: 0.0,
            x1: 0.0,
            y1: 0.0,
            has_box: false,
        }
    }

    pub fn center_y(&self) -> f64 {
        (self.y0 + self.y1) / 2.0
    }

    pub fn has_extent(&self) -> bool {
        self.x1 > self.x0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

/// Union of the boxes of every item that has one.
pub fn bounding_box(items: &[TextItem]) -> Option<BoundingBox> {
    items
        .iter()
        .filter(|i| i.has_box)
        .fold(None, |acc: Option<BoundingBox>, i| {
            let (x_min, x_max) = (i.x0.min(i.x1), i.x0.max(i.x1));
            let (y_min, y_max) = (i.y0.min(i.y1), i.y0.max(i.y1));
            Some(match acc {
                None => BoundingBox {
                    x_min,
                    y_min,
                    x_max,
                    y_max,
                },
                Some(b) => BoundingBox {
                    x_min: b.x_min.min(x_min),
                    y_min: b.y_min.min(y_min),
                    x_max: b.x_max.max(x_max),
                    y_max: b.y_max.max(y_max),
                },
            })
        })
}

/// `max(1, 0.7 × median height)`, or 2.0 when no item has a height.
pub fn line_tolerance(items: &[&TextItem]) -> f64 {
    let mut heights: Vec<f64> = items
        .iter()
        .map(|i| (i.y1 - i.y0).abs())
        .filter(|h| *h > 0.0)
        .collect();
    if heights.is_empty() {
        return 2.0;
    }
    heights.sort_by(f64::total_cmp);
    (heights[heights.len() / 2] * 0.7).max(1.0)
}

/// Horizontal distance above which two neighbouring items on a line are
/// separated by a space. `line` must be ordered by `x0`.
pub fn gap_threshold(line: &[&TextItem]) -> f64 {
    if line.len() < 2 {
        return 1.5;
    }
    let mut widths: Vec<f64> = line
        .iter()
        .map(|i| (i.x1 - i.x0).abs())
        .filter(|w| *w > 0.0)
        .collect();
    let mut gaps: Vec<f64> = line
        .windows(2)
        .map(|w| w[1].x0 - w[0].x1)
        .filter(|dx| *dx > 0.0)
        .collect();
    if gaps.is_empty() {
        return if widths.is_empty() {
            1.5
        } else {
            (widths[widths.len() / 2] * 0.6).max(0.5)
        };
    }
    gaps.sort_by(f64::total_cmp);
    let median = gaps[gaps.len() / 2];
    let p90 = gaps[(0.9 * (gaps.len() - 1) as f64).floor() as usize];
    let gap_based = if p90 > median * 2.0 {
        ((median + p90) / 2.0).max(1.0)
    } else {
        (median * 1.4).max(1.0)
    };
    if widths.is_empty() {
        return gap_based;
    }
    widths.sort_by(f64::total_cmp);
    let median_width = widths[widths.len() / 2];
    if median_width <= 3.0 && median <= 3.0 {
        return gap_based.max(p90 * 1.6).max(median_width * 2.0);
    }
    gap_based.min((median_width * 0.6).max(0.5))
}

fn ordered_for_reading<'a>(items: &'a [TextItem]) -> Vec<&'a TextItem> {
    let mut ordered: Vec<&TextItem> = items.iter().filter(|i| !i.text.trim().is_empty()).collect();
    ordered.sort_by(|a, b| {
        b.center_y()
            .total_cmp(&a.center_y())
            .then(a.x0.total_cmp(&b.x0))
    });
    ordered
}

/// Clusters items into lines by centre y, comparing each item with the
/// previous one.
fn cluster_lines<'a>(ordered: &[&'a TextItem], tolerance: f64) -> Vec<Vec<&'a TextItem>> {
    let mut lines: Vec<Vec<&TextItem>> = Vec::new();
    let mut prev_y: Option<f64> = None;
    for &item in ordered {
        let cy = item.center_y();
        let same_line = prev_y.is_some_and(|py| (cy - py).abs() <= tolerance);
        match lines.last_mut() {
            Some(line) if same_line => line.push(item),
            _ => lines.push(vec![item]),
        }
        prev_y = Some(cy);
    }
    lines
}

/// Rebuilds the reading-order text of one block from its items.
pub fn text_from_items(items: &[TextItem]) -> String {
    let ordered = ordered_for_reading(items);
    if ordered.is_empty() {
        return String::new();
    }
    if !ordered.iter().any(|i| i.has_box) {
        let joined = items
            .iter()
            .filter(|i| !i.text.trim().is_empty())
            .map(|i| i.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        return normalize_whitespace(&fix_missing_spaces(&collapse_spaced_letters(&joined)));
    }
    let tolerance = line_tolerance(&ordered);
    cluster_lines(&ordered, tolerance)
        .into_iter()
        .map(|mut line| {
            line.sort_by(|a, b| a.x0.total_cmp(&b.x0));
            line_text(&line)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn line_text(line: &[&TextItem]) -> String {
    let gap = gap_threshold(line);
    let mut out = String::new();
    for (idx, item) in line.iter().enumerate() {
        if idx > 0 && item.x0 - line[idx - 1].x1 > gap {
            out.push(' ');
        }
        out.push_str(&item.text);
    }
    out
}

/// Number of distinct visual lines the items span (at least 1).
pub fn count_lines(items: &[TextItem]) -> usize {
    let ordered = ordered_for_reading(items);
    if !ordered.iter().any(|i| i.has_box) {
        return 1;
    }
    let tolerance = line_tolerance(&ordered);
    let mut lines = 0usize;
    let mut prev_y: Option<f64> = None;
    for item in &ordered {
        let cy = item.center_y();
        if prev_y.map_or(true, |py| (cy - py).abs() > tolerance) {
            lines += 1;
            prev_y = Some(cy);
        }
    }
    lines.max(1)
}

/// Regroups whole-stream items into raw visual lines. Each line keeps its
/// horizontal extent.
pub fn regroup_lines(items: &[TextItem]) -> Vec<(String, f64, f64)> {
    let mut ordered: Vec<&TextItem> = items.iter().collect();
    ordered.sort_by(|a, b| {
        b.center_y()
            .total_cmp(&a.center_y())
            .then(a.x0.total_cmp(&b.x0))
    });
    let mut lines: Vec<Vec<&TextItem>> = Vec::new();
    for item in ordered {
        match lines.last_mut() {
            Some(line) if (item.center_y() - line[0].center_y()).abs() <= REGROUP_LINE_TOLERANCE => {
                line.push(item)
            }
            _ => lines.push(vec![item]),
        }
    }
    lines
        .into_iter()
        .map(|mut line| {
            line.sort_by(|a, b| a.x0.total_cmp(&b.x0));
            let x_min = line.iter().map(|i| i.x0.min(i.x1)).fold(f64::INFINITY, f64::min);
            let x_max = line
                .iter()
                .map(|i| i.x0.max(i.x1))
                .fold(f64::NEG_INFINITY, f64::max);
            (raw_line_with_gaps(&line), x_min, x_max)
        })
        .collect()
}

/// Joins items left to right, omitting the space for tight gaps and for
/// letter-spaced single characters.
fn raw_line_with_gaps(line: &[&TextItem]) -> String {
    let mut out = String::new();
    let mut prev: Option<&TextItem> = None;
    for item in line.iter().copied().filter(|i| !i.text.is_empty()) {
        if let Some(p) = prev {
            let gap = item.x0 - p.x1;
            let prev_len = p.text.chars().count().max(1) as f64;
            let cur_len = item.text.chars().count().max(1) as f64;
            let mut cw = ((p.x1 - p.x0) / prev_len).max((item.x1 - item.x0) / cur_len);
            if cw <= 0.0 {
                cw = 2.0;
            }
            let singles = p.text.chars().count() == 1 && item.text.chars().count() == 1;
            let tight = gap <= cw * 0.2;
            let spaced_letters = singles && gap <= cw * 1.2;
            if !tight && !spaced_letters {
                out.push(' ');
            }
        }
        out.push_str(&item.text);
        prev = Some(item);
    }
    out
}
