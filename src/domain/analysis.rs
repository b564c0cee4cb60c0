//! Vision analysis signals for a single image.

use serde::{Deserialize, Serialize};

/// Ordinal SafeSearch likelihood, `VeryUnlikely` = 0 through `VeryLikely` = 4.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Likelihood {
    #[default]
    VeryUnlikely = 0,
    Unlikely = 1,
    Possible = 2,
    Likely = 3,
    VeryLikely = 4,
}

impl Likelihood {
    /// Parse the vision service's wire name.
    ///
    /// `UNKNOWN` maps to `Possible`: an unscored category must not read as clean.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "VERY_UNLIKELY" => Likelihood::VeryUnlikely,
            "UNLIKELY" => Likelihood::Unlikely,
            "LIKELY" => Likelihood::Likely,
            "VERY_LIKELY" => Likelihood::VeryLikely,
            _ => Likelihood::Possible,
        }
    }

    /// The level directly below this one, if any
    pub fn below(self) -> Option<Self> {
        match self {
            Likelihood::VeryUnlikely => None,
            Likelihood::Unlikely => Some(Likelihood::VeryUnlikely),
            Likelihood::Possible => Some(Likelihood::Unlikely),
            Likelihood::Likely => Some(Likelihood::Possible),
            Likelihood::VeryLikely => Some(Likelihood::Likely),
        }
    }
}

/// SafeSearch categories scored by the vision service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafeSearchCategory {
    Adult,
    Violence,
    Racy,
    Medical,
    Spoof,
}

impl SafeSearchCategory {
    pub fn name(self) -> &'static str {
        match self {
            SafeSearchCategory::Adult => "adult",
            SafeSearchCategory::Violence => "violence",
            SafeSearchCategory::Racy => "racy",
            SafeSearchCategory::Medical => "medical",
            SafeSearchCategory::Spoof => "spoof",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeSearch {
    pub adult: Likelihood,
    pub violence: Likelihood,
    pub racy: Likelihood,
    pub medical: Likelihood,
    pub spoof: Likelihood,
}

impl SafeSearch {
    pub fn get(&self, category: SafeSearchCategory) -> Likelihood {
        match category {
            SafeSearchCategory::Adult => self.adult,
            SafeSearchCategory::Violence => self.violence,
            SafeSearchCategory::Racy => self.racy,
            SafeSearchCategory::Medical => self.medical,
            SafeSearchCategory::Spoof => self.spoof,
        }
    }
}

/// Axis-aligned box in the units the vision service reported
/// (pixels for faces, normalised 0..1 for objects).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Smallest box containing every vertex; `None` for an empty polygon.
    pub fn from_vertices(vertices: &[(f32, f32)]) -> Option<Self> {
        let (first, rest) = vertices.split_first()?;
        let (mut min_x, mut min_y) = *first;
        let (mut max_x, mut max_y) = *first;
        for &(x, y) in rest {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Some(Self {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub name: String,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}

/// Everything the vision service said about one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub safe_search: SafeSearch,
    pub labels: Vec<Label>,
    pub faces: Vec<BoundingBox>,
    pub objects: Vec<DetectedObject>,
}

impl AnalysisResult {
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }
}
