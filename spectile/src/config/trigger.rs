//! Feature trigger kinds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// A named feature-extraction kind contributing one or more output bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Local mean and variance of the selected band.
    Mean,
    /// Normalized difference vegetation index from the red and NIR bands.
    Ndvi,
    /// Two-band enhanced vegetation index from the red and NIR bands.
    Evi2,
    /// Sobel gradient magnitude of the grayscale image.
    Grad,
    /// Morphological gradient over every stacked input band.
    Dmp,
    /// Frequency-tuned colour saliency of the RGB bands.
    Saliency,
}

impl Trigger {
    /// Every supported trigger, in canonical order.
    pub const ALL: [Trigger; 6] = [
        Trigger::Mean,
        Trigger::Ndvi,
        Trigger::Evi2,
        Trigger::Grad,
        Trigger::Dmp,
        Trigger::Saliency,
    ];

    /// Name used in the status ledger, tile names and on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::Mean => "mean",
            Trigger::Ndvi => "ndvi",
            Trigger::Evi2 => "evi2",
            Trigger::Grad => "grad",
            Trigger::Dmp => "dmp",
            Trigger::Saliency => "saliency",
        }
    }

    /// Number of statistics produced per scale.
    ///
    /// `input_bands` only matters for [`Trigger::Dmp`], which emits one
    /// feature per stacked input band.
    pub fn features_per_scale(&self, input_bands: usize) -> usize {
        match self {
            Trigger::Mean | Trigger::Grad | Trigger::Saliency => 2,
            Trigger::Ndvi | Trigger::Evi2 => 1,
            Trigger::Dmp => input_bands,
        }
    }

    /// Whether the trigger reads the red/NIR band pair.
    pub fn is_vegetation_index(&self) -> bool {
        matches!(self, Trigger::Ndvi | Trigger::Evi2)
    }

    /// Whether the trigger always works on an RGB-derived grayscale image.
    pub fn requires_rgb(&self) -> bool {
        matches!(self, Trigger::Grad | Trigger::Saliency)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Trigger {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Trigger::ALL
            .iter()
            .copied()
            .find(|t| t.name() == lowered)
            .ok_or_else(|| ConfigError::UnknownTrigger(s.to_string()))
    }
}
