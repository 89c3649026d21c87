//! Printable products and their physical wrap dimensions.

use serde::{Deserialize, Serialize};

/// Physical print area of a product, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintSpec {
    pub width_mm: f64,
    pub height_mm: f64,
    pub bleed_mm: f64,
}

impl PrintSpec {
    /// Full sheet width including bleed on both sides.
    pub fn sheet_width_mm(&self) -> f64 {
        self.width_mm + 2.0 * self.bleed_mm
    }

    /// Full sheet height including bleed on both sides.
    pub fn sheet_height_mm(&self) -> f64 {
        self.height_mm + 2.0 * self.bleed_mm
    }
}

/// The mug products the storefront sells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CupType {
    /// Standard 11oz ceramic mug.
    #[default]
    Classic,
    /// Insulated 12oz travel tumbler.
    Hotzy,
    /// 15oz ceramic mug.
    Jumbo,
}

/// Error returned when a cup type name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCupType(pub String);

impl std::fmt::Display for UnknownCupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown cup type: {:?}", self.0)
    }
}

impl std::error::Error for UnknownCupType {}

impl CupType {
    pub const ALL: [CupType; 3] = [CupType::Classic, CupType::Hotzy, CupType::Jumbo];

    /// Wrap dimensions for this product.
    pub fn print_spec(&self) -> PrintSpec {
        match self {
            CupType::Classic => PrintSpec {
                width_mm: 216.0,
                height_mm: 89.0,
                bleed_mm: 3.0,
            },
            CupType::Hotzy => PrintSpec {
                width_mm: 235.0,
                height_mm: 102.0,
                bleed_mm: 3.0,
            },
            CupType::Jumbo => PrintSpec {
                width_mm: 222.0,
                height_mm: 102.0,
                bleed_mm: 3.0,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CupType::Classic => "classic",
            CupType::Hotzy => "hotzy",
            CupType::Jumbo => "jumbo",
        }
    }
}

impl std::fmt::Display for CupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CupType {
    type Err = UnknownCupType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        CupType::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| UnknownCupType(s.to_string()))
    }
}
