//! Static reference data supplied through configuration.

use serde::{Deserialize, Serialize};

/// APE codes of the construction sector.
const CONSTRUCTION_CODES: &[&str] = &[
    "43.99C", "43.99D", "41.20A", "41.20B", "42.11Z", "42.12Z", "42.13A", "42.13B", "42.21Z",
    "42.22Z", "42.91Z", "42.99Z", "43.11Z", "43.12A", "43.12B", "43.13Z", "43.21A", "43.21B",
    "43.22A", "43.22B", "43.29A", "43.29B", "43.31Z", "43.32A", "43.32B", "43.32C", "43.33Z",
    "43.34Z", "43.39Z", "43.91A", "43.91B", "43.99A", "43.99B", "41.10A", "41.10B", "41.10C",
    "41.10D", "81.30Z", "74.90A",
];

/// A named group of INSEE headcount-range codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadcountCategory {
    pub label: String,
    pub codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceData {
    /// Activity codes flagged as the target sector.
    pub target_sector_codes: Vec<String>,
    pub target_sector_label: String,
    pub other_sector_label: String,
    pub headcount_categories: Vec<HeadcountCategory>,
}

impl Default for ReferenceData {
    fn default() -> Self {
        let category = |label: &str, codes: &[&str]| HeadcountCategory {
            label: label.to_string(),
            codes: codes.iter().map(|c| c.to_string()).collect(),
        };
        Self {
            target_sector_codes: CONSTRUCTION_CODES.iter().map(|c| c.to_string()).collect(),
            target_sector_label: "BTP".to_string(),
            other_sector_label: "Autres".to_string(),
            headcount_categories: vec![
                category("Non employeur", &["NN", "00"]),
                category("TPE (1-9)", &["01", "02", "03"]),
                category("PME (10-249)", &["11", "12", "21", "22", "31"]),
                category(
                    "Grande structure (250+)",
                    &["32", "41", "42", "51", "52", "53"],
                ),
            ],
        }
    }
}

impl ReferenceData {
    pub fn is_target_sector(&self, activity_code: &str) -> bool {
        self.target_sector_codes.iter().any(|c| c == activity_code)
    }

    /// Category label for a headcount-range code; `None` when unmapped.
    pub fn headcount_category(&self, code: &str) -> Option<&str> {
        let code = code.trim();
        self.headcount_categories
            .iter()
            .find(|cat| cat.codes.iter().any(|c| c == code))
            .map(|cat| cat.label.as_str())
    }
}
