// Risk matrices: probability x impact grids resolving to risk levels

use crate::core::errors::AegisError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Color shown for undefined (-1) probability/impact/level values.
pub const UNDEFINED_COLOR: &str = "#A9A9A9";
pub const UNDEFINED_NAME: &str = "--";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixLevel {
    #[serde(default)]
    pub abbreviation: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLevel {
    #[serde(default)]
    pub abbreviation: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hexcolor: Option<String>,
}

impl RiskLevel {
    pub fn color(&self) -> &str {
        self.hexcolor.as_deref().unwrap_or(UNDEFINED_COLOR)
    }
}

/// Parsed form of `RiskMatrix::json_definition`.
///
/// `grid[probability][impact]` is an index into `risk`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixDefinition {
    pub probability: Vec<MatrixLevel>,
    pub impact: Vec<MatrixLevel>,
    pub risk: Vec<RiskLevel>,
    pub grid: Vec<Vec<usize>>,
}

impl MatrixDefinition {
    /// Resolve a (probability, impact) pair to a risk level index.
    ///
    /// Returns `None` when either input is undefined (-1) or out of range.
    pub fn cell(&self, probability: i64, impact: i64) -> Option<usize> {
        if probability < 0 || impact < 0 {
            return None;
        }
        let row = self.grid.get(probability as usize)?;
        let index = *row.get(impact as usize)?;
        if index < self.risk.len() {
            Some(index)
        } else {
            None
        }
    }

    /// Level index plus the level itself, or `None` when undefined.
    pub fn risk_level(&self, probability: i64, impact: i64) -> Option<(i64, &RiskLevel)> {
        let index = self.cell(probability, impact)?;
        Some((index as i64, &self.risk[index]))
    }

    /// The grid must be rectangular (probability x impact) and every cell
    /// must point into `risk`.
    pub fn validate(&self) -> Result<(), AegisError> {
        if self.grid.len() != self.probability.len() {
            return Err(AegisError::Validation(
                "matrix grid row count must match probability levels".to_string(),
            ));
        }
        for row in &self.grid {
            if row.len() != self.impact.len() {
                return Err(AegisError::Validation(
                    "matrix grid column count must match impact levels".to_string(),
                ));
            }
            if row.iter().any(|cell| *cell >= self.risk.len()) {
                return Err(AegisError::Validation(
                    "matrix grid cell out of risk level range".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMatrix {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub provider: Option<String>,
    pub is_published: bool,
    /// Raw JSON, parsed on demand with `definition()`.
    pub json_definition: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RiskMatrix {
    /// # Errors
    /// Returns a validation error when the stored JSON is malformed.
    pub fn definition(&self) -> Result<MatrixDefinition, AegisError> {
        serde_json::from_str(&self.json_definition)
            .map_err(|e| AegisError::Validation(format!("invalid matrix definition: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MatrixDefinition {
        serde_json::from_value(serde_json::json!({
            "probability": [{"name": "Low"}, {"name": "High"}],
            "impact": [{"name": "Minor"}, {"name": "Major"}],
            "risk": [
                {"name": "Low", "hexcolor": "#59BB97"},
                {"name": "Medium", "hexcolor": "#F5C481"},
                {"name": "High", "hexcolor": "#E6686D"}
            ],
            "grid": [[0, 1], [1, 2]]
        }))
        .unwrap()
    }

    #[test]
    fn test_cell_resolution() {
        let def = sample();
        assert_eq!(def.cell(0, 0), Some(0));
        assert_eq!(def.cell(1, 1), Some(2));
        let (index, level) = def.risk_level(1, 0).unwrap();
        assert_eq!(index, 1);
        assert_eq!(level.name, "Medium");
    }

    #[test]
    fn test_undefined_inputs() {
        let def = sample();
        assert_eq!(def.cell(-1, 0), None);
        assert_eq!(def.cell(0, -1), None);
        assert_eq!(def.cell(5, 0), None);
    }

    #[test]
    fn test_validate_rejects_ragged_grid() {
        let mut def = sample();
        def.grid[1].pop();
        assert!(def.validate().is_err());

        let mut def = sample();
        def.grid[0][0] = 9;
        assert!(def.validate().is_err());

        assert!(sample().validate().is_ok());
    }
}
