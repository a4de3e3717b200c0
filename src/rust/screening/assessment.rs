use serde::Serialize;

use super::compositor::RegionLabel;

/// Screening verdict derived from the positive-class probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Classification {
    #[serde(rename = "TB Positive (High Confidence)")]
    PositiveHighConfidence,
    #[serde(rename = "TB Positive")]
    Positive,
    #[serde(rename = "Uncertain - Further Testing Recommended")]
    Uncertain,
    #[serde(rename = "TB Negative")]
    Negative,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PositiveHighConfidence => "TB Positive (High Confidence)",
            Self::Positive => "TB Positive",
            Self::Uncertain => "Uncertain - Further Testing Recommended",
            Self::Negative => "TB Negative",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Assessment {
    pub classification: Classification,
    pub risk_level: RiskLevel,
    /// Confidence in the stated classification, not in TB presence
    pub confidence: f32,
}

impl Assessment {
    pub fn from_probability(probability: f32) -> Self {
        let (classification, risk_level, confidence) = if probability >= 0.7 {
            (Classification::PositiveHighConfidence, RiskLevel::High, probability)
        } else if probability >= 0.5 {
            (Classification::Positive, RiskLevel::High, probability)
        } else if probability >= 0.3 {
            (Classification::Uncertain, RiskLevel::Medium, 0.5)
        } else {
            (Classification::Negative, RiskLevel::Low, 1.0 - probability)
        };
        Self {
            classification,
            risk_level,
            confidence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    Critical,
    High,
    Moderate,
    Low,
}

impl UrgencyLevel {
    pub fn from_probability(probability: f32) -> Self {
        if probability >= 0.8 {
            Self::Critical
        } else if probability >= 0.6 {
            Self::High
        } else if probability >= 0.4 {
            Self::Moderate
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Moderate => "moderate",
            Self::Low => "low",
        }
    }

    /// Patient guidance for this tier, most urgent first.
    pub fn recommendations(&self) -> &'static [&'static str; 5] {
        match self {
            Self::Critical => &[
                "Seek immediate medical attention at nearest TB clinic",
                "Isolate from family members, use separate room if possible",
                "Wear a mask when near others",
                "Start prescribed anti-TB medication as soon as possible",
                "Follow up with doctor within 48 hours",
            ],
            Self::High => &[
                "Consult a doctor within 3-5 days for confirmation",
                "Get sputum test (AFB) and GeneXpert test",
                "Avoid close contact with children and elderly",
                "Practice cough hygiene - cover mouth when coughing",
                "Maintain good ventilation at home",
            ],
            Self::Moderate => &[
                "Schedule medical consultation within 1-2 weeks",
                "Monitor symptoms: persistent cough, fever, night sweats",
                "Get chest X-ray reviewed by radiologist",
                "Consider additional diagnostic tests",
                "Maintain healthy diet and adequate rest",
            ],
            Self::Low => &[
                "No immediate TB treatment required",
                "Continue regular health checkups",
                "Maintain healthy lifestyle and nutrition",
                "If symptoms develop, consult doctor",
                "Annual screening recommended for high-risk groups",
            ],
        }
    }
}

const CLEAR_SCAN_EXPLANATION: &str = "The AI analysis shows no significant TB-related patterns in the chest X-ray. \
The lung fields appear relatively clear without characteristic TB lesions.";

/// Human-readable reading of the heatmap for the given regions.
pub fn heatmap_explanation(regions: &[RegionLabel]) -> String {
    if regions.is_empty() {
        return CLEAR_SCAN_EXPLANATION.to_string();
    }
    let joined = regions.iter().map(RegionLabel::as_str).collect::<Vec<_>>().join(", ");
    format!(
        "The AI detected suspicious patterns in the {}. Red/orange areas indicate regions where \
tuberculosis-related changes are most likely present. These areas show abnormal opacity or \
infiltrates that are characteristic of TB lesions.",
        joined
    )
}
