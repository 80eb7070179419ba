use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillCategory {
    Medical,
    Telecom,
    Utility,
    Subscription,
    Unknown,
}

impl BillCategory {
    /// Tie-break order when two categories score the same.
    pub const PRECEDENCE: [BillCategory; 5] =
        [Self::Medical, Self::Telecom, Self::Utility, Self::Subscription, Self::Unknown];

    /// Categories a specialist can be registered for.
    pub const KNOWN: [BillCategory; 4] =
        [Self::Medical, Self::Telecom, Self::Utility, Self::Subscription];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medical => "medical",
            Self::Telecom => "telecom",
            Self::Utility => "utility",
            Self::Subscription => "subscription",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "medical" => Some(Self::Medical),
            "telecom" => Some(Self::Telecom),
            "utility" => Some(Self::Utility),
            "subscription" => Some(Self::Subscription),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Lower rank wins ties.
    pub fn precedence_rank(&self) -> usize {
        Self::PRECEDENCE.iter().position(|category| category == self).unwrap_or(Self::PRECEDENCE.len())
    }
}

impl fmt::Display for BillCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    pub value: String,
    pub confidence: f64,
}

impl ExtractedField {
    pub fn new(value: impl Into<String>, confidence: f64) -> Self {
        Self { value: value.into(), confidence: clamp_unit(confidence) }
    }
}

pub const FIELD_COMPANY: &str = "company";
pub const FIELD_AMOUNT: &str = "amount";
pub const FIELD_DUE_DATE: &str = "due_date";
pub const FIELD_ACCOUNT_NUMBER: &str = "account_number";

/// Produced once per bill by the router; never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: BillCategory,
    pub confidence: f64,
    pub fields: BTreeMap<String, ExtractedField>,
}

impl ClassificationResult {
    pub fn new(
        category: BillCategory,
        confidence: f64,
        fields: BTreeMap<String, ExtractedField>,
    ) -> Self {
        Self { category, confidence: clamp_unit(confidence), fields }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|field| field.value.as_str())
    }

    pub fn company(&self) -> Option<&str> {
        self.field(FIELD_COMPANY)
    }

    pub fn amount(&self) -> Option<rust_decimal::Decimal> {
        self.field(FIELD_AMOUNT).and_then(|value| value.parse().ok())
    }
}

/// Clamp a score into [0, 1]; NaN becomes 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}
