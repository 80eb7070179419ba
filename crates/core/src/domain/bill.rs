use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::classification::BillCategory;

/// Raw negotiable invoice input. Never mutated after submission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub raw_text: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub category_hint: Option<BillCategory>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Bill {
    pub fn from_text(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            company: None,
            amount: None,
            due_date: None,
            category_hint: None,
            user_id: None,
        }
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_due_date(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_category_hint(mut self, category: BillCategory) -> Self {
        self.category_hint = Some(category);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Text used for classification and embedding: raw text with the
    /// structured company name appended when the text does not mention it.
    pub fn searchable_text(&self) -> String {
        let text = self.raw_text.trim();
        match self.company.as_deref().map(str::trim).filter(|company| !company.is_empty()) {
            Some(company) if !text.to_lowercase().contains(&company.to_lowercase()) => {
                format!("{text}\n{company}")
            }
            _ => text.to_string(),
        }
    }

    /// Stable content digest, used to correlate records of the same bill.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.raw_text.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.company.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.amount.map(|amount| amount.normalize().to_string()).unwrap_or_default());
        let digest = hasher.finalize();
        digest.iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::Bill;

    #[test]
    fn searchable_text_appends_company_missing_from_text() {
        let bill = Bill::from_text("Monthly statement, total due $82.10").with_company("Brightline");
        assert_eq!(bill.searchable_text(), "Monthly statement, total due $82.10\nBrightline");

        let mentioned = Bill::from_text("Brightline wireless statement").with_company("brightline");
        assert_eq!(mentioned.searchable_text(), "Brightline wireless statement");
    }

    #[test]
    fn digest_is_stable_and_amount_scale_insensitive() {
        let first = Bill::from_text("Water bill").with_amount(Decimal::new(4000, 2));
        let second = Bill::from_text("Water bill").with_amount(Decimal::new(40, 0));
        let other = Bill::from_text("Water bill").with_amount(Decimal::new(41, 0));

        assert_eq!(first.digest(), second.digest());
        assert_ne!(first.digest(), other.digest());
        assert_eq!(first.digest().len(), 64);
    }
}
