use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;

use crate::domain::bill::Bill;
use crate::domain::classification::{
    ExtractedField, FIELD_ACCOUNT_NUMBER, FIELD_AMOUNT, FIELD_COMPANY, FIELD_DUE_DATE,
};

const STRUCTURED_CONFIDENCE: f64 = 1.0;
const LABELLED_CONFIDENCE: f64 = 0.9;
const INFERRED_CONFIDENCE: f64 = 0.7;

fn labelled_company() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?im)^\s*(?:provider|company|billed by|payee)\s*:\s*(\S.*?)\s*$")
            .expect("labelled company regex should compile")
    })
}

fn from_company() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b[Ff]rom\s+([A-Z][\w&'.-]*(?:[ \t]+[A-Z][\w&'.-]*){0,4})")
            .expect("from-company regex should compile")
    })
}

fn labelled_amount() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(?:total|amount|balance)(?:\s+due)?\s*:?\s*\$\s?([0-9][0-9,]*(?:\.[0-9]{1,2})?)",
        )
        .expect("labelled amount regex should compile")
    })
}

fn any_amount() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\s?([0-9][0-9,]*(?:\.[0-9]{1,2})?)").expect("amount regex should compile")
    })
}

fn due_date() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\bdue(?:\s+date)?(?:\s+(?:on|by))?\s*:?\s*(\d{4}-\d{2}-\d{2})")
            .expect("due date regex should compile")
    })
}

fn account_number() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\baccount(?:\s+(?:number|no\.?))?\s*[:#]?\s*([A-Z0-9][A-Z0-9-]{3,})")
            .expect("account number regex should compile")
    })
}

/// Pulls structured fields out of a bill. Fields supplied on the bill
/// itself always win over anything parsed from the text.
pub fn extract_fields(bill: &Bill) -> BTreeMap<String, ExtractedField> {
    let text = bill.raw_text.as_str();
    let mut fields = BTreeMap::new();

    let company = non_empty(bill.company.as_deref())
        .map(|company| ExtractedField::new(company, STRUCTURED_CONFIDENCE))
        .or_else(|| capture(labelled_company(), text).map(|c| ExtractedField::new(c, LABELLED_CONFIDENCE)))
        .or_else(|| capture(from_company(), text).map(|c| ExtractedField::new(c, INFERRED_CONFIDENCE)));
    if let Some(company) = company {
        fields.insert(FIELD_COMPANY.to_string(), company);
    }

    let amount = bill
        .amount
        .map(|amount| ExtractedField::new(amount.normalize().to_string(), STRUCTURED_CONFIDENCE))
        .or_else(|| {
            capture(labelled_amount(), text)
                .and_then(normalize_amount)
                .map(|amount| ExtractedField::new(amount, LABELLED_CONFIDENCE))
        })
        .or_else(|| {
            capture(any_amount(), text)
                .and_then(normalize_amount)
                .map(|amount| ExtractedField::new(amount, INFERRED_CONFIDENCE))
        });
    if let Some(amount) = amount {
        fields.insert(FIELD_AMOUNT.to_string(), amount);
    }

    let due = bill
        .due_date
        .map(|date| ExtractedField::new(date.to_string(), STRUCTURED_CONFIDENCE))
        .or_else(|| {
            capture(due_date(), text)
                .filter(|value| NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok())
                .map(|value| ExtractedField::new(value, LABELLED_CONFIDENCE))
        });
    if let Some(due) = due {
        fields.insert(FIELD_DUE_DATE.to_string(), due);
    }

    let account = capture(account_number(), text)
        .filter(|value| value.chars().any(|ch| ch.is_ascii_digit()))
        .map(|value| ExtractedField::new(value, LABELLED_CONFIDENCE));
    if let Some(account) = account {
        fields.insert(FIELD_ACCOUNT_NUMBER.to_string(), account);
    }

    fields
}

fn capture(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().trim().to_string())
        .filter(|value| !value.is_empty())
}

fn normalize_amount(raw: String) -> Option<String> {
    let cleaned: String = raw.chars().filter(|ch| *ch != ',').collect();
    cleaned.parse::<Decimal>().ok().map(|amount| amount.normalize().to_string())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
