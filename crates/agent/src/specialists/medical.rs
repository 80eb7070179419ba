use rust_decimal::Decimal;

use hagglz_core::domain::classification::BillCategory;

use super::{BillFacts, Playbook, PlaybookDraft};

const ERROR_WORDS: &[&str] =
    &["error", "duplicate", "overcharge", "incorrect", "wrong", "twice", "dispute", "mistake"];
const HARDSHIP_WORDS: &[&str] =
    &["hardship", "charity", "unemployed", "afford", "low income", "financial assistance"];
const UNINSURED_WORDS: &[&str] = &["uninsured", "self-pay", "self pay", "no insurance", "not insured"];
const PLAN_WORDS: &[&str] = &["payment plan", "installment", "instalment", "monthly payments"];

const SCRIPTS: &[(&str, &str)] = &[
    (
        "negotiable",
        "Is this {{ amount }} balance negotiable? I'd like to discuss payment options before paying.",
    ),
    (
        "settlement",
        "I'd like to offer a settlement to close out this account with {{ company }}. What's the minimum you would accept?",
    ),
    (
        "hardship",
        "I'm experiencing financial hardship. Are there assistance programmes or charity care available?",
    ),
    (
        "itemised",
        "Please send an itemised bill so I can review every charge before making payment.",
    ),
    (
        "errors",
        "I believe there may be billing errors. Can we review the charges together line by line?",
    ),
    (
        "duplicate",
        "I appear to have been billed more than once for the same service. Can you help clarify the charges?",
    ),
    (
        "uninsured",
        "I don't have insurance coverage for this. Does {{ company }} offer an uninsured or self-pay discount?",
    ),
    (
        "payment_plan",
        "Can we set up an interest-free payment plan that works with my budget?",
    ),
];

/// Itemised review, error disputes, uninsured discounts and settlements
/// for healthcare bills.
///
/// Confidence starts at 0.4 and adds 0.2 for suspected billing errors, then
/// 0.1 each for a balance over $1000, a hardship angle and uninsured status,
/// capped at 0.9.
#[derive(Clone, Copy, Debug, Default)]
pub struct MedicalPlaybook;

impl Playbook for MedicalPlaybook {
    fn category(&self) -> BillCategory {
        BillCategory::Medical
    }

    fn scripts(&self) -> &'static [(&'static str, &'static str)] {
        SCRIPTS
    }

    fn draft(&self, facts: &BillFacts) -> PlaybookDraft {
        let errors = facts.mentions_any(ERROR_WORDS);
        let large = facts.amount.is_some_and(|amount| amount > Decimal::from(1000));
        let hardship = facts.mentions_any(HARDSHIP_WORDS);
        let uninsured = facts.mentions_any(UNINSURED_WORDS);

        let mut confidence = 0.4;
        if errors {
            confidence += 0.2;
        }
        for signal in [large, hardship, uninsured] {
            if signal {
                confidence += 0.1;
            }
        }
        let confidence = f64::min(confidence, 0.9);

        let (approach, mut scripts) = if errors {
            let mut scripts = vec!["negotiable", "itemised", "errors"];
            if facts.mentions_any(&["duplicate", "twice", "more than once"]) {
                scripts.push("duplicate");
            }
            ("billing_error_review", scripts)
        } else if uninsured {
            ("uninsured_discount", vec!["uninsured", "itemised", "settlement"])
        } else if hardship {
            ("financial_assistance", vec!["hardship", "itemised", "payment_plan"])
        } else {
            ("itemised_review_and_settlement", vec!["itemised", "negotiable", "settlement"])
        };

        if hardship && !scripts.contains(&"hardship") {
            scripts.push("hardship");
        }
        if facts.mentions_any(PLAN_WORDS) && !scripts.contains(&"payment_plan") {
            scripts.push("payment_plan");
        }

        PlaybookDraft { approach, scripts, confidence }
    }
}
