use hagglz_core::domain::classification::BillCategory;

use super::{BillFacts, Playbook, PlaybookDraft};

const SERVICE_WORDS: &[&str] =
    &["electric", "gas", "water", "power", "energy", "sewer", "heating", "kwh"];
const HARDSHIP_WORDS: &[&str] = &["hardship", "unemployed", "struggling", "afford", "medical leave"];
const INCREASE_WORDS: &[&str] = &["increase", "higher", "spike", "went up", "doubled"];
const CANCEL_WORDS: &[&str] = &["cancel", "switch", "leaving"];
const LEVERAGE_WORDS: &[&str] = &["match", "beat", "discount", "offer", "promotion"];
const LOYALTY_WORDS: &[&str] = &["loyal", "years", "longtime"];

const SCRIPTS: &[(&str, &str)] = &[
    (
        "loyalty",
        "I've been a loyal {{ company }} customer and I'm hoping we can work together to find a better rate than my {{ amount }} bill.",
    ),
    (
        "competitor",
        "I've been comparing rates and found better offers elsewhere. Can {{ company }} match or beat them?",
    ),
    (
        "increase",
        "I've noticed my bill has increased significantly. Are there any programmes or discounts available?",
    ),
    (
        "hardship",
        "I'm experiencing financial hardship. Does {{ company }} have any assistance programmes?",
    ),
    (
        "payment_plan",
        "I'd like to discuss budget billing or payment plan options to reduce my monthly costs.",
    ),
    (
        "special_discounts",
        "Are there any special discounts for seniors, students or veterans on this account?",
    ),
    (
        "cancel",
        "I'm considering cancelling because the cost has become too high. Is there anything you can do to help?",
    ),
];

/// Rate reviews, assistance programmes and retention offers for energy and
/// water bills.
///
/// Confidence starts at 0.25 and gains 0.15 per negotiation lever (known
/// provider, known amount, amount of at least $100, identified service,
/// a hardship/increase/loyalty angle) up to 0.9, then 0.03 per leverage
/// word up to 0.95.
#[derive(Clone, Copy, Debug, Default)]
pub struct UtilityPlaybook;

impl Playbook for UtilityPlaybook {
    fn category(&self) -> BillCategory {
        BillCategory::Utility
    }

    fn scripts(&self) -> &'static [(&'static str, &'static str)] {
        SCRIPTS
    }

    fn draft(&self, facts: &BillFacts) -> PlaybookDraft {
        let hardship = facts.mentions_any(HARDSHIP_WORDS);
        let increase = facts.mentions_any(INCREASE_WORDS);
        let leaving = facts.mentions_any(CANCEL_WORDS);

        let levers = [
            facts.company.is_some(),
            facts.amount.is_some(),
            facts.amount_at_least(100),
            facts.mentions_any(SERVICE_WORDS),
            hardship || increase || facts.mentions_any(LOYALTY_WORDS),
        ]
        .into_iter()
        .filter(|lever| *lever)
        .count();

        let base = (0.25 + 0.15 * levers as f64).min(0.9);
        let confidence = (base + 0.03 * facts.count_mentions(LEVERAGE_WORDS) as f64).min(0.95);

        let (approach, scripts) = if hardship {
            ("assistance_programme", vec!["hardship", "payment_plan", "special_discounts"])
        } else if leaving {
            ("retention_offer", vec!["cancel", "competitor", "loyalty"])
        } else if increase {
            ("rate_review", vec!["increase", "competitor", "loyalty"])
        } else {
            ("loyalty_rate_review", vec!["loyalty", "competitor", "increase"])
        };

        PlaybookDraft { approach, scripts, confidence }
    }
}
