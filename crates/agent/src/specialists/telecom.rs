use hagglz_core::domain::classification::BillCategory;

use super::{BillFacts, Playbook, PlaybookDraft};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TelecomService {
    Mobile,
    Internet,
    Cable,
    Landline,
    Bundle,
    Other,
}

impl TelecomService {
    pub fn detect(facts: &BillFacts) -> Self {
        let mobile = facts.mentions_any(&["mobile", "cellular", "wireless", "cell", "phone"]);
        let internet = facts.mentions_any(&["internet", "broadband", "fiber", "fibre", "wifi"]);
        let cable = facts.mentions_any(&["cable", "tv", "television"]);
        let landline = facts.mentions_any(&["landline", "home phone"]);

        let services = [mobile, internet, cable].into_iter().filter(|found| *found).count();
        if facts.mentions("bundle") || services >= 2 {
            Self::Bundle
        } else if landline {
            Self::Landline
        } else if internet {
            Self::Internet
        } else if cable {
            Self::Cable
        } else if mobile {
            Self::Mobile
        } else {
            Self::Other
        }
    }

    /// How much room providers of this service usually leave for discounts.
    pub fn negotiation_potential(&self) -> f64 {
        match self {
            Self::Mobile => 0.8,
            Self::Internet | Self::Cable => 0.9,
            Self::Landline => 0.7,
            Self::Bundle => 0.85,
            Self::Other => 0.8,
        }
    }
}

const FACTORS: &[&[&str]] = &[
    &["competitor", "switch"],
    &["cancel", "retention", "leave"],
    &["promo", "expired", "introductory"],
    &["usage", "data", "gb", "minutes", "unused"],
    &["contract", "month-to-month"],
];

const SCRIPTS: &[(&str, &str)] = &[
    (
        "loyalty_switch",
        "I've been a loyal {{ company }} customer but I'm considering switching providers. Can you offer me a better rate?",
    ),
    (
        "competitor_match",
        "Other providers are offering lower prices for comparable plans. Can you match or beat that deal?",
    ),
    (
        "promo_expired",
        "My promotional rate has expired and my bill is now {{ amount }}. Can we discuss options to reduce it?",
    ),
    (
        "usage",
        "I'm not using most of my plan's allowance. Do you have a plan that better fits my actual usage?",
    ),
    (
        "bundle",
        "I bundle several services with {{ company }} but I think I'm overpaying. Can we review the package?",
    ),
    (
        "cancel",
        "I'm ready to cancel today unless we can work out a better deal. Can you transfer me to retention?",
    ),
    (
        "features",
        "I don't need all the features I'm paying for. Can we customise a plan that fits my needs?",
    ),
];

/// Retention, promotional-rate recovery, plan right-sizing and competitor
/// matching for phone, internet and TV bills.
///
/// Confidence is 80% of the service's negotiation potential plus 0.04 for
/// each negotiation factor present, capped at 0.95.
#[derive(Clone, Copy, Debug, Default)]
pub struct TelecomPlaybook;

impl Playbook for TelecomPlaybook {
    fn category(&self) -> BillCategory {
        BillCategory::Telecom
    }

    fn scripts(&self) -> &'static [(&'static str, &'static str)] {
        SCRIPTS
    }

    fn draft(&self, facts: &BillFacts) -> PlaybookDraft {
        let service = TelecomService::detect(facts);
        let factors = FACTORS.iter().filter(|words| facts.mentions_any(words)).count();
        let confidence =
            (service.negotiation_potential() * 0.8 + 0.04 * factors as f64).min(0.95);

        let (approach, scripts) = if facts.mentions_any(FACTORS[1]) {
            ("retention_negotiation", vec!["cancel", "loyalty_switch", "competitor_match"])
        } else if facts.mentions_any(FACTORS[2]) {
            ("promotional_rate_recovery", vec!["promo_expired", "competitor_match", "loyalty_switch"])
        } else if facts.mentions_any(FACTORS[3]) {
            ("plan_right_sizing", vec!["usage", "features", "competitor_match"])
        } else if service == TelecomService::Bundle {
            ("bundle_review", vec!["bundle", "competitor_match", "features"])
        } else {
            ("competitor_rate_match", vec!["loyalty_switch", "competitor_match", "promo_expired"])
        };

        PlaybookDraft { approach, scripts, confidence }
    }
}
