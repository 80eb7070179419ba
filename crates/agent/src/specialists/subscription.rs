use hagglz_core::domain::classification::BillCategory;

use super::{BillFacts, Playbook, PlaybookDraft};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionKind {
    Fitness,
    Streaming,
    Software,
    News,
    Cloud,
    Other,
}

impl SubscriptionKind {
    pub fn detect(facts: &BillFacts) -> Self {
        if facts.mentions_any(&["gym", "fitness", "yoga", "pilates"]) {
            Self::Fitness
        } else if facts.mentions_any(&["streaming", "netflix", "hulu", "spotify", "video", "music"]) {
            Self::Streaming
        } else if facts.mentions_any(&["software", "license", "licence", "saas"]) {
            Self::Software
        } else if facts.mentions_any(&["news", "magazine", "journal"]) {
            Self::News
        } else if facts.mentions_any(&["cloud", "storage", "hosting", "backup"]) {
            Self::Cloud
        } else {
            Self::Other
        }
    }

    pub fn negotiation_potential(&self) -> f64 {
        match self {
            Self::Fitness => 0.9,
            Self::Software | Self::News => 0.8,
            Self::Streaming => 0.7,
            Self::Cloud | Self::Other => 0.6,
        }
    }
}

const FACTORS: &[&[&str]] = &[
    &["competitor", "cheaper", "switch"],
    &["discount", "promo", "offer", "deal"],
    &["cancel"],
    &["alternative", "instead"],
    &["loyal", "years", "member since", "longtime"],
];
const HARDSHIP_WORDS: &[&str] = &["hardship", "afford", "unemployed", "struggling"];

const SCRIPTS: &[(&str, &str)] = &[
    (
        "loyalty",
        "I've been a loyal {{ company }} subscriber and I'm considering cancelling due to cost. Can you offer me a better rate?",
    ),
    (
        "new_customer",
        "You're offering new customers a discount. Can existing customers get the same deal?",
    ),
    (
        "downgrade",
        "I'm not using all the features I'm paying for. Is there a more basic plan that would suit me?",
    ),
    (
        "competitor",
        "Competitors are offering similar service for less than {{ amount }}. Can you match their price?",
    ),
    (
        "cancel",
        "I'd like to cancel my subscription. Is there anything you can do to keep me as a customer?",
    ),
    (
        "hardship",
        "I'm experiencing financial difficulties. Do you offer hardship discounts or payment plans?",
    ),
    (
        "pause",
        "I only use this service part of the year. Can I pause or suspend the subscription instead?",
    ),
];

/// Retention and price-match requests for recurring memberships and
/// software or media subscriptions.
///
/// Confidence is 70% of the subscription kind's negotiation potential plus
/// 0.05 per negotiation factor present, capped at 0.9.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubscriptionPlaybook;

impl Playbook for SubscriptionPlaybook {
    fn category(&self) -> BillCategory {
        BillCategory::Subscription
    }

    fn scripts(&self) -> &'static [(&'static str, &'static str)] {
        SCRIPTS
    }

    fn draft(&self, facts: &BillFacts) -> PlaybookDraft {
        let kind = SubscriptionKind::detect(facts);
        let factors = FACTORS.iter().filter(|words| facts.mentions_any(words)).count();
        let confidence = (kind.negotiation_potential() * 0.7 + 0.05 * factors as f64).min(0.9);

        let (approach, scripts) = if facts.mentions_any(HARDSHIP_WORDS) {
            ("hardship_discount", vec!["hardship", "pause", "downgrade"])
        } else if facts.mentions_any(FACTORS[2]) {
            ("cancellation_retention", vec!["cancel", "loyalty", "downgrade"])
        } else if facts.mentions_any(FACTORS[0]) {
            ("competitor_price_match", vec!["new_customer", "competitor", "loyalty"])
        } else {
            ("loyalty_discount_request", vec!["loyalty", "new_customer", "downgrade"])
        };

        PlaybookDraft { approach, scripts, confidence }
    }
}
