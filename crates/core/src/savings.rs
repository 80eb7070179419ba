//! Savings arithmetic for bills, in exact decimal money.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::ApplicationError;

const MONTHS_PER_YEAR: i64 = 12;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavingsRequest {
    pub original_amount: Decimal,
    #[serde(default)]
    pub negotiated_amount: Option<Decimal>,
    #[serde(default)]
    pub target_percentage: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActualSavings {
    pub negotiated_amount: Decimal,
    pub savings_amount: Decimal,
    pub savings_percentage: Decimal,
    pub monthly_savings: Decimal,
    pub annual_savings: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetSavings {
    pub target_percentage: Decimal,
    pub target_savings_amount: Decimal,
    pub target_final_amount: Decimal,
    pub target_annual_savings: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavingsScenario {
    pub name: String,
    pub percentage: Decimal,
    pub monthly_savings: Decimal,
    pub annual_savings: Decimal,
    pub final_amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavingsReport {
    pub original_amount: Decimal,
    pub actual: Option<ActualSavings>,
    pub target: Option<TargetSavings>,
    pub scenarios: Vec<SavingsScenario>,
}

/// Conservative, moderate and aggressive reductions.
pub const SCENARIOS: [(&str, i64); 3] = [("conservative", 10), ("moderate", 20), ("aggressive", 30)];

pub fn calculate_savings(request: &SavingsRequest) -> Result<SavingsReport, ApplicationError> {
    let original = request.original_amount;
    if original <= Decimal::ZERO {
        return Err(ApplicationError::Validation(
            "original_amount must be greater than zero".to_string(),
        ));
    }

    let actual = match request.negotiated_amount {
        Some(negotiated) if negotiated < Decimal::ZERO => {
            return Err(ApplicationError::Validation(
                "negotiated_amount must not be negative".to_string(),
            ));
        }
        Some(negotiated) => {
            let saved = original - negotiated;
            Some(ActualSavings {
                negotiated_amount: negotiated,
                savings_amount: money(saved),
                savings_percentage: money(saved / original * Decimal::ONE_HUNDRED),
                monthly_savings: money(saved),
                annual_savings: money(saved * Decimal::from(MONTHS_PER_YEAR)),
            })
        }
        None => None,
    };

    let target = match request.target_percentage {
        Some(percentage) if percentage < Decimal::ZERO || percentage > Decimal::ONE_HUNDRED => {
            return Err(ApplicationError::Validation(
                "target_percentage must be within 0..=100".to_string(),
            ));
        }
        Some(percentage) => {
            let saved = original * percentage / Decimal::ONE_HUNDRED;
            Some(TargetSavings {
                target_percentage: percentage,
                target_savings_amount: money(saved),
                target_final_amount: money(original - saved),
                target_annual_savings: money(saved * Decimal::from(MONTHS_PER_YEAR)),
            })
        }
        None => None,
    };

    let scenarios = SCENARIOS
        .iter()
        .map(|(name, percentage)| {
            let percentage = Decimal::from(*percentage);
            let saved = original * percentage / Decimal::ONE_HUNDRED;
            SavingsScenario {
                name: (*name).to_string(),
                percentage,
                monthly_savings: money(saved),
                annual_savings: money(saved * Decimal::from(MONTHS_PER_YEAR)),
                final_amount: money(original - saved),
            }
        })
        .collect();

    Ok(SavingsReport { original_amount: original, actual, target, scenarios })
}

fn money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{calculate_savings, SavingsRequest};
    use crate::errors::ErrorKind;

    fn request(original: i64, negotiated: Option<i64>, target: Option<i64>) -> SavingsRequest {
        SavingsRequest {
            original_amount: Decimal::from(original),
            negotiated_amount: negotiated.map(Decimal::from),
            target_percentage: target.map(Decimal::from),
        }
    }

    #[test]
    fn actual_savings_project_monthly_and_annual() {
        let report = calculate_savings(&request(150, Some(120), None)).expect("valid request");
        let actual = report.actual.expect("negotiated amount given");

        assert_eq!(actual.savings_amount, Decimal::from(30));
        assert_eq!(actual.savings_percentage, Decimal::from(20));
        assert_eq!(actual.annual_savings, Decimal::from(360));
        assert!(report.target.is_none());
    }

    #[test]
    fn scenarios_cover_three_reduction_levels() {
        let report = calculate_savings(&request(200, None, Some(15))).expect("valid request");

        let names: Vec<_> = report.scenarios.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["conservative", "moderate", "aggressive"]);
        assert_eq!(report.scenarios[2].final_amount, Decimal::from(140));
        assert_eq!(report.scenarios[0].annual_savings, Decimal::from(240));

        let target = report.target.expect("target given");
        assert_eq!(target.target_savings_amount, Decimal::from(30));
        assert_eq!(target.target_final_amount, Decimal::from(170));
    }

    #[test]
    fn percentages_round_to_cents() {
        let report = calculate_savings(&request(3, Some(2), None)).expect("valid request");
        let actual = report.actual.expect("negotiated amount given");
        assert_eq!(actual.savings_percentage, Decimal::new(3333, 2));
    }

    #[test]
    fn invalid_amounts_are_validation_errors() {
        for bad in [request(0, None, None), request(100, Some(-1), None), request(100, None, Some(120))]
        {
            let error = calculate_savings(&bad).expect_err("invalid");
            assert_eq!(error.kind(), ErrorKind::Validation);
        }
    }
}
