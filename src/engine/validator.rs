//! Strategy validator (C8): structural, semantic, and weight-sum checks.
//! Field-shape checks on the request DTO are handled separately by `garde`
//! derives on `StrategyElement`; this module walks the tree for the
//! invariants that span multiple nodes.

use std::collections::HashSet;

use crate::model::strategy::{StrategyElement, WeightMode};

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub node_id: String,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

const WEIGHT_SUM_TOLERANCE: f64 = 0.01;
const LONG_PERIOD_WARNING_THRESHOLD: i64 = 500;

pub fn validate(root: &StrategyElement) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut seen_ids: HashSet<String> = HashSet::new();

    check_top_level_weight_sum(root, &mut report);
    walk(root, &mut seen_ids, &mut report);

    report
}

fn check_top_level_weight_sum(root: &StrategyElement, report: &mut ValidationReport) {
    let children = root.direct_children();
    if children.is_empty() {
        return;
    }
    let total: f64 = children.iter().map(|c| c.weight()).sum();
    if (total - 100.0).abs() > WEIGHT_SUM_TOLERANCE {
        report.errors.push(ValidationIssue {
            node_id: root.id().to_string(),
            field: "weight".to_string(),
            message: format!("top-level weights sum to {total}, expected 100"),
        });
    }
}

fn walk(el: &StrategyElement, seen_ids: &mut HashSet<String>, report: &mut ValidationReport) {
    if !seen_ids.insert(el.id().to_string()) {
        report.errors.push(ValidationIssue {
            node_id: el.id().to_string(),
            field: "id".to_string(),
            message: "duplicate element id".to_string(),
        });
    }

    match el {
        StrategyElement::Ticker { .. } => {}
        StrategyElement::Weight { mode, children, .. } => {
            if children.is_empty() {
                no_reachable_leaf(el, report);
            }
            if *mode == WeightMode::Defined {
                let total: f64 = children.iter().map(|c| c.weight()).sum();
                if !children.is_empty() && (total - 100.0).abs() > WEIGHT_SUM_TOLERANCE {
                    report.errors.push(ValidationIssue {
                        node_id: el.id().to_string(),
                        field: "weight".to_string(),
                        message: format!(
                            "defined-mode weight group sums to {total}, expected 100"
                        ),
                    });
                }
            }
        }
        StrategyElement::Gate {
            conditions,
            then_children,
            else_children,
            ..
        } => {
            if conditions.is_empty() {
                report.errors.push(ValidationIssue {
                    node_id: el.id().to_string(),
                    field: "conditions".to_string(),
                    message: "gate must have at least one condition".to_string(),
                });
            }
            if then_children.is_empty() {
                report.warnings.push(ValidationIssue {
                    node_id: el.id().to_string(),
                    field: "thenChildren".to_string(),
                    message: "empty then-branch; all weight redistributes on true".to_string(),
                });
            }
            if else_children.is_empty() {
                report.warnings.push(ValidationIssue {
                    node_id: el.id().to_string(),
                    field: "elseChildren".to_string(),
                    message: "empty else-branch; all weight redistributes on false".to_string(),
                });
            }
        }
        StrategyElement::Scale {
            range_min,
            range_max,
            from_children,
            to_children,
            ..
        } => {
            if (range_min - range_max).abs() < f64::EPSILON {
                report.errors.push(ValidationIssue {
                    node_id: el.id().to_string(),
                    field: "rangeMin/rangeMax".to_string(),
                    message: "scale rangeMin must differ from rangeMax".to_string(),
                });
            }
            if from_children.is_empty() || to_children.is_empty() {
                no_reachable_leaf(el, report);
            }
        }
        StrategyElement::Sort {
            count, children, ..
        } => {
            if *count == 0 {
                report.errors.push(ValidationIssue {
                    node_id: el.id().to_string(),
                    field: "count".to_string(),
                    message: "sort count must be >= 1".to_string(),
                });
            }
            if children.is_empty() {
                no_reachable_leaf(el, report);
            }
            if *count > children.len() {
                report.warnings.push(ValidationIssue {
                    node_id: el.id().to_string(),
                    field: "count".to_string(),
                    message: "sort count exceeds number of children".to_string(),
                });
            }
        }
    }

    for spec_period in indicator_periods(el) {
        if spec_period > LONG_PERIOD_WARNING_THRESHOLD {
            report.warnings.push(ValidationIssue {
                node_id: el.id().to_string(),
                field: "indicator.params.period".to_string(),
                message: format!("unusually long indicator period: {spec_period}"),
            });
        }
    }

    for child in el.direct_children() {
        walk(child, seen_ids, report);
    }
}

fn no_reachable_leaf(el: &StrategyElement, report: &mut ValidationReport) {
    report.errors.push(ValidationIssue {
        node_id: el.id().to_string(),
        field: "children".to_string(),
        message: "subtree has no reachable ticker leaf".to_string(),
    });
}

fn indicator_periods(el: &StrategyElement) -> Vec<i64> {
    match el {
        StrategyElement::Gate { conditions, .. } => conditions
            .iter()
            .flat_map(|c| {
                let mut periods = vec![*c.lhs.params.get("period").unwrap_or(&0)];
                if let crate::model::strategy::ConditionOperand::Indicator(spec) = &c.rhs {
                    periods.push(*spec.params.get("period").unwrap_or(&0));
                }
                periods
            })
            .collect(),
        StrategyElement::Scale { indicator, .. } | StrategyElement::Sort { indicator, .. } => {
            vec![*indicator.params.get("period").unwrap_or(&0)]
        }
        _ => vec![],
    }
}
