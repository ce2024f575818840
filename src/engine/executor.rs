//! Strategy executor (C5): pure, single-date tree evaluation producing
//! normalized positions. No I/O — the caller resolves all indicator
//! values up front into an `IndicatorSeries`.

use chrono::NaiveDate;

use crate::model::indicator::IndicatorSeries;
use crate::model::strategy::{
    Condition, ConditionOperand, GateMode, Operator, StrategyElement, WeightMode,
};
use crate::model::Position;

#[derive(Debug, Clone, PartialEq)]
pub struct ElementError {
    pub node_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    GateEvaluated {
        node_id: String,
        result: bool,
        branch: &'static str,
    },
    SortSelected {
        node_id: String,
        selected_child_ids: Vec<String>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub positions: Vec<Position>,
    pub unallocated: f64,
    pub trace: Vec<TraceEvent>,
    pub errors: Vec<ElementError>,
}

/// Evaluates the whole tree at one decision date and applies the final
/// root-level redistribution of any leftover `unallocated` weight,
/// proportionally to whatever positions exist.
pub fn execute_at_date(
    root: &StrategyElement,
    date: NaiveDate,
    indicators: &IndicatorSeries,
) -> ExecutionOutcome {
    let mut trace = Vec::new();
    let mut errors = Vec::new();
    let (positions, unallocated) = eval(root, 100.0, date, indicators, &mut trace, &mut errors);

    // `combine` on a single result is exactly the root-level rule: any
    // leftover unallocated weight is distributed proportionally across
    // whatever positions exist.
    let (positions, unallocated) = combine(vec![(positions, unallocated)]);

    ExecutionOutcome {
        positions: crate::model::aggregate_and_normalize(positions),
        unallocated,
        trace,
        errors,
    }
}

/// Merges sibling `(positions, unallocated)` results. If any unallocated
/// weight is present and at least one sibling produced positions, the
/// combined positions are scaled up so total weight is conserved;
/// otherwise the unallocated weight bubbles further up untouched.
fn combine(results: Vec<(Vec<Position>, f64)>) -> (Vec<Position>, f64) {
    let mut all_positions = Vec::new();
    let mut total_unallocated = 0.0;
    for (positions, unallocated) in results {
        all_positions.extend(positions);
        total_unallocated += unallocated;
    }
    if all_positions.is_empty() {
        return (all_positions, total_unallocated);
    }
    if total_unallocated > 0.0 {
        let allocated: f64 = all_positions.iter().map(|p| p.weight).sum();
        if allocated > 0.0 {
            let factor = (allocated + total_unallocated) / allocated;
            for p in &mut all_positions {
                p.weight *= factor;
            }
            total_unallocated = 0.0;
        }
    }
    (all_positions, total_unallocated)
}

fn eval(
    el: &StrategyElement,
    base_weight: f64,
    date: NaiveDate,
    indicators: &IndicatorSeries,
    trace: &mut Vec<TraceEvent>,
    errors: &mut Vec<ElementError>,
) -> (Vec<Position>, f64) {
    match el {
        StrategyElement::Ticker { symbol, .. } => (
            vec![Position {
                ticker: symbol.clone(),
                weight: base_weight,
            }],
            0.0,
        ),
        StrategyElement::Weight { mode, children, .. } => {
            if children.is_empty() {
                return (Vec::new(), base_weight);
            }
            let shares = split_weight(*mode, children, base_weight);
            let results = children
                .iter()
                .zip(shares)
                .map(|(child, share)| eval(child, share, date, indicators, trace, errors))
                .collect();
            combine(results)
        }
        StrategyElement::Gate {
            mode,
            conditions,
            then_children,
            else_children,
            ..
        } => {
            let gate_result = match evaluate_conditions(conditions, date, indicators) {
                Ok(results) => reduce_gate(*mode, &results),
                Err(missing) => {
                    errors.push(ElementError {
                        node_id: el.id().to_string(),
                        message: format!("missing indicator: {missing}"),
                    });
                    return (Vec::new(), base_weight);
                }
            };
            let (branch, branch_children) = if gate_result {
                ("then", then_children)
            } else {
                ("else", else_children)
            };
            trace.push(TraceEvent::GateEvaluated {
                node_id: el.id().to_string(),
                result: gate_result,
                branch,
            });
            if branch_children.is_empty() {
                return (Vec::new(), base_weight);
            }
            let shares = split_weight(WeightMode::Defined, branch_children, base_weight);
            let results = branch_children
                .iter()
                .zip(shares)
                .map(|(child, share)| eval(child, share, date, indicators, trace, errors))
                .collect();
            combine(results)
        }
        StrategyElement::Scale {
            indicator,
            range_min,
            range_max,
            from_children,
            to_children,
            ..
        } => {
            let Some(value) = indicators.get(&IndicatorSeries::key_for(indicator), date) else {
                errors.push(ElementError {
                    node_id: el.id().to_string(),
                    message: format!("missing indicator: {}", IndicatorSeries::key_for(indicator)),
                });
                return (Vec::new(), base_weight);
            };
            let span = range_max - range_min;
            let fraction = if span.abs() < f64::EPSILON {
                0.0
            } else {
                ((value - range_min) / span).clamp(0.0, 1.0)
            };
            let from_weight = base_weight * (1.0 - fraction);
            let to_weight = base_weight * fraction;

            let mut results = Vec::new();
            if !from_children.is_empty() {
                let shares = split_weight(WeightMode::Defined, from_children, from_weight);
                results.extend(
                    from_children
                        .iter()
                        .zip(shares)
                        .map(|(child, share)| eval(child, share, date, indicators, trace, errors)),
                );
            } else if from_weight > 0.0 {
                results.push((Vec::new(), from_weight));
            }
            if !to_children.is_empty() {
                let shares = split_weight(WeightMode::Defined, to_children, to_weight);
                results.extend(
                    to_children
                        .iter()
                        .zip(shares)
                        .map(|(child, share)| eval(child, share, date, indicators, trace, errors)),
                );
            } else if to_weight > 0.0 {
                results.push((Vec::new(), to_weight));
            }
            combine(results)
        }
        StrategyElement::Sort {
            id,
            indicator,
            direction,
            count,
            children,
            ..
        } => {
            if children.is_empty() {
                return (Vec::new(), base_weight);
            }
            let mut scored = Vec::with_capacity(children.len());
            let mut missing = false;
            for child in children {
                let key = IndicatorSeries::synthetic_key(id, child.id(), indicator);
                match indicators.get(&key, date) {
                    Some(score) => scored.push((child, score)),
                    None => {
                        missing = true;
                        break;
                    }
                }
            }
            if missing {
                errors.push(ElementError {
                    node_id: el.id().to_string(),
                    message: "missing synthetic sort indicator".to_string(),
                });
                return (Vec::new(), base_weight);
            }

            scored.sort_by(|a, b| {
                let ord = a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal);
                match direction {
                    crate::model::strategy::SortDirection::Top => ord.reverse(),
                    crate::model::strategy::SortDirection::Bottom => ord,
                }
            });

            let selected = select_groups(&scored, *count);
            trace.push(TraceEvent::SortSelected {
                node_id: el.id().to_string(),
                selected_child_ids: selected.iter().map(|(c, _)| c.id().to_string()).collect(),
            });

            let any_positive = selected.iter().any(|(c, _)| c.weight() > 0.0);
            let total_weight: f64 = selected.iter().map(|(c, _)| c.weight()).sum();
            let results = selected
                .iter()
                .map(|(child, _)| {
                    let share = if any_positive && total_weight > 0.0 {
                        base_weight * child.weight() / total_weight
                    } else {
                        base_weight / selected.len() as f64
                    };
                    eval(child, share, date, indicators, trace, errors)
                })
                .collect();
            combine(results)
        }
    }
}

fn split_weight(mode: WeightMode, children: &[StrategyElement], base_weight: f64) -> Vec<f64> {
    match mode {
        WeightMode::Equal => vec![base_weight / children.len() as f64; children.len()],
        WeightMode::Defined => {
            let total: f64 = children.iter().map(|c| c.weight()).sum();
            if total <= 0.0 {
                vec![base_weight / children.len() as f64; children.len()]
            } else {
                children
                    .iter()
                    .map(|c| base_weight * c.weight() / total)
                    .collect()
            }
        }
    }
}

/// Ties are grouped within `1e-9`; `count` selects distinct groups, not
/// individual members — all members of the last included group come along.
fn select_groups<'a>(
    scored: &[(&'a StrategyElement, f64)],
    count: usize,
) -> Vec<(&'a StrategyElement, f64)> {
    const TIE_EPSILON: f64 = 1e-9;
    let mut groups: Vec<Vec<(&StrategyElement, f64)>> = Vec::new();
    for &(child, score) in scored {
        match groups.last_mut() {
            Some(group) if (group[0].1 - score).abs() < TIE_EPSILON => group.push((child, score)),
            _ => groups.push(vec![(child, score)]),
        }
    }
    groups
        .into_iter()
        .take(count.max(1))
        .flatten()
        .collect()
}

fn evaluate_conditions(
    conditions: &[Condition],
    date: NaiveDate,
    indicators: &IndicatorSeries,
) -> Result<Vec<bool>, String> {
    conditions
        .iter()
        .map(|c| evaluate_condition(c, date, indicators))
        .collect()
}

fn evaluate_condition(
    condition: &Condition,
    date: NaiveDate,
    indicators: &IndicatorSeries,
) -> Result<bool, String> {
    let lhs_key = IndicatorSeries::key_for(&condition.lhs);
    let lhs = indicators.get(&lhs_key, date).ok_or(lhs_key)?;
    let rhs = match &condition.rhs {
        ConditionOperand::Value(v) => *v,
        ConditionOperand::Indicator(spec) => {
            let key = IndicatorSeries::key_for(spec);
            indicators.get(&key, date).ok_or(key)?
        }
    };
    Ok(condition.operator.apply(lhs, rhs))
}

fn reduce_gate(mode: GateMode, results: &[bool]) -> bool {
    match mode {
        GateMode::If => results.first().copied().unwrap_or(false),
        GateMode::IfAll => results.iter().all(|&r| r),
        GateMode::IfAny => results.iter().any(|&r| r),
        GateMode::IfNone => !results.iter().any(|&r| r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::indicator::IndicatorSpec;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn ticker(id: &str, symbol: &str, weight: f64) -> StrategyElement {
        StrategyElement::Ticker {
            id: id.into(),
            weight,
            symbol: symbol.into(),
        }
    }

    fn set_rsi(indicators: &mut IndicatorSeries, ticker: &str, date: NaiveDate, value: f64) {
        let spec = IndicatorSpec::new(ticker, "RSI").with_param("period", 14);
        indicators.insert_value(&IndicatorSeries::key_for(&spec), date, value);
    }

    #[test]
    fn s1_empty_else_redistribution() {
        let root = StrategyElement::Weight {
            id: "root".into(),
            weight: 100.0,
            mode: WeightMode::Defined,
            children: vec![
                ticker("spy", "SPY", 50.0),
                StrategyElement::Gate {
                    id: "g1".into(),
                    weight: 50.0,
                    mode: GateMode::If,
                    conditions: vec![Condition {
                        lhs: IndicatorSpec::new("BND", "RSI").with_param("period", 14),
                        operator: Operator::Gt,
                        rhs: ConditionOperand::Value(50.0),
                    }],
                    then_children: vec![ticker("bnd", "BND", 100.0)],
                    else_children: vec![],
                },
            ],
        };
        let date = d("2024-01-02");

        let mut low = IndicatorSeries::default();
        set_rsi(&mut low, "BND", date, 35.0);
        let outcome_low = execute_at_date(&root, date, &low);
        assert_eq!(outcome_low.positions.len(), 1);
        assert_eq!(outcome_low.positions[0].ticker, "SPY");
        assert!((outcome_low.positions[0].weight - 100.0).abs() < 1e-6);

        let mut high = IndicatorSeries::default();
        set_rsi(&mut high, "BND", date, 65.0);
        let outcome_high = execute_at_date(&root, date, &high);
        assert_eq!(outcome_high.positions.len(), 2);
        for p in &outcome_high.positions {
            assert!((p.weight - 50.0).abs() < 1e-6);
        }
    }

    #[test]
    fn s3_scale_midpoint_and_extremes() {
        fn make_scale() -> StrategyElement {
            StrategyElement::Scale {
                id: "sc1".into(),
                weight: 100.0,
                indicator: IndicatorSpec::new("XLK", "RSI").with_param("period", 14),
                range_min: 30.0,
                range_max: 70.0,
                from_children: vec![ticker("spy", "SPY", 100.0)],
                to_children: vec![ticker("uvxy", "UVXY", 100.0)],
            }
        }
        let date = d("2024-01-02");
        let spec = IndicatorSpec::new("XLK", "RSI").with_param("period", 14);
        let key = IndicatorSeries::key_for(&spec);

        let mut mid = IndicatorSeries::default();
        mid.insert_value(&key, date, 50.0);
        let out = execute_at_date(&make_scale(), date, &mid);
        assert_eq!(out.positions.len(), 2);
        for p in &out.positions {
            assert!((p.weight - 50.0).abs() < 1e-6);
        }

        let mut low = IndicatorSeries::default();
        low.insert_value(&key, date, 20.0);
        let out = execute_at_date(&make_scale(), date, &low);
        assert_eq!(out.positions.len(), 1);
        assert_eq!(out.positions[0].ticker, "SPY");

        let mut high = IndicatorSeries::default();
        high.insert_value(&key, date, 80.0);
        let out = execute_at_date(&make_scale(), date, &high);
        assert_eq!(out.positions.len(), 1);
        assert_eq!(out.positions[0].ticker, "UVXY");
    }

    #[test]
    fn s4_sort_tie_splits_equally() {
        let a = ticker("a", "A", 100.0);
        let b = ticker("b", "B", 100.0);
        let root = StrategyElement::Sort {
            id: "sort1".into(),
            weight: 100.0,
            indicator: IndicatorSpec::new("_", "RETURN").with_param("period", 5),
            direction: crate::model::strategy::SortDirection::Top,
            count: 1,
            children: vec![a, b],
        };
        let spec = IndicatorSpec::new("_", "RETURN").with_param("period", 5);
        let date = d("2024-01-02");
        let mut indicators = IndicatorSeries::default();
        indicators.insert_value(
            &IndicatorSeries::synthetic_key("sort1", "a", &spec),
            date,
            0.05,
        );
        indicators.insert_value(
            &IndicatorSeries::synthetic_key("sort1", "b", &spec),
            date,
            0.05,
        );
        let out = execute_at_date(&root, date, &indicators);
        assert_eq!(out.positions.len(), 2);
        for p in &out.positions {
            assert!((p.weight - 50.0).abs() < 1e-6);
        }
    }

    #[test]
    fn missing_indicator_becomes_element_local_error_and_unallocated() {
        let root = StrategyElement::Weight {
            id: "root".into(),
            weight: 100.0,
            mode: WeightMode::Defined,
            children: vec![
                ticker("spy", "SPY", 50.0),
                StrategyElement::Gate {
                    id: "g1".into(),
                    weight: 50.0,
                    mode: GateMode::If,
                    conditions: vec![Condition {
                        lhs: IndicatorSpec::new("BND", "RSI").with_param("period", 14),
                        operator: Operator::Gt,
                        rhs: ConditionOperand::Value(50.0),
                    }],
                    then_children: vec![ticker("bnd", "BND", 100.0)],
                    else_children: vec![],
                },
            ],
        };
        let date = d("2024-01-02");
        let indicators = IndicatorSeries::default();
        let out = execute_at_date(&root, date, &indicators);
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.positions.len(), 1);
        assert!((out.positions[0].weight - 100.0).abs() < 1e-6);
    }
}
