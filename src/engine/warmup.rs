//! Warmup / effective-start calculator (C4): earliest date a strategy can
//! be legitimately executed, given data availability and the cumulative
//! historical depth the tree's indicators require.

use chrono::{Days, NaiveDate};

use crate::data::price_fetcher::TRADING_DAY_CALENDAR_FACTOR;
use crate::model::indicator::base_warmup;
use crate::model::strategy::{ConditionOperand, StrategyElement};
use crate::model::PriceSeries;

/// Safety buffer added once, at the root, on top of the cumulative total.
pub const ROOT_SAFETY_BUFFER: i64 = 10;

#[derive(Debug, Clone)]
pub struct WarmupBreakdown {
    pub warmup_days: i64,
    pub culprit_element_id: String,
    pub most_restrictive_tickers: Vec<String>,
    pub effective_start: NaiveDate,
}

/// `(cumulative warmup days excluding the root buffer, id of the element
/// contributing the largest share)`.
fn element_warmup(el: &StrategyElement) -> (i64, String) {
    match el {
        StrategyElement::Ticker { .. } => (0, el.id().to_string()),
        StrategyElement::Weight { children, .. } => {
            max_over(children.iter(), el.id())
        }
        StrategyElement::Gate {
            conditions,
            then_children,
            else_children,
            ..
        } => {
            let gate_period = conditions
                .iter()
                .map(|c| {
                    let lhs = base_warmup(&c.lhs);
                    let rhs = match &c.rhs {
                        ConditionOperand::Indicator(spec) => base_warmup(spec),
                        ConditionOperand::Value(_) => 0,
                    };
                    lhs.max(rhs)
                })
                .max()
                .unwrap_or(0);
            let (child_max, child_culprit) =
                max_over(then_children.iter().chain(else_children.iter()), el.id());
            if gate_period >= child_max {
                (gate_period, el.id().to_string())
            } else {
                (child_max, child_culprit)
            }
        }
        StrategyElement::Scale {
            indicator,
            from_children,
            to_children,
            ..
        } => {
            let own_period = base_warmup(indicator);
            let (child_max, child_culprit) =
                max_over(from_children.iter().chain(to_children.iter()), el.id());
            if own_period >= child_max {
                (own_period, el.id().to_string())
            } else {
                (child_max, child_culprit)
            }
        }
        StrategyElement::Sort {
            indicator, children, ..
        } => {
            let (child_max, _child_culprit) = max_over(children.iter(), el.id());
            // Cumulative: a Sort must simulate its children for their own
            // warmup before it can compute its own indicator on the result.
            (child_max + base_warmup(indicator), el.id().to_string())
        }
    }
}

fn max_over<'a>(
    mut children: impl Iterator<Item = &'a StrategyElement>,
    parent_id: &str,
) -> (i64, String) {
    let mut best = (0i64, parent_id.to_string());
    for child in &mut children {
        let (days, culprit) = element_warmup(child);
        if days > best.0 {
            best = (days, culprit);
        }
    }
    best
}

/// The tickers referenced anywhere in the tree.
pub fn referenced_tickers(el: &StrategyElement) -> Vec<String> {
    let mut out = Vec::new();
    collect_tickers(el, &mut out);
    out.sort();
    out.dedup();
    out
}

fn collect_tickers(el: &StrategyElement, out: &mut Vec<String>) {
    if let StrategyElement::Ticker { symbol, .. } = el {
        out.push(symbol.clone());
    }
    for child in el.direct_children() {
        collect_tickers(child, out);
    }
}

pub fn compute_effective_start(
    root: &StrategyElement,
    prices: &PriceSeries,
) -> Option<WarmupBreakdown> {
    let (cumulative, culprit) = element_warmup(root);
    let warmup_days = cumulative + ROOT_SAFETY_BUFFER;

    let tickers = referenced_tickers(root);
    let mut latest: Option<NaiveDate> = None;
    let mut restrictive = Vec::new();
    for ticker in &tickers {
        let Some(first_date) = prices.ticker(ticker).and_then(|s| s.first_date()) else {
            continue;
        };
        match latest {
            None => {
                latest = Some(first_date);
                restrictive = vec![ticker.clone()];
            }
            Some(cur) if first_date > cur => {
                latest = Some(first_date);
                restrictive = vec![ticker.clone()];
            }
            Some(cur) if first_date == cur => {
                restrictive.push(ticker.clone());
            }
            _ => {}
        }
    }
    let latest = latest?;

    let calendar_days = (warmup_days as f64 * TRADING_DAY_CALENDAR_FACTOR).ceil() as u64;
    let effective_start = latest.checked_add_days(Days::new(calendar_days))?;

    Some(WarmupBreakdown {
        warmup_days,
        culprit_element_id: culprit,
        most_restrictive_tickers: restrictive,
        effective_start,
    })
}
