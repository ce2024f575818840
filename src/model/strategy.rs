//! The strategy tree: a tagged-variant node type with exhaustive case
//! analysis, modeled on the registry-style `#[serde(tag = "type")]` enums
//! this codebase favors for any "open-ended shape" in the wire format.

use garde::Validate;
use serde::{Deserialize, Serialize};

use super::indicator::IndicatorSpec;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightMode {
    Equal,
    Defined,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    If,
    IfAll,
    IfAny,
    IfNone,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Top,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
}

impl Operator {
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Gt => lhs > rhs,
            Self::Lt => lhs < rhs,
            Self::Gte => lhs >= rhs,
            Self::Lte => lhs <= rhs,
            Self::Eq => (lhs - rhs).abs() < 1e-9,
            Self::Neq => (lhs - rhs).abs() >= 1e-9,
        }
    }
}

/// The right-hand side of a condition: either a literal or another
/// indicator spec, resolved the same way the left-hand side is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionOperand {
    Value(f64),
    Indicator(IndicatorSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub lhs: IndicatorSpec,
    pub operator: Operator,
    pub rhs: ConditionOperand,
}

/// A node in the strategy tree. Every variant has `id` and `weight`; the
/// `weight` on non-root nodes is only meaningful under a `Weight(defined)`
/// parent (see the executor).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(tag = "type")]
pub enum StrategyElement {
    Ticker {
        #[garde(skip)]
        id: String,
        #[garde(range(min = 0.0, max = 100.0))]
        weight: f64,
        #[garde(skip)]
        symbol: String,
    },
    Weight {
        #[garde(skip)]
        id: String,
        #[garde(range(min = 0.0, max = 100.0))]
        weight: f64,
        #[garde(skip)]
        mode: WeightMode,
        #[garde(skip)]
        children: Vec<StrategyElement>,
    },
    Gate {
        #[garde(skip)]
        id: String,
        #[garde(range(min = 0.0, max = 100.0))]
        weight: f64,
        #[garde(skip)]
        mode: GateMode,
        #[garde(length(min = 1))]
        conditions: Vec<Condition>,
        #[garde(skip)]
        then_children: Vec<StrategyElement>,
        #[garde(skip)]
        else_children: Vec<StrategyElement>,
    },
    Scale {
        #[garde(skip)]
        id: String,
        #[garde(range(min = 0.0, max = 100.0))]
        weight: f64,
        #[garde(skip)]
        indicator: IndicatorSpec,
        #[garde(skip)]
        range_min: f64,
        #[garde(skip)]
        range_max: f64,
        #[garde(skip)]
        from_children: Vec<StrategyElement>,
        #[garde(skip)]
        to_children: Vec<StrategyElement>,
    },
    Sort {
        #[garde(skip)]
        id: String,
        #[garde(range(min = 0.0, max = 100.0))]
        weight: f64,
        #[garde(skip)]
        indicator: IndicatorSpec,
        #[garde(skip)]
        direction: SortDirection,
        #[garde(range(min = 1))]
        count: usize,
        #[garde(skip)]
        children: Vec<StrategyElement>,
    },
}

impl StrategyElement {
    pub fn id(&self) -> &str {
        match self {
            Self::Ticker { id, .. }
            | Self::Weight { id, .. }
            | Self::Gate { id, .. }
            | Self::Scale { id, .. }
            | Self::Sort { id, .. } => id,
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            Self::Ticker { weight, .. }
            | Self::Weight { weight, .. }
            | Self::Gate { weight, .. }
            | Self::Scale { weight, .. }
            | Self::Sort { weight, .. } => *weight,
        }
    }

    /// Direct children, in evaluation order. `Gate`/`Scale` expose both
    /// branches; callers that need "the reachable set" should consult both.
    pub fn direct_children(&self) -> Vec<&StrategyElement> {
        match self {
            Self::Ticker { .. } => vec![],
            Self::Weight { children, .. } => children.iter().collect(),
            Self::Gate {
                then_children,
                else_children,
                ..
            } => then_children.iter().chain(else_children.iter()).collect(),
            Self::Scale {
                from_children,
                to_children,
                ..
            } => from_children.iter().chain(to_children.iter()).collect(),
            Self::Sort { children, .. } => children.iter().collect(),
        }
    }
}
