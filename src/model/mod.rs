pub mod bar;
pub mod indicator;
pub mod position;
pub mod strategy;

pub use bar::{Bar, PriceSeries, TickerSeries};
pub use indicator::{IndicatorSeries, IndicatorSpec};
pub use position::{aggregate_and_normalize, Position};
pub use strategy::StrategyElement;
