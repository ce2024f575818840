//! OHLCV bars and per-ticker price series.

use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// A single dated OHLCV record. Invariant: `l <= o,c <= h`, `v >= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
}

impl Bar {
    pub fn is_well_formed(&self) -> bool {
        self.l <= self.o
            && self.o <= self.h
            && self.l <= self.c
            && self.c <= self.h
            && self.v >= 0.0
    }
}

/// One ticker's bars, ordered by date and indexed for point lookup.
#[derive(Debug, Clone, Default)]
pub struct TickerSeries {
    bars: Vec<Bar>,
    by_date: FxHashMap<NaiveDate, usize>,
}

impl TickerSeries {
    pub fn from_bars(mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.date);
        let by_date = bars.iter().enumerate().map(|(i, b)| (b.date, i)).collect();
        Self { bars, by_date }
    }

    pub fn get(&self, date: NaiveDate) -> Option<&Bar> {
        self.by_date.get(&date).map(|&i| &self.bars[i])
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.bars.first().map(|b| b.date)
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.bars.iter().map(|b| b.date)
    }

    pub fn closes_in_order(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.c).collect()
    }
}

/// Mapping from ticker to its ordered bars. Owned by the fetch pipeline
/// during a request; immutable afterwards.
#[derive(Debug, Clone, Default)]
pub struct PriceSeries {
    pub tickers: FxHashMap<String, TickerSeries>,
}

impl PriceSeries {
    pub fn insert(&mut self, ticker: &str, bars: Vec<Bar>) {
        self.tickers
            .insert(ticker.to_string(), TickerSeries::from_bars(bars));
    }

    pub fn ticker(&self, ticker: &str) -> Option<&TickerSeries> {
        self.tickers.get(ticker)
    }

    pub fn close(&self, ticker: &str, date: NaiveDate) -> Option<f64> {
        self.ticker(ticker).and_then(|s| s.get(date)).map(|b| b.c)
    }
}
