use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AllocationError;
use crate::types::{AssetId, EstimationWindow};
use crate::AllocationResult;

use super::prices::{align_prices, PriceTable};

/// Period returns for a universe of assets sharing one date index.
///
/// Column-major: `returns[i]` is the series for `assets[i]`, and every column
/// has exactly `periods.len()` entries. Periods are strictly increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnTable {
    pub assets: Vec<AssetId>,
    pub periods: Vec<NaiveDate>,
    pub returns: Vec<Vec<Decimal>>,
}

impl ReturnTable {
    /// Build a table from raw columns, checking shape and period ordering.
    pub fn from_columns(
        assets: Vec<AssetId>,
        periods: Vec<NaiveDate>,
        returns: Vec<Vec<Decimal>>,
    ) -> AllocationResult<Self> {
        let table = Self {
            assets,
            periods,
            returns,
        };
        table.validate()?;
        Ok(table)
    }

    /// Check the column-shape and strictly-increasing-period invariants.
    ///
    /// Tables deserialised from JSON bypass `from_columns`, so public entry
    /// points call this before trusting one.
    pub fn validate(&self) -> AllocationResult<()> {
        if self.assets.len() != self.returns.len() {
            return Err(AllocationError::InvalidInput {
                field: "returns".into(),
                reason: format!(
                    "{} asset names but {} return columns",
                    self.assets.len(),
                    self.returns.len()
                ),
            });
        }
        for (asset, column) in self.assets.iter().zip(self.returns.iter()) {
            if column.len() != self.periods.len() {
                return Err(AllocationError::InvalidInput {
                    field: format!("returns[{}]", asset),
                    reason: format!(
                        "Column has {} values but the table has {} periods",
                        column.len(),
                        self.periods.len()
                    ),
                });
            }
        }
        for (i, pair) in self.periods.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(AllocationError::InvalidInput {
                    field: format!("periods[{}]", i + 1),
                    reason: format!("{} does not follow {}", pair[1], pair[0]),
                });
            }
        }
        for (i, asset) in self.assets.iter().enumerate() {
            if self.assets[..i].contains(asset) {
                return Err(AllocationError::InvalidInput {
                    field: "assets".into(),
                    reason: format!("Duplicate asset '{}'", asset),
                });
            }
        }
        Ok(())
    }

    /// Number of periods.
    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn index_of(&self, asset: &str) -> Option<usize> {
        self.assets.iter().position(|a| a == asset)
    }

    pub fn column(&self, asset: &str) -> Option<&[Decimal]> {
        self.index_of(asset).map(|i| self.returns[i].as_slice())
    }

    /// Returns of every asset for period `t`, in asset order.
    pub fn row(&self, t: usize) -> Vec<Decimal> {
        self.returns.iter().map(|col| col[t]).collect()
    }

    /// Sub-table restricted to `assets`, in the order given.
    pub fn select(&self, assets: &[AssetId]) -> AllocationResult<ReturnTable> {
        let mut returns = Vec::with_capacity(assets.len());
        for asset in assets {
            let col = self.column(asset).ok_or_else(|| AllocationError::InvalidInput {
                field: "assets".into(),
                reason: format!("Unknown asset '{}'", asset),
            })?;
            returns.push(col.to_vec());
        }
        Ok(ReturnTable {
            assets: assets.to_vec(),
            periods: self.periods.clone(),
            returns,
        })
    }

    /// Keep only the periods inside `window`.
    pub fn window(&self, window: &EstimationWindow) -> AllocationResult<ReturnTable> {
        if let (Some(start), Some(end)) = (window.start, window.end) {
            if start > end {
                return Err(AllocationError::InvalidInput {
                    field: "window".into(),
                    reason: format!("start {} is after end {}", start, end),
                });
            }
        }

        let keep: Vec<usize> = self
            .periods
            .iter()
            .enumerate()
            .filter(|(_, d)| window.contains(**d))
            .map(|(i, _)| i)
            .collect();

        Ok(ReturnTable {
            assets: self.assets.clone(),
            periods: keep.iter().map(|&i| self.periods[i]).collect(),
            returns: self
                .returns
                .iter()
                .map(|col| keep.iter().map(|&i| col[i]).collect())
                .collect(),
        })
    }
}

/// Convert a price table into simple period returns `p_t / p_{t-1} - 1`.
///
/// Prices are first aligned on the dates every asset shares. Each return is
/// dated at the later of its two prices, so `n` aligned dates give `n - 1`
/// periods. Fewer than two aligned dates give an empty table; the estimator
/// decides whether that is enough data.
pub fn build_return_table(prices: &PriceTable) -> AllocationResult<ReturnTable> {
    let aligned = align_prices(prices)?;

    let periods: Vec<NaiveDate> = aligned.dates.iter().skip(1).copied().collect();
    let returns: Vec<Vec<Decimal>> = aligned
        .prices
        .iter()
        .map(|col| col.windows(2).map(|p| p[1] / p[0] - Decimal::ONE).collect())
        .collect();

    tracing::debug!(
        assets = aligned.assets.len(),
        aligned_dates = aligned.dates.len(),
        periods = periods.len(),
        "built return table"
    );

    Ok(ReturnTable {
        assets: aligned.assets,
        periods,
        returns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::prices::PricePoint;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, day).unwrap()
    }

    fn two_asset_prices() -> PriceTable {
        let mut t = PriceTable::new();
        t.insert(
            "AAA".into(),
            vec![
                PricePoint::new(d(2), dec!(100)),
                PricePoint::new(d(3), dec!(110)),
                PricePoint::new(d(4), dec!(99)),
            ],
        );
        t.insert(
            "BBB".into(),
            vec![
                PricePoint::new(d(2), dec!(50)),
                PricePoint::new(d(3), dec!(49)),
                PricePoint::new(d(4), dec!(52.92)),
            ],
        );
        t
    }

    // ------------------------------------------------------------------
    // 1. Simple returns dated at the later price
    // ------------------------------------------------------------------
    #[test]
    fn test_simple_returns() {
        let table = build_return_table(&two_asset_prices()).unwrap();
        assert_eq!(table.assets, vec!["AAA".to_string(), "BBB".to_string()]);
        assert_eq!(table.periods, vec![d(3), d(4)]);
        assert_eq!(table.returns[0], vec![dec!(0.1), dec!(-0.1)]);
        assert_eq!(table.returns[1], vec![dec!(-0.02), dec!(0.08)]);
    }

    // ------------------------------------------------------------------
    // 2. Missing dates excluded, not zero-filled
    // ------------------------------------------------------------------
    #[test]
    fn test_gap_is_excluded() {
        let mut prices = two_asset_prices();
        prices.get_mut("BBB").unwrap().retain(|p| p.date != d(3));
        let table = build_return_table(&prices).unwrap();
        // Only 2 and 4 are shared, so one period spanning the gap.
        assert_eq!(table.periods, vec![d(4)]);
        assert_eq!(table.returns[0], vec![dec!(-0.01)]);
        assert_eq!(table.returns[1], vec![dec!(0.0584)]);
    }

    // ------------------------------------------------------------------
    // 3. Single aligned date gives an empty table
    // ------------------------------------------------------------------
    #[test]
    fn test_single_date_gives_empty_table() {
        let mut prices = PriceTable::new();
        prices.insert("AAA".into(), vec![PricePoint::new(d(2), dec!(1))]);
        let table = build_return_table(&prices).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.returns, vec![Vec::<Decimal>::new()]);
    }

    // ------------------------------------------------------------------
    // 4. Windowing
    // ------------------------------------------------------------------
    #[test]
    fn test_window_filters_periods() {
        let table = build_return_table(&two_asset_prices()).unwrap();
        let w = EstimationWindow::new(Some(d(4)), None);
        let sub = table.window(&w).unwrap();
        assert_eq!(sub.periods, vec![d(4)]);
        assert_eq!(sub.column("BBB").unwrap(), &[dec!(0.08)]);
    }

    #[test]
    fn test_inverted_window_rejected() {
        let table = build_return_table(&two_asset_prices()).unwrap();
        let w = EstimationWindow::new(Some(d(4)), Some(d(3)));
        assert!(table.window(&w).is_err());
    }

    // ------------------------------------------------------------------
    // 5. Selection and validation
    // ------------------------------------------------------------------
    #[test]
    fn test_select_reorders_and_rejects_unknown() {
        let table = build_return_table(&two_asset_prices()).unwrap();
        let sub = table.select(&["BBB".to_string()]).unwrap();
        assert_eq!(sub.assets, vec!["BBB".to_string()]);
        assert_eq!(sub.row(0), vec![dec!(-0.02)]);
        assert!(table.select(&["ZZZ".to_string()]).is_err());
    }

    #[test]
    fn test_from_columns_rejects_unordered_periods() {
        let err = ReturnTable::from_columns(
            vec!["A".into()],
            vec![d(5), d(4)],
            vec![vec![dec!(0.01), dec!(0.02)]],
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not follow"));
    }

    #[test]
    fn test_from_columns_rejects_ragged_columns() {
        let res = ReturnTable::from_columns(
            vec!["A".into(), "B".into()],
            vec![d(4), d(5)],
            vec![vec![dec!(0.01), dec!(0.02)], vec![dec!(0.01)]],
        );
        assert!(res.is_err());
    }
}
