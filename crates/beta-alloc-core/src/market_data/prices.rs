use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::AllocationError;
use crate::types::AssetId;
use crate::AllocationResult;

/// A single observed closing price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: Decimal,
}

impl PricePoint {
    pub fn new(date: NaiveDate, price: Decimal) -> Self {
        Self { date, price }
    }
}

/// Price history per asset, as handed over by whatever market-data source
/// the caller uses. Keys iterate in sorted order, which fixes the asset order
/// of every downstream table.
pub type PriceTable = BTreeMap<AssetId, Vec<PricePoint>>;

/// Prices aligned on the dates shared by every asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedPrices {
    pub assets: Vec<AssetId>,
    pub dates: Vec<NaiveDate>,
    /// One column per asset, same length as `dates`.
    pub prices: Vec<Vec<Decimal>>,
}

/// Inner-join every asset's history on date.
///
/// Dates missing for any asset are dropped for all of them; nothing is
/// forward- or zero-filled.
pub fn align_prices(table: &PriceTable) -> AllocationResult<AlignedPrices> {
    if table.is_empty() {
        return Err(AllocationError::InvalidInput {
            field: "prices".into(),
            reason: "Price table contains no assets".into(),
        });
    }

    let mut sorted: Vec<(&AssetId, BTreeMap<NaiveDate, Decimal>)> = Vec::with_capacity(table.len());
    for (asset, points) in table {
        sorted.push((asset, index_history(asset, points)?));
    }

    let mut common: BTreeSet<NaiveDate> = sorted[0].1.keys().copied().collect();
    for (_, history) in sorted.iter().skip(1) {
        common.retain(|d| history.contains_key(d));
    }
    let dates: Vec<NaiveDate> = common.into_iter().collect();

    let prices = sorted
        .iter()
        .map(|(_, history)| dates.iter().map(|d| history[d]).collect())
        .collect();

    Ok(AlignedPrices {
        assets: sorted.iter().map(|(a, _)| (*a).clone()).collect(),
        dates,
        prices,
    })
}

fn index_history(
    asset: &str,
    points: &[PricePoint],
) -> AllocationResult<BTreeMap<NaiveDate, Decimal>> {
    if points.is_empty() {
        return Err(AllocationError::InvalidInput {
            field: format!("prices[{}]", asset),
            reason: "Asset has no price observations".into(),
        });
    }

    let mut history = BTreeMap::new();
    for p in points {
        if p.price <= Decimal::ZERO {
            return Err(AllocationError::InvalidInput {
                field: format!("prices[{}]", asset),
                reason: format!("Non-positive price {} on {}", p.price, p.date),
            });
        }
        if history.insert(p.date, p.price).is_some() {
            return Err(AllocationError::InvalidInput {
                field: format!("prices[{}]", asset),
                reason: format!("Duplicate observation for {}", p.date),
            });
        }
    }
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 3, day).unwrap()
    }

    #[test]
    fn test_inner_join_drops_missing_dates() {
        let mut table = PriceTable::new();
        table.insert(
            "AAA".into(),
            vec![
                PricePoint::new(d(1), dec!(10)),
                PricePoint::new(d(2), dec!(11)),
                PricePoint::new(d(3), dec!(12)),
            ],
        );
        table.insert(
            "BBB".into(),
            vec![PricePoint::new(d(3), dec!(21)), PricePoint::new(d(1), dec!(20))],
        );

        let aligned = align_prices(&table).unwrap();
        assert_eq!(aligned.dates, vec![d(1), d(3)]);
        assert_eq!(aligned.prices[0], vec![dec!(10), dec!(12)]);
        assert_eq!(aligned.prices[1], vec![dec!(20), dec!(21)]);
    }

    #[test]
    fn test_unsorted_input_is_ordered() {
        let mut table = PriceTable::new();
        table.insert(
            "AAA".into(),
            vec![PricePoint::new(d(5), dec!(3)), PricePoint::new(d(4), dec!(2))],
        );
        let aligned = align_prices(&table).unwrap();
        assert_eq!(aligned.dates, vec![d(4), d(5)]);
        assert_eq!(aligned.prices[0], vec![dec!(2), dec!(3)]);
    }

    #[test]
    fn test_duplicate_date_rejected() {
        let mut table = PriceTable::new();
        table.insert(
            "AAA".into(),
            vec![PricePoint::new(d(1), dec!(10)), PricePoint::new(d(1), dec!(10.5))],
        );
        let err = align_prices(&table).unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_non_positive_price_rejected() {
        let mut table = PriceTable::new();
        table.insert("AAA".into(), vec![PricePoint::new(d(1), dec!(0))]);
        assert!(align_prices(&table).is_err());
    }

    #[test]
    fn test_empty_table_rejected() {
        assert!(align_prices(&PriceTable::new()).is_err());
    }
}
