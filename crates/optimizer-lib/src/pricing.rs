//! Static monthly cost model
//!
//! Prices are USD per GB-month for storage, per provisioned IOPS-month and
//! per provisioned MiB/s-month. Lookups fall back from the requested region
//! to the `default` table, and from an unknown class to the balanced SSD
//! storage price.

use crate::models::VolumeClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Region key used when the requested region has no table
pub const DEFAULT_REGION: &str = "default";

/// Prices for one volume class in one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassPrice {
    /// $/GB-month
    pub storage: f64,
    /// $/IOPS-month above `free_iops`
    #[serde(default)]
    pub iops: Option<f64>,
    /// $/MiBps-month above `free_throughput`
    #[serde(default)]
    pub throughput: Option<f64>,
    #[serde(default)]
    pub free_iops: f64,
    #[serde(default)]
    pub free_throughput: f64,
}

impl ClassPrice {
    fn storage_only(storage: f64) -> Self {
        Self {
            storage,
            iops: None,
            throughput: None,
            free_iops: 0.0,
            free_throughput: 0.0,
        }
    }

    fn balanced(storage: f64, iops: f64, throughput: f64) -> Self {
        Self {
            storage,
            iops: Some(iops),
            throughput: Some(throughput),
            free_iops: 3000.0,
            free_throughput: 125.0,
        }
    }

    fn provisioned_iops(storage: f64, iops: f64) -> Self {
        Self {
            storage,
            iops: Some(iops),
            throughput: None,
            free_iops: 0.0,
            free_throughput: 0.0,
        }
    }
}

/// Region -> class name -> prices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceTable {
    regions: BTreeMap<String, BTreeMap<String, ClassPrice>>,
}

/// Monthly cost breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Total, rounded to cents
    pub monthly_cost: f64,
    pub storage_cost: f64,
    pub iops_cost: f64,
    pub throughput_cost: f64,
    /// Price table region actually used
    pub priced_region: String,
    /// Class whose prices were applied
    pub priced_class: String,
    /// Set when a fallback price was substituted for an unknown class
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl Default for PriceTable {
    fn default() -> Self {
        let mut regions = BTreeMap::new();
        regions.insert(
            "us-east-1".to_string(),
            region_prices(0.10, (0.08, 0.005, 0.04), (0.125, 0.065), 0.045, 0.025, 0.05),
        );
        regions.insert(
            "ap-northeast-2".to_string(),
            region_prices(
                0.114,
                (0.0912, 0.0057, 0.0456),
                (0.138, 0.072),
                0.051,
                0.028,
                0.08,
            ),
        );
        regions.insert(
            DEFAULT_REGION.to_string(),
            region_prices(0.10, (0.08, 0.005, 0.04), (0.125, 0.065), 0.045, 0.025, 0.05),
        );
        Self { regions }
    }
}

fn region_prices(
    gp2: f64,
    gp3: (f64, f64, f64),
    piops: (f64, f64),
    st1: f64,
    sc1: f64,
    standard: f64,
) -> BTreeMap<String, ClassPrice> {
    let mut prices = BTreeMap::new();
    prices.insert("gp2".to_string(), ClassPrice::storage_only(gp2));
    prices.insert("gp3".to_string(), ClassPrice::balanced(gp3.0, gp3.1, gp3.2));
    prices.insert("io1".to_string(), ClassPrice::provisioned_iops(piops.0, piops.1));
    prices.insert("io2".to_string(), ClassPrice::provisioned_iops(piops.0, piops.1));
    prices.insert("st1".to_string(), ClassPrice::storage_only(st1));
    prices.insert("sc1".to_string(), ClassPrice::storage_only(sc1));
    prices.insert("standard".to_string(), ClassPrice::storage_only(standard));
    prices
}

/// Round a dollar amount to cents
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Drop unusable provisioning figures, recording why
fn sanitize(label: &str, value: Option<f64>, notes: &mut Vec<String>) -> Option<f64> {
    match value {
        Some(v) if v.is_finite() && v >= 0.0 => Some(v),
        Some(v) => {
            notes.push(format!("ignored invalid {} value {}", label, v));
            None
        }
        None => None,
    }
}

impl PriceTable {
    /// Build a table from explicit region entries
    pub fn from_regions(regions: BTreeMap<String, BTreeMap<String, ClassPrice>>) -> Self {
        Self { regions }
    }

    pub fn regions(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(String::as_str)
    }

    /// Estimate the monthly cost of a volume
    ///
    /// Returns `None` only when neither `region` nor the default table exists,
    /// or when the table has no usable entry for the class or its fallback.
    pub fn estimate_monthly_cost(
        &self,
        size_gb: u64,
        class: &VolumeClass,
        region: &str,
        iops: Option<f64>,
        throughput: Option<f64>,
    ) -> Option<CostEstimate> {
        let (priced_region, prices) = match self.regions.get_key_value(region) {
            Some((name, prices)) => (name.clone(), prices),
            None => match self.regions.get_key_value(DEFAULT_REGION) {
                Some((name, prices)) => (name.clone(), prices),
                None => {
                    warn!(region = %region, "No price table for region or default");
                    return None;
                }
            },
        };

        let mut notes = Vec::new();
        if priced_region != region {
            notes.push(format!("no prices for region {}, using default table", region));
        }

        let iops = sanitize("iops", iops, &mut notes);
        let throughput = sanitize("throughput", throughput, &mut notes);

        let (priced_class, price, degraded) = match prices.get(class.as_str()) {
            Some(price) => (class.as_str().to_string(), price, false),
            None => {
                let fallback = VolumeClass::Gp3;
                let Some(price) = prices.get(fallback.as_str()) else {
                    warn!(class = %class, region = %priced_region, "No price for class or fallback");
                    return None;
                };
                warn!(
                    class = %class,
                    region = %priced_region,
                    "Unknown volume class, pricing storage as gp3"
                );
                notes.push(format!("unknown class {}, storage priced as gp3", class));
                (fallback.as_str().to_string(), price, true)
            }
        };

        let storage_cost = size_gb as f64 * price.storage;

        // A substituted price covers storage only; provisioning add-ons of an
        // unknown class cannot be inferred.
        let (iops_cost, throughput_cost) = if degraded {
            (0.0, 0.0)
        } else {
            let iops_cost = match (price.iops, iops) {
                (Some(unit), Some(iops)) => (iops - price.free_iops).max(0.0) * unit,
                _ => 0.0,
            };
            let throughput_cost = match (price.throughput, throughput) {
                (Some(unit), Some(tp)) => (tp - price.free_throughput).max(0.0) * unit,
                _ => 0.0,
            };
            (iops_cost, throughput_cost)
        };

        Some(CostEstimate {
            monthly_cost: round_cents(storage_cost + iops_cost + throughput_cost),
            storage_cost: round_cents(storage_cost),
            iops_cost: round_cents(iops_cost),
            throughput_cost: round_cents(throughput_cost),
            priced_region,
            priced_class,
            degraded,
            notes,
        })
    }

    /// Monthly cost of a volume as currently provisioned
    pub fn volume_cost(&self, volume: &crate::models::Volume, region: &str) -> Option<f64> {
        self.estimate_monthly_cost(
            volume.size_gb,
            &volume.volume_type,
            region,
            volume.iops.map(f64::from),
            volume.throughput.map(f64::from),
        )
        .map(|estimate| estimate.monthly_cost)
    }
}

/// Estimate against the built-in price table
pub fn estimate_monthly_cost(
    size_gb: u64,
    class: &VolumeClass,
    region: &str,
    iops: Option<f64>,
    throughput: Option<f64>,
) -> Option<CostEstimate> {
    PriceTable::default().estimate_monthly_cost(size_gb, class, region, iops, throughput)
}
