use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::{Db, REGION_KEY, THEME_KEY};
use crate::error::StoreError;
use crate::models::{RegionCode, Theme};

/// Display data for a pricing region.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegionInfo {
    pub code: RegionCode,
    pub name: &'static str,
    pub currency: &'static str,
    pub payment_methods: &'static [&'static str],
}

pub fn region_info(code: RegionCode) -> RegionInfo {
    const GH_METHODS: &[&str] = &["mobile-money", "card"];
    const NG_METHODS: &[&str] = &["bank-transfer", "card", "ussd"];
    const US_METHODS: &[&str] = &["card", "paypal"];
    const EU_METHODS: &[&str] = &["card", "sepa"];

    let (name, currency, payment_methods) = match code {
        RegionCode::GH => ("Ghana", "GHS", GH_METHODS),
        RegionCode::NG => ("Nigeria", "NGN", NG_METHODS),
        RegionCode::US => ("United States", "USD", US_METHODS),
        RegionCode::EU => ("European Union", "EUR", EU_METHODS),
    };
    RegionInfo {
        code,
        name,
        currency,
        payment_methods,
    }
}

pub fn all_regions() -> Vec<RegionInfo> {
    RegionCode::ALL.into_iter().map(region_info).collect()
}

/// Region and theme cells. Each is read and written independently.
#[derive(Clone)]
pub struct Preferences {
    cells: Db,
}

impl Preferences {
    pub fn new(cells: Db) -> Self {
        Self { cells }
    }

    pub fn region(&self) -> Result<RegionCode, StoreError> {
        self.read_cell(REGION_KEY)
    }

    pub fn set_region(&self, region: RegionCode) -> Result<(), StoreError> {
        tracing::debug!(%region, "region preference updated");
        self.write_cell(REGION_KEY, &region)
    }

    pub fn theme(&self) -> Result<Theme, StoreError> {
        self.read_cell(THEME_KEY)
    }

    pub fn set_theme(&self, theme: Theme) -> Result<(), StoreError> {
        self.write_cell(THEME_KEY, &theme)
    }

    fn read_cell<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, StoreError> {
        let Some(raw) = self.cells.load(key)? else {
            return Ok(T::default());
        };
        match serde_json::from_str(&raw) {
            Ok(v) => Ok(v),
            Err(e) => {
                tracing::warn!(key, error = %e, "unreadable preference cell, using default");
                Ok(T::default())
            }
        }
    }

    fn write_cell<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let body = serde_json::to_string(value)?;
        self.cells.save(key, &body)
    }
}
