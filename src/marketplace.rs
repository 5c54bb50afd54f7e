//! Amazon marketplaces the scraper can target.
//!
//! A [`Locale`] is a validated marketplace code such as `US` or `EG`. Which
//! codes are accepted at runtime is decided by [`SupportedLocales`], built
//! once from configuration.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marketplace {
    pub code: &'static str,
    /// Suffix after `amazon.`, as the scraping provider expects it.
    pub domain: &'static str,
    pub currency: &'static str,
}

static MARKETPLACES: &[Marketplace] = &[
    Marketplace { code: "EG", domain: "eg", currency: "EGP" },
    Marketplace { code: "US", domain: "com", currency: "USD" },
    Marketplace { code: "AE", domain: "ae", currency: "AED" },
    Marketplace { code: "CA", domain: "ca", currency: "CAD" },
    Marketplace { code: "UK", domain: "co.uk", currency: "GBP" },
    Marketplace { code: "DE", domain: "de", currency: "EUR" },
    Marketplace { code: "FR", domain: "fr", currency: "EUR" },
    Marketplace { code: "IT", domain: "it", currency: "EUR" },
    Marketplace { code: "ES", domain: "es", currency: "EUR" },
];

static BY_CODE: Lazy<HashMap<&'static str, &'static Marketplace>> = Lazy::new(|| {
    let mut map: HashMap<&'static str, &'static Marketplace> =
        MARKETPLACES.iter().map(|m| (m.code, m)).collect();
    map.insert("GB", &MARKETPLACES[4]);
    map
});

impl Marketplace {
    pub fn parse(code: &str) -> Option<&'static Marketplace> {
        BY_CODE.get(code.trim().to_ascii_uppercase().as_str()).copied()
    }
}

/// Canonical marketplace code, e.g. `US`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locale(String);

impl Locale {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn marketplace(&self) -> &'static Marketplace {
        // Locales are only constructed from table entries.
        Marketplace::parse(&self.0).unwrap_or(&MARKETPLACES[1])
    }

    fn from_marketplace(m: &Marketplace) -> Self {
        Locale(m.code.to_string())
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The subset of marketplaces this deployment accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedLocales(Vec<Locale>);

impl Default for SupportedLocales {
    fn default() -> Self {
        SupportedLocales(MARKETPLACES.iter().map(Locale::from_marketplace).collect())
    }
}

impl SupportedLocales {
    /// Parses a comma-separated list such as `"US,EG, de"`.
    pub fn from_list(list: &str) -> Result<Self> {
        let mut locales = Vec::new();
        for code in list.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let m = Marketplace::parse(code)
                .ok_or_else(|| AppError::Config(format!("Unknown marketplace code: {}", code)))?;
            let locale = Locale::from_marketplace(m);
            if !locales.contains(&locale) {
                locales.push(locale);
            }
        }
        if locales.is_empty() {
            return Err(AppError::Config("No marketplaces enabled".to_string()));
        }
        Ok(SupportedLocales(locales))
    }

    pub fn resolve(&self, code: &str) -> Result<Locale> {
        let m = Marketplace::parse(code)
            .ok_or_else(|| AppError::InvalidInput(format!("Unknown marketplace code: {:?}", code)))?;
        let locale = Locale::from_marketplace(m);
        if self.0.contains(&locale) {
            Ok(locale)
        } else {
            Err(AppError::InvalidInput(format!("Marketplace {} is not enabled", locale)))
        }
    }
}
