//! Read-only package catalog shown on the subscription screen.
//!
//! The catalog is data, not logic: it is built once (usually from JSON) and
//! handed to whoever needs it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::CatalogError;
use crate::types::PurchaseRequest;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub id: String,
    pub name: String,
    /// Minor currency units.
    pub price: u64,
    /// Coupons included per billing period.
    pub coupons: u32,
    pub validity_days: u32,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct PackageCatalog {
    packages: Vec<Package>,
    index: HashMap<String, usize>,
}

impl PackageCatalog {
    pub fn from_packages(packages: Vec<Package>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(packages.len());
        for (i, package) in packages.iter().enumerate() {
            if index.insert(package.id.clone(), i).is_some() {
                return Err(CatalogError::DuplicateId(package.id.clone()));
            }
        }
        Ok(Self { packages, index })
    }

    /// Parse a JSON array of packages.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        Self::from_packages(serde_json::from_str(json)?)
    }

    pub fn get(&self, id: &str) -> Option<&Package> {
        self.index.get(id).map(|&i| &self.packages[i])
    }

    /// Packages in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.packages.iter()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn purchase_request(&self, id: &str) -> Option<PurchaseRequest> {
        self.get(id).map(|p| PurchaseRequest {
            package_id: p.id.clone(),
            price: p.price,
        })
    }
}
