use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ResilientResource;

pub const PRODUCTS_PATH: &[&str] = &["api", "products"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub product_title: String,
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub price_unit: f64,
    #[serde(default)]
    pub quantity: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub type ProductService = ResilientResource<ProductDto>;
