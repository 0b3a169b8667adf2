use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::ResilientResource;
use crate::fallback::{self, ServiceResponse};
use crate::outcome::Operation;

pub const FAVOURITES_PATH: &[&str] = &["api", "favourites"];

/// Favourites are keyed by who liked what, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavouriteId {
    pub user_id: i64,
    pub product_id: i64,
    pub like_date: String,
}

impl FavouriteId {
    fn path(&self) -> Vec<String> {
        FAVOURITES_PATH
            .iter()
            .map(|s| (*s).to_owned())
            .chain([
                self.user_id.to_string(),
                self.product_id.to_string(),
                self.like_date.clone(),
            ])
            .collect()
    }
}

impl fmt::Display for FavouriteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.user_id, self.product_id, self.like_date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavouriteDto {
    pub user_id: i64,
    pub product_id: i64,
    pub like_date: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub type FavouriteService = ResilientResource<FavouriteDto>;

impl ResilientResource<FavouriteDto> {
    pub async fn find_by_key(&self, id: &FavouriteId) -> ServiceResponse<Option<FavouriteDto>> {
        self.lookup(Operation::FindById, &id.path(), &id.to_string()).await
    }

    pub async fn delete_by_key(&self, id: &FavouriteId) -> ServiceResponse<bool> {
        self.remove(Operation::DeleteById, &id.path(), &id.to_string()).await
    }

    /// Lookup with the id sent as a JSON body instead of path segments.
    pub async fn find_by_favourite_id(&self, id: &FavouriteId) -> ServiceResponse<Option<FavouriteDto>> {
        let op = Operation::FindById;
        let key = id.to_string();
        let path = self.at(&["find"]);
        debug!(service = %self.name(), operation = %op, key = %key, "calling downstream");
        self.resilience
            .call(
                op,
                || self.client.get_with_body(&path, id),
                |failure| fallback::absent(self.name(), op, &key, failure),
            )
            .await
    }

    pub async fn delete_by_favourite_id(&self, id: &FavouriteId) -> ServiceResponse<bool> {
        let op = Operation::DeleteById;
        let key = id.to_string();
        let path = self.at(&["delete"]);
        debug!(service = %self.name(), operation = %op, key = %key, "calling downstream");
        self.resilience
            .call(
                op,
                || self.client.delete_with_body(&path, id),
                |failure| fallback::not_deleted(self.name(), op, &key, failure),
            )
            .await
    }
}
