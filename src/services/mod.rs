//! Resilient clients for the downstream services.
//!
//! Each downstream gets one [`ResilientResource`]: the HTTP adapter plus the
//! resilience chain it owns. CRUD operations are shared; service specific
//! lookups live next to their DTOs.

pub mod favourite;
pub mod product;
pub mod user;

use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::config::{Cfg, DownstreamCfg};
use crate::fallback::{self, DtoCollection, ServiceResponse};
use crate::outcome::Operation;
use crate::resilience::{Resilience, ResilienceSnapshot};
use crate::upstream::UpstreamClient;

pub use favourite::{FavouriteDto, FavouriteId, FavouriteService};
pub use product::{ProductDto, ProductService};
pub use user::{UserDto, UserService};

/// Bounds every DTO handled by a resilient resource satisfies.
pub trait Dto: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Dto for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// A REST collection on a downstream service, guarded by its resilience chain.
pub struct ResilientResource<T> {
    client: UpstreamClient,
    resilience: Resilience,
    /// Segments of the collection path, relative to the downstream base url
    path: &'static [&'static str],
    _dto: PhantomData<fn() -> T>,
}

impl<T: Dto> ResilientResource<T> {
    pub fn new(client: UpstreamClient, resilience: Resilience, path: &'static [&'static str]) -> Self {
        Self {
            client,
            resilience,
            path,
            _dto: PhantomData,
        }
    }

    pub fn from_cfg(downstream: &DownstreamCfg, cfg: &Cfg, path: &'static [&'static str]) -> anyhow::Result<Self> {
        let client = UpstreamClient::new(downstream, cfg)?;
        let resilience = Resilience::new(&downstream.name, &downstream.resilience);
        Ok(Self::new(client, resilience, path))
    }

    pub fn name(&self) -> &str {
        self.resilience.service()
    }

    pub fn snapshot(&self) -> ResilienceSnapshot {
        self.resilience.snapshot()
    }

    pub async fn find_all(&self) -> ServiceResponse<DtoCollection<T>> {
        let op = Operation::FindAll;
        debug!(service = %self.name(), operation = %op, "calling downstream");
        self.resilience
            .call(
                op,
                || self.client.get(self.path),
                |failure| fallback::empty_collection(self.name(), op, failure),
            )
            .await
    }

    pub async fn find_by_id(&self, id: &str) -> ServiceResponse<Option<T>> {
        let path = self.at(&[id]);
        self.lookup(Operation::FindById, &path, id).await
    }

    pub async fn save(&self, dto: T) -> ServiceResponse<T> {
        let op = Operation::Save;
        debug!(service = %self.name(), operation = %op, "calling downstream");
        self.resilience
            .call(
                op,
                || self.client.post(self.path, &dto),
                |failure| fallback::echo(self.name(), op, None, dto.clone(), failure),
            )
            .await
    }

    pub async fn update(&self, dto: T) -> ServiceResponse<T> {
        let op = Operation::Update;
        debug!(service = %self.name(), operation = %op, "calling downstream");
        self.resilience
            .call(
                op,
                || self.client.put(self.path, &dto),
                |failure| fallback::echo(self.name(), op, None, dto.clone(), failure),
            )
            .await
    }

    pub async fn update_by_id(&self, id: &str, dto: T) -> ServiceResponse<T> {
        let op = Operation::UpdateById;
        let path = self.at(&[id]);
        debug!(service = %self.name(), operation = %op, id, "calling downstream");
        self.resilience
            .call(
                op,
                || self.client.put(&path, &dto),
                |failure| fallback::echo(self.name(), op, Some(id), dto.clone(), failure),
            )
            .await
    }

    pub async fn delete_by_id(&self, id: &str) -> ServiceResponse<bool> {
        let path = self.at(&[id]);
        self.remove(Operation::DeleteById, &path, id).await
    }

    /// Collection path followed by `tail`, one segment per element.
    fn at(&self, tail: &[&str]) -> Vec<String> {
        let mut path: Vec<String> = self.path.iter().map(|s| (*s).to_owned()).collect();
        path.extend(tail.iter().map(|s| (*s).to_owned()));
        path
    }

    /// Single-item GET; `key` only identifies the item in logs.
    async fn lookup(&self, op: Operation, path: &[String], key: &str) -> ServiceResponse<Option<T>> {
        debug!(service = %self.name(), operation = %op, key, "calling downstream");
        self.resilience
            .call(
                op,
                || self.client.get(path),
                |failure| fallback::absent(self.name(), op, key, failure),
            )
            .await
    }

    async fn remove(&self, op: Operation, path: &[String], key: &str) -> ServiceResponse<bool> {
        debug!(service = %self.name(), operation = %op, key, "calling downstream");
        self.resilience
            .call(
                op,
                || self.client.delete(path),
                |failure| fallback::not_deleted(self.name(), op, key, failure),
            )
            .await
    }
}

/// All downstream clients, created once at startup.
pub struct Downstreams {
    pub users: UserService,
    pub products: ProductService,
    pub favourites: FavouriteService,
}

impl Downstreams {
    pub fn from_cfg(cfg: &Cfg) -> anyhow::Result<Self> {
        Ok(Self {
            users: ResilientResource::from_cfg(&cfg.users, cfg, user::USERS_PATH)?,
            products: ResilientResource::from_cfg(&cfg.products, cfg, product::PRODUCTS_PATH)?,
            favourites: ResilientResource::from_cfg(&cfg.favourites, cfg, favourite::FAVOURITES_PATH)?,
        })
    }

    pub fn snapshots(&self) -> Vec<ResilienceSnapshot> {
        vec![
            self.users.snapshot(),
            self.products.snapshot(),
            self.favourites.snapshot(),
        ]
    }
}
