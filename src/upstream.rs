/// HTTP client for one downstream service.
/// Keeps a pooled connection set and injects Basic credentials on every call;
/// it performs exactly one request per invocation and never retries.
use std::{sync::Arc, time::Duration};

use anyhow::{Context, ensure};
use http::StatusCode;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::{Serialize, de::DeserializeOwned};

use crate::config::{Cfg, DownstreamCfg};
use crate::fallback::ServiceResponse;
use crate::outcome::RemoteError;

/// Remote call adapter for one downstream.
pub struct UpstreamClient {
    /// Downstream name, used in error messages
    pub name: String,
    base_url: Url,
    username: String,
    password: String,
    /// Connection pool shared by clones
    http: Arc<Client>,
}

impl Clone for UpstreamClient {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            http: Arc::clone(&self.http),
        }
    }
}

impl UpstreamClient {
    /// Builds a client for `downstream`.
    ///
    /// No overall request timeout is set here: each attempt is bounded by the
    /// time limiter of the resilience chain instead.
    pub fn new(downstream: &DownstreamCfg, cfg: &Cfg) -> anyhow::Result<Self> {
        let base_url = Url::parse(&downstream.base_url)
            .with_context(|| format!("{} has an invalid base url {:?}", downstream.name, downstream.base_url))?;
        ensure!(
            !base_url.cannot_be_a_base(),
            "{} base url {base_url} cannot carry a path",
            downstream.name
        );

        let http = Client::builder()
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .build()?;

        Ok(Self {
            name: downstream.name.clone(),
            base_url,
            username: cfg.downstream_username.clone(),
            password: cfg.downstream_password.clone(),
            http: Arc::new(http),
        })
    }

    pub async fn get<S: AsRef<str>, T: DeserializeOwned>(&self, path: &[S]) -> Result<ServiceResponse<T>, RemoteError> {
        self.send(self.request(Method::GET, path)?).await
    }

    /// GET carrying a JSON body, used for lookups keyed by composite ids.
    pub async fn get_with_body<S, B, T>(&self, path: &[S], body: &B) -> Result<ServiceResponse<T>, RemoteError>
    where
        S: AsRef<str>,
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(self.request(Method::GET, path)?.json(body)).await
    }

    pub async fn post<S, B, T>(&self, path: &[S], body: &B) -> Result<ServiceResponse<T>, RemoteError>
    where
        S: AsRef<str>,
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(self.request(Method::POST, path)?.json(body)).await
    }

    pub async fn put<S, B, T>(&self, path: &[S], body: &B) -> Result<ServiceResponse<T>, RemoteError>
    where
        S: AsRef<str>,
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(self.request(Method::PUT, path)?.json(body)).await
    }

    pub async fn delete<S: AsRef<str>, T: DeserializeOwned>(&self, path: &[S]) -> Result<ServiceResponse<T>, RemoteError> {
        self.send(self.request(Method::DELETE, path)?).await
    }

    pub async fn delete_with_body<S, B, T>(&self, path: &[S], body: &B) -> Result<ServiceResponse<T>, RemoteError>
    where
        S: AsRef<str>,
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(self.request(Method::DELETE, path)?.json(body)).await
    }

    /// Base url with `segments` appended. Each segment is percent-encoded on
    /// its own, so `/`, `?` and `#` inside an id stay part of that id.
    pub fn url<S: AsRef<str>>(&self, segments: &[S]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                RemoteError::new(StatusCode::BAD_REQUEST, format!("{} base url cannot carry a path", self.name))
            })?;
            path.pop_if_empty();
            for segment in segments {
                let segment = segment.as_ref();
                // dot segments would be resolved away by any url parser
                if segment.is_empty() || segment == "." || segment == ".." {
                    return Err(RemoteError::new(
                        StatusCode::BAD_REQUEST,
                        format!("{segment:?} is not a valid path segment for {}", self.name),
                    ));
                }
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn request<S: AsRef<str>>(&self, method: Method, path: &[S]) -> Result<RequestBuilder, RemoteError> {
        let url = self.url(path)?;
        Ok(self
            .http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password)))
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<ServiceResponse<T>, RemoteError> {
        // ========== NETWORK ERRORS ==========
        // connection refused, DNS failure, reset...
        let resp = req
            .send()
            .await
            .map_err(|e| RemoteError::new(StatusCode::BAD_GATEWAY, format!("{} unreachable: {e}", self.name)))?;

        let status = resp.status();
        if !status.is_success() {
            // ========== HTTP ERRORS ==========
            let detail = resp.text().await.unwrap_or_default();
            return Err(RemoteError::new(
                status,
                format!("{} returned {status}: {}", self.name, detail.trim()),
            ));
        }

        // ========== SUCCESS ==========
        let body = resp.json::<T>().await.map_err(|e| {
            RemoteError::new(
                StatusCode::BAD_GATEWAY,
                format!("{} sent an unreadable body: {e}", self.name),
            )
        })?;
        Ok(ServiceResponse::live(status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> UpstreamClient {
        let cfg = Cfg::from_lookup(|k| (k == "USER_SERVICE_URL").then(|| base_url.to_owned())).unwrap();
        UpstreamClient::new(&cfg.users, &cfg).unwrap()
    }

    #[test]
    fn segments_are_appended_to_the_context_path() {
        let c = client("http://users:8700/user-service");
        let url = c.url(&["api", "users", "42"]).unwrap();
        assert_eq!(url.as_str(), "http://users:8700/user-service/api/users/42");

        let root = client("http://users:8700");
        assert_eq!(root.url(&["api", "users"]).unwrap().path(), "/api/users");
    }

    #[test]
    fn reserved_characters_stay_inside_their_segment() {
        let c = client("http://users:8700/user-service");

        let url = c.url(&["api", "users", "username", "ann?admin=1"]).unwrap();
        assert_eq!(url.path(), "/user-service/api/users/username/ann%3Fadmin=1");
        assert_eq!(url.query(), None);

        let url = c.url(&["api", "users", "../../actuator/env"]).unwrap();
        assert_eq!(url.path(), "/user-service/api/users/..%2F..%2Factuator%2Fenv");

        let url = c.url(&["api", "products", "5#x"]).unwrap();
        assert_eq!(url.path(), "/user-service/api/products/5%23x");
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn dot_segments_are_refused() {
        let c = client("http://users:8700/user-service");
        for bad in ["..", ".", ""] {
            let err = c.url(&["api", "users", bad]).unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn base_url_must_be_hierarchical() {
        let cfg = Cfg::from_lookup(|k| (k == "USER_SERVICE_URL").then(|| "mailto:ops@example.com".to_owned())).unwrap();
        assert!(UpstreamClient::new(&cfg.users, &cfg).is_err());
    }
}
