//! Course and lab catalog client.
//!
//! Every lookup resolves to data: when the remote catalog is unreachable,
//! answers with an error status, or returns an unexpected shape, the bundled
//! fixtures are served instead and the result is tagged as a fallback.

use std::sync::OnceLock;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::CatalogError;
use crate::models::{Course, Lab, RegionCode};

pub const REGION_HEADER: &str = "x-region";

// unreserved characters stay as-is inside a path segment
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Result of a catalog lookup: live data, or fixture data plus the reason.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Live(T),
    Fallback { data: T, reason: String },
}

impl<T> Fetched<T> {
    pub fn into_inner(self) -> T {
        match self {
            Fetched::Live(data) | Fetched::Fallback { data, .. } => data,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Fetched::Live(_))
    }

    /// `"live"` or `"fallback"`.
    pub fn source(&self) -> &'static str {
        if self.is_live() {
            "live"
        } else {
            "fallback"
        }
    }
}

/// An entity served by the catalog under `/api/v1/{COLLECTION}`.
pub trait CatalogEntity: DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: &'static str;

    fn slug(&self) -> &str;
    fn fixtures() -> &'static [Self];
}

impl CatalogEntity for Course {
    const COLLECTION: &'static str = "courses";

    fn slug(&self) -> &str {
        &self.slug
    }

    fn fixtures() -> &'static [Self] {
        static COURSES: OnceLock<Vec<Course>> = OnceLock::new();
        COURSES.get_or_init(|| parse_fixtures(include_str!("../fixtures/courses.json"), "courses"))
    }
}

impl CatalogEntity for Lab {
    const COLLECTION: &'static str = "labs";

    fn slug(&self) -> &str {
        &self.slug
    }

    fn fixtures() -> &'static [Self] {
        static LABS: OnceLock<Vec<Lab>> = OnceLock::new();
        LABS.get_or_init(|| parse_fixtures(include_str!("../fixtures/labs.json"), "labs"))
    }
}

fn parse_fixtures<E: DeserializeOwned>(raw: &str, what: &str) -> Vec<E> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::error!(what, error = %e, "bundled fixtures do not parse");
        Vec::new()
    })
}

#[derive(Clone)]
pub struct CatalogClient {
    client: Client,
    base_url: Option<String>,
}

impl CatalogClient {
    /// `base_url` of `None` means every lookup is served from fixtures.
    pub fn new(base_url: Option<String>, timeout: Duration) -> Result<Self, CatalogError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url
            .map(|u| u.trim().trim_end_matches('/').to_owned())
            .filter(|u| !u.is_empty());
        Ok(Self { client, base_url })
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    pub async fn fetch_list<E: CatalogEntity>(
        &self,
        token: Option<&str>,
        region: Option<RegionCode>,
    ) -> Fetched<Vec<E>> {
        let path = format!("/api/v1/{}", E::COLLECTION);
        let result = match self.get_json(&path, token, region).await {
            Ok(body) => parse_list::<E>(body),
            Err(e) => Err(e),
        };
        match result {
            Ok(items) => Fetched::Live(items),
            Err(e) => {
                tracing::warn!(collection = E::COLLECTION, reason = %e, "serving fixture catalog");
                Fetched::Fallback {
                    data: E::fixtures().to_vec(),
                    reason: e.to_string(),
                }
            }
        }
    }

    pub async fn fetch_by_slug<E: CatalogEntity>(
        &self,
        slug: &str,
        token: Option<&str>,
        region: Option<RegionCode>,
    ) -> Fetched<Option<E>> {
        let path = format!(
            "/api/v1/{}/{}",
            E::COLLECTION,
            utf8_percent_encode(slug, PATH_SEGMENT)
        );
        let result = match self.get_json(&path, token, region).await {
            Ok(body) => parse_one::<E>(body),
            Err(e) => Err(e),
        };
        match result {
            Ok(item) => Fetched::Live(item),
            Err(e) => {
                tracing::warn!(collection = E::COLLECTION, slug, reason = %e, "serving fixture entry");
                Fetched::Fallback {
                    data: E::fixtures().iter().find(|x| x.slug() == slug).cloned(),
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn get_json(
        &self,
        path: &str,
        token: Option<&str>,
        region: Option<RegionCode>,
    ) -> Result<Value, CatalogError> {
        let base = self.base_url.as_deref().ok_or(CatalogError::NotConfigured)?;
        let mut req = self.client.get(format!("{base}{path}"));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        if let Some(region) = region {
            req = req.header(REGION_HEADER, region.as_str());
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            return Err(CatalogError::HttpStatus(res.status()));
        }
        Ok(res.json().await?)
    }
}

/// Accepts a bare array or `{ "data": [...] }`.
pub fn parse_list<E: DeserializeOwned>(body: Value) -> Result<Vec<E>, CatalogError> {
    let items = match body {
        Value::Array(_) => body,
        Value::Object(mut obj) => match obj.remove("data") {
            Some(data @ Value::Array(_)) => data,
            _ => return Err(CatalogError::Shape),
        },
        _ => return Err(CatalogError::Shape),
    };
    serde_json::from_value(items).map_err(|_| CatalogError::Shape)
}

/// Accepts a bare object or `{ "data": {...} }`. `{ "data": null }` is a
/// genuine "not found".
pub fn parse_one<E: DeserializeOwned>(body: Value) -> Result<Option<E>, CatalogError> {
    let Value::Object(mut obj) = body else {
        return Err(CatalogError::Shape);
    };
    let entity = match obj.remove("data") {
        Some(Value::Null) => return Ok(None),
        Some(data @ Value::Object(_)) => data,
        Some(_) => return Err(CatalogError::Shape),
        None => Value::Object(obj),
    };
    serde_json::from_value(entity).map(Some).map_err(|_| CatalogError::Shape)
}
