//! Trait and types for resolving route metadata.
//!
//! Route records are owned by an external registry; this crate only reads
//! them for existence checks and display joins. The trait keeps that
//! collaborator swappable (an RPC-backed registry slots in without touching
//! the engines).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Metadata for a single monitored road route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub route_id: String,
    pub name: String,
    pub start_lat: Option<f64>,
    pub start_lng: Option<f64>,
    pub end_lat: Option<f64>,
    pub end_lng: Option<f64>,
    pub distance_km: Option<f64>,
}

/// Abstraction over the route metadata store.
#[async_trait::async_trait]
pub trait RouteRegistry: Send + Sync {
    /// Resolves a route by id, `None` when unknown.
    async fn get(&self, route_id: &str) -> Result<Option<Route>>;

    /// Returns all known routes, ordered by `route_id` ascending.
    async fn list(&self) -> Result<Vec<Route>>;
}

/// In-process registry backed by a fixed route set.
pub struct StaticRegistry {
    routes: BTreeMap<String, Route>,
}

impl StaticRegistry {
    pub fn new(routes: Vec<Route>) -> Self {
        let routes = routes
            .into_iter()
            .map(|r| (r.route_id.clone(), r))
            .collect();
        Self { routes }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[async_trait::async_trait]
impl RouteRegistry for StaticRegistry {
    async fn get(&self, route_id: &str) -> Result<Option<Route>> {
        Ok(self.routes.get(route_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Route>> {
        Ok(self.routes.values().cloned().collect())
    }
}
