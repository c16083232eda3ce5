//! The mount point for externally defined routes.

use axum::Router;
use tellme_db::{Metadata, Model, TableDef};

/// Routes contributed by a feature module together with the tables they use.
///
/// The host merges the router as-is and feeds the metadata to schema-ensure at
/// startup.
#[derive(Default)]
pub struct RouteSet {
    router: Router,
    metadata: Metadata,
}

impl RouteSet {
    /// An empty route set with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds handlers. Handlers reach storage through
    /// `Extension<Arc<AppState>>` and [`crate::AppState::run_session`].
    pub fn router(mut self, router: Router) -> Self {
        self.router = self.router.merge(router);
        self
    }

    /// Registers the table backing `M`.
    pub fn model<M: Model>(mut self) -> Self {
        self.metadata = self.metadata.model::<M>();
        self
    }

    /// Registers a table by definition.
    pub fn table(mut self, def: TableDef) -> Self {
        self.metadata = self.metadata.table(def);
        self
    }

    /// Folds another route set into this one.
    pub fn include(mut self, other: RouteSet) -> Self {
        self.router = self.router.merge(other.router);
        self.metadata = self.metadata.merge(other.metadata);
        self
    }

    /// Tables registered so far.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Splits into the router to mount and the tables to ensure at startup.
    pub fn into_parts(self) -> (Router, Metadata) {
        (self.router, self.metadata)
    }
}
