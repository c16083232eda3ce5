//! Startup and teardown around the serving phase.
//!
//! [`Lifespan::startup`] consumes the lifespan, so startup cannot run twice,
//! and only the [`Running`] token it returns can run teardown.

use crate::{AppState, ServerError};
use tellme_db::Metadata;

/// Work to do before the first request is accepted.
#[derive(Debug, Clone, Default)]
pub struct Lifespan {
    metadata: Metadata,
}

/// Proof that startup completed.
#[derive(Debug)]
#[must_use = "call `shutdown` once serving ends"]
pub struct Running {
    tables_created: usize,
}

impl Lifespan {
    pub fn new(metadata: Metadata) -> Self {
        Self { metadata }
    }

    /// Ensures every registered table exists, then marks `state` ready.
    ///
    /// # Errors
    ///
    /// Any schema failure is returned as-is and `state` stays not ready.
    pub async fn startup(self, state: &AppState) -> Result<Running, ServerError> {
        let storage = state.storage.clone();
        let metadata = self.metadata;

        let tables_created =
            tokio::task::spawn_blocking(move || storage.ensure_schema(&metadata)).await??;

        state.set_ready(true);
        tracing::info!(
            tables_created,
            url = %state.storage.location().database_url(),
            "startup complete, accepting requests"
        );

        Ok(Running { tables_created })
    }
}

impl Running {
    /// Tables created during startup.
    pub fn tables_created(&self) -> usize {
        self.tables_created
    }

    /// Teardown after serving ends. No cleanup is registered beyond dropping
    /// readiness; the storage handle lives until process exit.
    pub async fn shutdown(self, state: &AppState) {
        state.set_ready(false);
        let sessions = state.storage.session_counts();
        tracing::info!(
            opened = sessions.opened,
            active = sessions.active(),
            "teardown complete"
        );
    }
}
