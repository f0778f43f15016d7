//! Session handle: transport, schema, configuration and reentrant
//! transaction scopes.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::OgmConfig;
use crate::engine::{Row, Transport};
use crate::error::Result;
use crate::metrics::{MetricsSnapshot, SessionMetrics};
use crate::query::{Chain, CypherQuery};
use crate::schema::{NodeModel, Schema};

/// Lifecycle of the outermost transaction scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// No scope is open.
    Idle,
    /// A scope is open and nothing has failed.
    Active,
    /// A scope is open and something inside failed; it will roll back.
    Doomed,
}

/// How an outermost transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// Still open.
    Pending,
    /// Committed by the transport.
    Committed,
    /// Rolled back, or the commit itself failed.
    RolledBack,
}

/// Shared view of one outermost transaction's outcome. Entities written
/// inside the transaction hold a clone and report themselves persisted only
/// once it commits.
#[derive(Clone, Debug)]
pub struct TxTicket(Arc<Mutex<TxOutcome>>);

impl TxTicket {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Mutex::new(TxOutcome::Pending)))
    }

    /// Current outcome.
    pub fn outcome(&self) -> TxOutcome {
        *self.0.lock()
    }

    pub(crate) fn settle(&self, outcome: TxOutcome) {
        *self.0.lock() = outcome;
    }
}

#[derive(Debug)]
struct ScopeState {
    depth: usize,
    failed: bool,
    ticket: Option<TxTicket>,
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    schema: Arc<Schema>,
    config: OgmConfig,
    scope: Mutex<ScopeState>,
    metrics: SessionMetrics,
}

/// Cheap-to-clone handle shared by chains and entities.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.inner.config)
            .field("state", &self.tx_state())
            .finish()
    }
}

impl Session {
    /// Session with default configuration.
    pub fn new(transport: Arc<dyn Transport>, schema: Schema) -> Self {
        Self::with_config(transport, schema, OgmConfig::default())
    }

    /// Session with explicit configuration.
    pub fn with_config(transport: Arc<dyn Transport>, schema: Schema, config: OgmConfig) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                transport,
                schema: Arc::new(schema),
                config,
                scope: Mutex::new(ScopeState {
                    depth: 0,
                    failed: false,
                    ticket: None,
                }),
                metrics: SessionMetrics::default(),
            }),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &OgmConfig {
        &self.inner.config
    }

    /// Registered models.
    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// Counters since the session was opened.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub(crate) fn record_cache_hit(&self) {
        self.inner.metrics.record_cache_hit();
    }

    /// Node model by name.
    pub fn model(&self, name: &str) -> Result<Arc<NodeModel>> {
        self.inner.schema.node_model(name)
    }

    /// `Model.all`: every node of the model, bound to the default identifier.
    pub fn all(&self, model: &str) -> Result<Chain> {
        let ident = self.inner.config.identifier.clone();
        self.all_as(model, &ident)
    }

    /// `Model.as(ident)`.
    pub fn all_as(&self, model: &str, ident: &str) -> Result<Chain> {
        Ok(Chain::for_model(self.clone(), self.model(model)?, ident))
    }

    /// Sends one query to the transport. A failure inside an open scope dooms
    /// the scope.
    pub fn execute(&self, query: &CypherQuery) -> Result<Vec<Row>> {
        self.inner.metrics.record_query();
        if self.inner.config.log_queries {
            debug!(
                cypher = %query.to_cypher(),
                params = query.params.len(),
                "Executing query"
            );
        }
        match self.inner.transport.execute(query) {
            Ok(rows) => Ok(rows),
            Err(err) => {
                let mut state = self.inner.scope.lock();
                if state.depth > 0 {
                    state.failed = true;
                }
                warn!(error = %err, "Query failed");
                Err(err.into())
            }
        }
    }

    /// State of the outermost scope.
    pub fn tx_state(&self) -> TxState {
        let state = self.inner.scope.lock();
        match (state.depth, state.failed) {
            (0, _) => TxState::Idle,
            (_, false) => TxState::Active,
            (_, true) => TxState::Doomed,
        }
    }

    /// Current nesting depth; 0 outside any scope.
    pub fn scope_depth(&self) -> usize {
        self.inner.scope.lock().depth
    }

    /// Enters a scope. The outermost entry begins a transaction; nested
    /// entries join it.
    pub fn begin_scope(&self) -> Result<TxScope<'_>> {
        let mut state = self.inner.scope.lock();
        if state.depth == 0 {
            self.inner.transport.begin()?;
            self.inner.metrics.record_begin();
            state.failed = false;
            state.ticket = Some(TxTicket::new());
            debug!("Transaction scope opened");
        }
        state.depth += 1;
        let depth = state.depth;
        let ticket = state.ticket.get_or_insert_with(TxTicket::new).clone();
        Ok(TxScope {
            session: self,
            depth,
            ticket,
            finished: false,
        })
    }

    /// Runs `f` inside a scope: the outermost scope commits when every nested
    /// unit succeeded and rolls back otherwise, on every exit path.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Session) -> Result<T>,
    {
        let scope = self.begin_scope()?;
        match f(self) {
            Ok(value) => {
                scope.commit()?;
                Ok(value)
            }
            Err(err) => {
                scope.abort()?;
                Err(err)
            }
        }
    }

    fn leave_scope(&self, success: bool) -> Result<()> {
        let mut state = self.inner.scope.lock();
        if !success {
            state.failed = true;
        }
        state.depth = state.depth.saturating_sub(1);
        if state.depth > 0 {
            return Ok(());
        }
        let failed = std::mem::replace(&mut state.failed, false);
        let ticket = state.ticket.take();
        let settle = |outcome| {
            if let Some(ticket) = &ticket {
                ticket.settle(outcome);
            }
        };
        if failed {
            warn!("Transaction scope rolled back");
            self.inner.metrics.record_rollback();
            settle(TxOutcome::RolledBack);
            self.inner.transport.rollback()?;
        } else {
            if let Err(err) = self.inner.transport.commit() {
                settle(TxOutcome::RolledBack);
                return Err(err.into());
            }
            settle(TxOutcome::Committed);
            self.inner.metrics.record_commit();
            debug!("Transaction scope committed");
        }
        Ok(())
    }
}

/// Guard for one level of a reentrant scope. Dropping it without
/// [`commit`](TxScope::commit) counts as failure.
pub struct TxScope<'s> {
    session: &'s Session,
    depth: usize,
    ticket: TxTicket,
    finished: bool,
}

impl TxScope<'_> {
    /// Whether this guard opened the underlying transaction.
    pub fn is_outermost(&self) -> bool {
        self.depth == 1
    }

    /// Outcome handle of the transaction this scope belongs to.
    pub fn ticket(&self) -> &TxTicket {
        &self.ticket
    }

    /// Leaves the scope successfully; commits if outermost and nothing inside
    /// failed.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.session.leave_scope(true)
    }

    /// Leaves the scope and dooms the whole transaction.
    pub fn abort(mut self) -> Result<()> {
        self.finished = true;
        self.session.leave_scope(false)
    }
}

impl Drop for TxScope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.session.leave_scope(false) {
                warn!(error = %err, "Rollback during scope drop failed");
            }
        }
    }
}
