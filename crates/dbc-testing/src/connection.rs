//! Connections and prepared statements of the memory backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dbc_core::{
    Connection, Error, IsolationLevel, PreparedStatement, Result, ResultSet, StatementHandle,
    StatementRegistry, Value,
};
use parking_lot::Mutex;

use crate::database::{MemoryDatabase, Tables, apply_write, evaluate};
use crate::fault::{DriverStats, FaultInjector};
use crate::sql::{self, Statement};

#[derive(Debug)]
struct Session {
    auto_commit: bool,
    isolation: IsolationLevel,
    /// Writes made while auto-commit is off, applied on commit.
    pending: Vec<Statement>,
}

pub(crate) struct ConnectionInner {
    id: u64,
    database: Arc<MemoryDatabase>,
    session: Mutex<Session>,
    closed: AtomicBool,
    statements: StatementRegistry,
    faults: Arc<FaultInjector>,
    stats: Arc<DriverStats>,
}

impl ConnectionInner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    /// Committed tables overlaid with this session's uncommitted writes.
    fn view(&self, session: &Session) -> Result<Tables> {
        let mut tables = self.database.snapshot();
        for write in &session.pending {
            apply_write(&mut tables, write)?;
        }
        Ok(tables)
    }

    fn query(&self, sql: &str) -> Result<ResultSet> {
        self.ensure_open()?;
        self.stats.queries.fetch_add(1, Ordering::SeqCst);
        if self.faults.take_query_failure() {
            return Err(Error::Query(format!("injected failure executing: {sql}")));
        }

        let statement = sql::parse(sql)?;
        if !statement.returns_rows() {
            return Err(Error::Query(format!("statement returns no rows: {sql}")));
        }
        if statement == Statement::SelectOne {
            return evaluate(&Tables::new(), &statement);
        }

        let session = self.session.lock();
        let tables = self.view(&session)?;
        evaluate(&tables, &statement)
    }

    fn update(&self, sql: &str) -> Result<u64> {
        self.ensure_open()?;
        let statement = sql::parse(sql)?;
        if statement.returns_rows() {
            return Err(Error::Query(format!("statement returns rows: {sql}")));
        }

        let mut session = self.session.lock();
        if session.auto_commit {
            return self.database.apply(std::slice::from_ref(&statement));
        }

        let mut tables = self.view(&session)?;
        let affected = apply_write(&mut tables, &statement)?;
        session.pending.push(statement);
        Ok(affected)
    }
}

/// A connection to a [`MemoryDatabase`].
pub struct MemoryConnection {
    inner: Arc<ConnectionInner>,
}

impl MemoryConnection {
    pub(crate) fn new(
        id: u64,
        database: Arc<MemoryDatabase>,
        faults: Arc<FaultInjector>,
        stats: Arc<DriverStats>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                database,
                session: Mutex::new(Session {
                    auto_commit: true,
                    isolation: IsolationLevel::default(),
                    pending: Vec::new(),
                }),
                closed: AtomicBool::new(false),
                statements: StatementRegistry::new(),
                faults,
                stats,
            }),
        }
    }

    /// Driver-assigned connection number.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Number of uncommitted writes in the current transaction.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.inner.session.lock().pending.len()
    }

    /// Number of prepared statements still open on this connection.
    #[must_use]
    pub fn open_statements(&self) -> usize {
        self.inner.statements.live_count()
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute_query(&self, sql: &str) -> Result<ResultSet> {
        self.inner.query(sql)
    }

    async fn execute_update(&self, sql: &str) -> Result<u64> {
        self.inner.update(sql)
    }

    async fn prepare_statement(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        self.inner.ensure_open()?;
        let placeholders = sql::count_placeholders(sql);
        Ok(Box::new(MemoryStatement {
            sql: sql.to_string(),
            params: vec![Value::Null; placeholders],
            connection: Arc::downgrade(&self.inner),
            handle: self.inner.statements.register(),
        }))
    }

    async fn set_auto_commit(&self, enabled: bool) -> Result<()> {
        self.inner.ensure_open()?;
        let mut session = self.inner.session.lock();
        if enabled && !session.auto_commit && !session.pending.is_empty() {
            let pending = std::mem::take(&mut session.pending);
            self.inner.database.apply(&pending)?;
        }
        session.auto_commit = enabled;
        Ok(())
    }

    async fn auto_commit(&self) -> Result<bool> {
        self.inner.ensure_open()?;
        Ok(self.inner.session.lock().auto_commit)
    }

    async fn commit(&self) -> Result<()> {
        self.inner.ensure_open()?;
        if self.inner.faults.take_commit_failure() {
            return Err(Error::Transaction("injected commit failure".into()));
        }
        let pending = std::mem::take(&mut self.inner.session.lock().pending);
        self.inner.database.apply(&pending)?;
        self.inner.stats.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.inner.ensure_open()?;
        if self.inner.faults.take_rollback_failure() {
            return Err(Error::Transaction("injected rollback failure".into()));
        }
        self.inner.session.lock().pending.clear();
        self.inner.stats.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_transaction_isolation(&self, level: IsolationLevel) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.session.lock().isolation = level;
        Ok(())
    }

    async fn transaction_isolation(&self) -> Result<IsolationLevel> {
        self.inner.ensure_open()?;
        Ok(self.inner.session.lock().isolation)
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.statements.notify_closing();
        self.inner.session.lock().pending.clear();
        self.inner.stats.closed.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(connection_id = self.inner.id, "memory connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn notify_closing(&self) {
        self.inner.statements.notify_closing();
    }
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A prepared statement on a [`MemoryConnection`].
///
/// Holds only a weak reference to its connection.
pub struct MemoryStatement {
    sql: String,
    params: Vec<Value>,
    connection: Weak<ConnectionInner>,
    handle: StatementHandle,
}

impl MemoryStatement {
    fn connection(&self) -> Result<Arc<ConnectionInner>> {
        self.handle.ensure_open()?;
        self.connection.upgrade().ok_or(Error::StatementClosed)
    }

    fn rendered(&self) -> Result<String> {
        sql::bind_placeholders(&self.sql, &self.params)
    }
}

#[async_trait]
impl PreparedStatement for MemoryStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn bind(&mut self, index: usize, value: Value) -> Result<()> {
        self.handle.ensure_open()?;
        let count = self.params.len();
        let slot = self
            .params
            .get_mut(index)
            .ok_or(Error::ParameterIndex { index, count })?;
        *slot = value;
        Ok(())
    }

    fn clear_parameters(&mut self) {
        self.params.iter_mut().for_each(|p| *p = Value::Null);
    }

    async fn execute_query(&mut self) -> Result<ResultSet> {
        let connection = self.connection()?;
        connection.query(&self.rendered()?)
    }

    async fn execute_update(&mut self) -> Result<u64> {
        let connection = self.connection()?;
        connection.update(&self.rendered()?)
    }

    fn close(&mut self) {
        self.handle.close();
    }

    fn is_closed(&self) -> bool {
        !self.handle.is_open()
    }
}
