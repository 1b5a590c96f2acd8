use super::Database;
use anyhow::Result;
use log::debug;
use scylla::{
    response::query_result::QueryResult,
    serialize::row::SerializeRow,
    statement::{batch::Batch, prepared::PreparedStatement},
};
use tokio::sync::Mutex;

/// A CQL statement prepared on first use and reused afterwards.
///
/// Meant to live in a `static` next to the function issuing the query.
pub struct CachedPreparedStatement {
    statement: &'static str,
    prepared: Mutex<Option<PreparedStatement>>,
}

impl CachedPreparedStatement {
    pub const fn new(statement: &'static str) -> Self {
        Self {
            statement,
            prepared: Mutex::const_new(None),
        }
    }

    pub async fn get_prepared_statement(&self, db: &Database) -> Result<PreparedStatement> {
        let mut lock = self.prepared.lock().await;

        // Tests share these statics across keyspaces, so never reuse there.
        #[cfg(not(test))]
        if let Some(prepared) = &*lock {
            return Ok(prepared.clone());
        }

        debug!("Preparing statement: {}", self.statement.replace('\n', " "));
        let prepared = db.prepare(self.statement).await?;
        *lock = Some(prepared.clone());

        Ok(prepared)
    }

    /// A thin wrapper around [`Session::execute_unpaged`].
    ///
    /// [`Session::execute_unpaged`]: scylla::client::session::Session::execute_unpaged
    pub async fn execute_unpaged(
        &self,
        db: &Database,
        values: impl SerializeRow,
    ) -> Result<QueryResult> {
        let prepared = self.get_prepared_statement(db).await?;

        db.execute_unpaged(&prepared, &values)
            .await
            .map_err(Into::into)
    }

    /// Runs this statement once per entry of `values` inside a single logged batch.
    pub async fn execute_batch<V: SerializeRow>(&self, db: &Database, values: Vec<V>) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }

        let prepared = self.get_prepared_statement(db).await?;

        let mut batch = Batch::default();
        for _ in &values {
            batch.append_statement(prepared.clone());
        }

        db.batch(&batch, values).await?;

        Ok(())
    }
}
