use async_trait::async_trait;
use futures_util::{TryStreamExt, stream};
use serde_json::{Map, Value};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    EntityId, Event, Result, Sequence, Snapshot, StorageError, Version,
    store::{EventStream, Storage},
};

/// Rows fetched per round trip while streaming the whole log.
const PAGE_SIZE: i64 = 500;

/// PostgreSQL-backed storage implementation.
///
/// Uses three tables: `events` (append-only log), `projections` (one row per
/// global projection) and `snapshots` (one row per entity projection checkpoint).
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Creates a new PostgreSQL storage.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<Event> {
        let payload: Map<String, Value> = serde_json::from_value(row.try_get("payload")?)?;

        Ok(Event {
            aggregate: row.try_get("aggregate")?,
            id: EntityId::new(row.try_get::<String, _>("entity_id")?),
            event_type: row.try_get("event_type")?,
            payload,
            sequence: Sequence::new(row.try_get::<i64, _>("sequence")? as u64),
            insert_date: row.try_get("insert_date")?,
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn store_event(&self, event: &Event) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (aggregate, entity_id, sequence, event_type, payload, insert_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&event.aggregate)
        .bind(event.id.as_str())
        .bind(event.sequence.as_u64() as i64)
        .bind(&event.event_type)
        .bind(Value::Object(event.payload.clone()))
        .bind(event.insert_date)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            // A primary key violation means the sequence is already taken
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("events_pkey")
            {
                return StorageError::DuplicateSequence {
                    aggregate: event.aggregate.clone(),
                    id: event.id.clone(),
                    sequence: event.sequence,
                };
            }
            StorageError::Database(e)
        })?;

        Ok(())
    }

    async fn get_events(
        &self,
        aggregate: &str,
        id: &EntityId,
        from: Sequence,
    ) -> Result<EventStream> {
        let rows = sqlx::query(
            r#"
            SELECT aggregate, entity_id, sequence, event_type, payload, insert_date
            FROM events
            WHERE aggregate = $1 AND entity_id = $2 AND sequence >= $3
            ORDER BY sequence ASC
            "#,
        )
        .bind(aggregate)
        .bind(id.as_str())
        .bind(from.as_u64() as i64)
        .fetch_all(&self.pool)
        .await?;

        let events = rows
            .into_iter()
            .map(Self::row_to_event)
            .collect::<Result<Vec<_>>>()?;

        Ok(Box::pin(stream::iter(
            events.into_iter().map(Ok::<_, StorageError>),
        )))
    }

    async fn get_all_events(&self) -> Result<EventStream> {
        let pages = stream::try_unfold(Some((self.pool.clone(), 0_i64)), |cursor| async move {
            let Some((pool, offset)) = cursor else {
                return Ok::<_, StorageError>(None);
            };

            let rows = sqlx::query(
                r#"
                SELECT aggregate, entity_id, sequence, event_type, payload, insert_date
                FROM events
                ORDER BY insert_date ASC, sequence ASC, position ASC
                LIMIT $1 OFFSET $2
                "#,
            )
            .bind(PAGE_SIZE)
            .bind(offset)
            .fetch_all(&pool)
            .await?;

            let fetched = rows.len() as i64;
            let events = rows
                .into_iter()
                .map(Self::row_to_event)
                .collect::<Result<Vec<_>>>()?;
            tracing::trace!(offset, fetched, "fetched event page");

            let next = (fetched == PAGE_SIZE).then(|| (pool, offset + PAGE_SIZE));
            let page = stream::iter(events.into_iter().map(Ok::<_, StorageError>));
            Ok(Some((page, next)))
        });

        Ok(Box::pin(pages.try_flatten()))
    }

    async fn store_projection(&self, name: &str, state: &Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO projections (name, state, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (name) DO UPDATE SET
                state = EXCLUDED.state,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(name)
        .bind(state)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_projection(&self, name: &str) -> Result<Option<Value>> {
        let state: Option<Value> =
            sqlx::query_scalar("SELECT state FROM projections WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(state)
    }

    async fn store_snapshot(
        &self,
        aggregate: &str,
        id: &EntityId,
        projection: &str,
        snapshot: &Snapshot,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (aggregate, entity_id, projection, version, state, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (aggregate, entity_id, projection) DO UPDATE SET
                version = EXCLUDED.version,
                state = EXCLUDED.state,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(aggregate)
        .bind(id.as_str())
        .bind(projection)
        .bind(snapshot.version.as_u64() as i64)
        .bind(&snapshot.state)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_snapshot(
        &self,
        aggregate: &str,
        id: &EntityId,
        projection: &str,
    ) -> Result<Option<Snapshot>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT version, state
            FROM snapshots
            WHERE aggregate = $1 AND entity_id = $2 AND projection = $3
            "#,
        )
        .bind(aggregate)
        .bind(id.as_str())
        .bind(projection)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Snapshot {
                version: Version::new(row.try_get::<i64, _>("version")? as u64),
                state: row.try_get("state")?,
            })),
            None => Ok(None),
        }
    }
}
