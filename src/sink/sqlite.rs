use async_trait::async_trait;
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::common::{EntityKey, ItemCode, RaceContext};
use crate::error::StoreError;
use crate::pipeline::{CorrectedState, Readings};
use crate::sink::EventStore;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS race_data (
      race_id INTEGER NOT NULL,
      timestamp INTEGER NOT NULL,
      player_id INTEGER NOT NULL,
      lap INTEGER NOT NULL,
      race_laps INTEGER NOT NULL,
      position INTEGER NOT NULL,
      coins INTEGER NOT NULL,
      item_1 TEXT NOT NULL,
      item_2 TEXT NOT NULL,
      PRIMARY KEY (race_id, timestamp, player_id)
    );
"#;

/// Race history persisted in SQLite. The connection is used from the blocking pool.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        info!("Opening race store at {}", path.display());
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            op(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn to_i64(value: u64, column: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} exceeds i64 range")))
}

fn parse_item(name: String) -> Result<ItemCode, StoreError> {
    name.parse()
        .map_err(|_| StoreError::Corrupt(format!("unknown item '{name}'")))
}

#[async_trait]
impl EventStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn write_event(
        &self,
        race: RaceContext,
        frame_index: u64,
        entity: EntityKey,
        state: &CorrectedState,
    ) -> Result<(), StoreError> {
        let race_id = to_i64(race.0, "race_id")?;
        let timestamp = to_i64(frame_index, "timestamp")?;
        let readings = state.readings;
        self.with_conn(move |conn| {
            debug!("Inserting race_data row for {entity} at frame {frame_index}");
            conn.execute(
                r#"
                INSERT OR REPLACE INTO race_data
                (race_id, timestamp, player_id, lap, race_laps, position, coins, item_1, item_2)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    race_id,
                    timestamp,
                    entity.player_id(),
                    readings.lap_num,
                    readings.race_laps,
                    readings.position,
                    readings.coins,
                    readings.item_slot_1.name(),
                    readings.item_slot_2.name(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_previous_events(
        &self,
        race: RaceContext,
        entity: EntityKey,
        limit: usize,
    ) -> Result<Vec<CorrectedState>, StoreError> {
        let race_id = to_i64(race.0, "race_id")?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT timestamp, lap, race_laps, position, coins, item_1, item_2
                FROM race_data
                WHERE race_id = ?1 AND player_id = ?2
                ORDER BY timestamp DESC
                LIMIT ?3
                "#,
            )?;
            let mut rows = stmt.query(params![race_id, entity.player_id(), limit])?;
            let mut states = Vec::new();
            while let Some(row) = rows.next()? {
                let timestamp: i64 = row.get(0)?;
                let frame_index = u64::try_from(timestamp)
                    .map_err(|_| StoreError::Corrupt(format!("negative timestamp {timestamp}")))?;
                states.push(CorrectedState {
                    entity,
                    frame_index,
                    race,
                    readings: Readings {
                        lap_num: row.get(1)?,
                        race_laps: row.get(2)?,
                        position: row.get(3)?,
                        coins: row.get(4)?,
                        item_slot_1: parse_item(row.get(5)?)?,
                        item_slot_2: parse_item(row.get(6)?)?,
                    },
                });
            }
            states.reverse();
            Ok(states)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{PlayerSlot, SourceId};

    fn state(frame: u64, item: ItemCode) -> CorrectedState {
        CorrectedState {
            entity: EntityKey::new(SourceId(1), PlayerSlot::P1),
            frame_index: frame,
            race: RaceContext(0),
            readings: Readings {
                position: 2,
                item_slot_1: item,
                coins: frame as u32,
                ..Readings::default()
            },
        }
    }

    #[tokio::test]
    async fn writes_and_reads_back_recent_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (frame, item) in [
            (10, ItemCode::Banana),
            (20, ItemCode::TripleRedShell),
            (30, ItemCode::None),
        ] {
            let s = state(frame, item);
            store
                .write_event(s.race, s.frame_index, s.entity, &s)
                .await
                .unwrap();
        }

        let entity = EntityKey::new(SourceId(1), PlayerSlot::P1);
        let recent = store
            .get_previous_events(RaceContext(0), entity, 2)
            .await
            .unwrap();
        assert_eq!(recent, vec![state(20, ItemCode::TripleRedShell), state(30, ItemCode::None)]);

        let other = EntityKey::new(SourceId(1), PlayerSlot::P2);
        assert!(
            store
                .get_previous_events(RaceContext(0), other, 5)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn same_frame_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("race.db")).unwrap();
        let first = state(10, ItemCode::Banana);
        let second = state(10, ItemCode::Star);
        for s in [first, second] {
            store.write_event(s.race, 10, s.entity, &s).await.unwrap();
        }
        let rows = store
            .get_previous_events(RaceContext(0), first.entity, 10)
            .await
            .unwrap();
        assert_eq!(rows, vec![second]);
    }
}
