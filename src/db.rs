use crate::affiliate::AffiliateRecord;
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::watch;
use tracing::debug;

// ============================================================================
// STORE CONTRACTS
// ============================================================================

/// Record store collaborator.
///
/// Writes are keyed by internal id; distributor-id uniqueness is checked by
/// the caller, not the store. Subscribers see the revision bump only after a
/// write has been committed.
pub trait RecordStore {
    /// All records in insertion order
    fn all_records(&self) -> Result<Vec<AffiliateRecord>>;

    fn upsert(&mut self, record: &AffiliateRecord) -> Result<()>;

    /// Returns false when no record had this id
    fn delete(&mut self, id: &str) -> Result<bool>;

    /// All-or-nothing batch write
    fn upsert_batch(&mut self, records: &[AffiliateRecord]) -> Result<usize>;

    /// All-or-nothing batch delete
    fn delete_batch(&mut self, ids: &[String]) -> Result<usize>;

    /// Revision counter, bumped on every committed change
    fn subscribe(&self) -> watch::Receiver<u64>;

    /// Append to the audit trail, if the store keeps one
    fn record_event(&mut self, _event: &Event) -> Result<()> {
        Ok(())
    }

    /// Batch write plus its audit events. Transactional stores commit both
    /// or neither; the default writes the batch first.
    fn upsert_batch_with_events(&mut self, records: &[AffiliateRecord], events: &[Event]) -> Result<usize> {
        let written = self.upsert_batch(records)?;
        if written > 0 {
            for event in events {
                self.record_event(event)?;
            }
        }
        Ok(written)
    }

    /// Batch delete plus its audit events, same contract as above
    fn delete_batch_with_events(&mut self, ids: &[String], events: &[Event]) -> Result<usize> {
        let removed = self.delete_batch(ids)?;
        for event in events {
            self.record_event(event)?;
        }
        Ok(removed)
    }
}

/// Asset store collaborator: asset id ("rank-<Rank>" or "club-pin") → image reference
pub trait AssetStore {
    fn assets(&self) -> Result<HashMap<String, String>>;

    fn set_asset(&mut self, asset_id: &str, image: &str) -> Result<()>;

    fn delete_asset(&mut self, asset_id: &str) -> Result<bool>;
}

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Event for audit trail ("every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteStore {
    conn: Connection,
    revision: watch::Sender<u64>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        let (revision, _) = watch::channel(0);
        Ok(SqliteStore { conn, revision })
    }

    /// Current revision
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM affiliates", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn events_for_entity(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        get_events_for_entity(&self.conn, entity_type, entity_id)
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }
}

impl RecordStore for SqliteStore {
    fn all_records(&self) -> Result<Vec<AffiliateRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, distributor_id, display_name, rank_name, country,
                    photo_ref, quote, is_honored_member, hidden
             FROM affiliates
             ORDER BY seq",
        )?;

        let records = stmt
            .query_map([], |row| {
                Ok(AffiliateRecord {
                    id: row.get(0)?,
                    distributor_id: row.get(1)?,
                    display_name: row.get(2)?,
                    rank_name: row.get(3)?,
                    country: row.get(4)?,
                    photo_ref: row.get(5)?,
                    quote: row.get(6)?,
                    is_honored_member: row.get(7)?,
                    hidden: row.get(8)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn upsert(&mut self, record: &AffiliateRecord) -> Result<()> {
        let tx = self.conn.transaction()?;
        upsert_affiliate(&tx, record)?;
        insert_event(
            &tx,
            &Event::new(
                "affiliate_saved",
                "affiliate",
                &record.id,
                serde_json::json!({
                    "distributor_id": record.distributor_id,
                    "rank": record.rank_name,
                    "hidden": record.hidden,
                }),
                "admin",
            ),
        )?;
        tx.commit()?;

        debug!(id = %record.id, "affiliate upserted");
        self.bump();
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        let tx = self.conn.transaction()?;
        let removed = tx.execute("DELETE FROM affiliates WHERE id = ?1", params![id])?;
        if removed > 0 {
            insert_event(
                &tx,
                &Event::new("affiliate_deleted", "affiliate", id, serde_json::json!({}), "admin"),
            )?;
        }
        tx.commit()?;

        if removed > 0 {
            debug!(id, "affiliate deleted");
            self.bump();
        }
        Ok(removed > 0)
    }

    fn upsert_batch(&mut self, records: &[AffiliateRecord]) -> Result<usize> {
        self.upsert_batch_with_events(records, &[])
    }

    fn delete_batch(&mut self, ids: &[String]) -> Result<usize> {
        self.delete_batch_with_events(ids, &[])
    }

    fn upsert_batch_with_events(&mut self, records: &[AffiliateRecord], events: &[Event]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        for record in records {
            upsert_affiliate(&tx, record)?;
        }
        for event in events {
            insert_event(&tx, event)?;
        }
        tx.commit()?;

        debug!(count = records.len(), "affiliate batch upserted");
        self.bump();
        Ok(records.len())
    }

    fn delete_batch_with_events(&mut self, ids: &[String], events: &[Event]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        for id in ids {
            removed += tx.execute("DELETE FROM affiliates WHERE id = ?1", params![id])?;
        }
        for event in events {
            insert_event(&tx, event)?;
        }
        tx.commit()?;

        debug!(removed, "affiliate batch deleted");
        if removed > 0 {
            self.bump();
        }
        Ok(removed)
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn record_event(&mut self, event: &Event) -> Result<()> {
        insert_event(&self.conn, event)
    }
}

impl AssetStore for SqliteStore {
    fn assets(&self) -> Result<HashMap<String, String>> {
        let mut stmt = self.conn.prepare("SELECT asset_id, image FROM assets")?;
        let assets = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(assets)
    }

    fn set_asset(&mut self, asset_id: &str, image: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO assets (asset_id, image, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(asset_id) DO UPDATE SET image = excluded.image, updated_at = excluded.updated_at",
            params![asset_id, image, Utc::now().to_rfc3339()],
        )?;
        insert_event(
            &tx,
            &Event::new("asset_saved", "asset", asset_id, serde_json::json!({}), "admin"),
        )?;
        tx.commit()?;

        self.bump();
        Ok(())
    }

    fn delete_asset(&mut self, asset_id: &str) -> Result<bool> {
        let tx = self.conn.transaction()?;
        let removed = tx.execute("DELETE FROM assets WHERE asset_id = ?1", params![asset_id])?;
        if removed > 0 {
            insert_event(
                &tx,
                &Event::new("asset_deleted", "asset", asset_id, serde_json::json!({}), "admin"),
            )?;
        }
        tx.commit()?;

        if removed > 0 {
            self.bump();
        }
        Ok(removed > 0)
    }
}

// ============================================================================
// SCHEMA & QUERIES
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases report "memory")
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

    // ==========================================================================
    // Affiliates Table (seq keeps insertion order stable across upserts)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS affiliates (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT UNIQUE NOT NULL,
            distributor_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            rank_name TEXT NOT NULL,
            country TEXT,
            photo_ref TEXT,
            quote TEXT,
            is_honored_member INTEGER NOT NULL DEFAULT 0,
            hidden INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Assets Table (pins)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS assets (
            asset_id TEXT PRIMARY KEY,
            image TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail / event sourcing)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_distributor_id ON affiliates(distributor_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

fn upsert_affiliate(conn: &Connection, record: &AffiliateRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO affiliates (
            id, distributor_id, display_name, rank_name, country,
            photo_ref, quote, is_honored_member, hidden, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(id) DO UPDATE SET
            distributor_id = excluded.distributor_id,
            display_name = excluded.display_name,
            rank_name = excluded.rank_name,
            country = excluded.country,
            photo_ref = excluded.photo_ref,
            quote = excluded.quote,
            is_honored_member = excluded.is_honored_member,
            hidden = excluded.hidden,
            updated_at = excluded.updated_at",
        params![
            record.id,
            record.distributor_id,
            record.display_name,
            record.rank_name,
            record.country,
            record.photo_ref,
            record.quote,
            record.is_honored_member,
            record.hidden,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, distributor_id: &str, rank: &str) -> AffiliateRecord {
        AffiliateRecord::new(id.to_string(), distributor_id.to_string(), format!("Name {}", id), rank.to_string())
    }

    #[test]
    fn test_upsert_preserves_insertion_order() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        store.upsert(&record("a", "1", "Oro")).unwrap();
        store.upsert(&record("b", "2", "Oro")).unwrap();
        store.upsert(&record("c", "3", "Oro")).unwrap();

        // Updating "a" must not move it to the end
        let promoted = record("a", "1", "Platino").with_quote("Arriba");
        store.upsert(&promoted).unwrap();

        let records = store.all_records().unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(records[0].rank_name, "Platino");
        assert_eq!(records[0].quote.as_deref(), Some("Arriba"));
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_round_trips_optional_fields_and_flags() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let full = record("a", "1", "Oro")
            .with_country("Chile")
            .with_photo("https://img/a.jpg")
            .honored()
            .hidden();

        store.upsert(&full).unwrap();

        assert_eq!(store.all_records().unwrap(), vec![full]);
    }

    #[test]
    fn test_batches_and_deletes() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let batch = vec![record("a", "1", "Oro"), record("b", "2", "Plata"), record("c", "3", "Bronce")];

        assert_eq!(store.upsert_batch(&batch).unwrap(), 3);
        assert!(store.delete("b").unwrap());
        assert!(!store.delete("missing").unwrap());

        let removed = store
            .delete_batch(&["a".to_string(), "c".to_string(), "zzz".to_string()])
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_revision_bumps_only_on_committed_changes() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut rx = store.subscribe();
        assert_eq!(store.revision(), 0);

        store.upsert(&record("a", "1", "Oro")).unwrap();
        assert_eq!(store.revision(), 1);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        // No-op writes do not notify
        store.upsert_batch(&[]).unwrap();
        store.delete("missing").unwrap();
        assert!(!rx.has_changed().unwrap());
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_batch_events_commit_with_the_batch() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let event = Event::new("affiliates_imported", "import", "batch-1", serde_json::json!({}), "admin");

        // Repeated event id violates the UNIQUE constraint: nothing commits
        let duplicate_event = Event { event_id: event.event_id.clone(), ..event.clone() };
        assert!(store
            .upsert_batch_with_events(&[record("a", "1", "Oro")], &[event.clone(), duplicate_event])
            .is_err());
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.events_for_entity("import", "batch-1").unwrap().is_empty());
        assert_eq!(store.revision(), 0);

        store.upsert_batch_with_events(&[record("a", "1", "Oro")], &[event]).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.events_for_entity("import", "batch-1").unwrap().len(), 1);
    }

    #[test]
    fn test_assets_roundtrip() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        store.set_asset("rank-Oro", "https://pins/oro.png").unwrap();
        store.set_asset("club-pin", "data:image/png;base64,AAA").unwrap();
        store.set_asset("rank-Oro", "https://pins/oro-v2.png").unwrap();

        let assets = store.assets().unwrap();
        assert_eq!(assets.len(), 2);
        assert_eq!(assets["rank-Oro"], "https://pins/oro-v2.png");

        assert!(store.delete_asset("club-pin").unwrap());
        assert!(!store.delete_asset("club-pin").unwrap());
    }

    #[test]
    fn test_event_log() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.upsert(&record("a", "1", "Oro")).unwrap();
        store.delete("a").unwrap();

        let events = store.events_for_entity("affiliate", "a").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "affiliate_deleted");
        assert_eq!(events[1].event_type, "affiliate_saved");
        assert_eq!(events[1].data["rank"], "Oro");
    }
}
