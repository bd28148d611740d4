// 🛠️ Admin workflow - every operator action against the store
//
// Validation runs before any write. Import is two-phase: new distributor ids
// are committed immediately, promotions wait in PendingConflicts until the
// operator accepts or rejects all of them.

use crate::affiliate::{validate_for_save, AffiliateRecord};
use crate::db::{AssetStore, Event, RecordStore};
use crate::error::{Error, Result};
use crate::import::{fingerprint, reconcile, ImportOptions, PendingConflicts};
use crate::ranks::RankCatalog;
use crate::timeline::{build, PinAssets, SchedulePolicy, TimelineEntry, CLUB_PIN_KEY};
use serde::Serialize;
use tracing::info;

const ACTOR: &str = "admin";

// ============================================================================
// MANUAL ENTRY
// ============================================================================

/// Create or edit a record. A blank `id` means a new manual entry.
/// Returns the saved record with its final id.
pub fn save_affiliate<S: RecordStore>(
    store: &mut S,
    catalog: &RankCatalog,
    mut record: AffiliateRecord,
) -> Result<AffiliateRecord> {
    let existing = store.all_records()?;
    validate_for_save(&record, &existing, catalog)?;

    if record.id.trim().is_empty() {
        record.id = AffiliateRecord::generate_manual_id();
    }

    store.upsert(&record)?;
    info!(id = %record.id, distributor_id = %record.distributor_id, rank = %record.rank_name, "affiliate saved");
    Ok(record)
}

pub fn find_by_distributor_id<S: RecordStore>(store: &S, distributor_id: &str) -> Result<AffiliateRecord> {
    store
        .all_records()?
        .into_iter()
        .find(|a| a.distributor_id == distributor_id)
        .ok_or_else(|| Error::NotFound(format!("distributor id {}", distributor_id)))
}

/// Internal id currently holding `distributor_id`, if any.
/// Store failures are errors, not "absent".
pub fn existing_id<S: RecordStore>(store: &S, distributor_id: &str) -> Result<Option<String>> {
    match find_by_distributor_id(store, distributor_id) {
        Ok(record) => Ok(Some(record.id)),
        Err(Error::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Flip visibility; returns the new `hidden` value
pub fn toggle_hidden<S: RecordStore>(store: &mut S, id: &str) -> Result<bool> {
    let mut record = store
        .all_records()?
        .into_iter()
        .find(|a| a.id == id)
        .ok_or_else(|| Error::NotFound(format!("affiliate {}", id)))?;

    record.hidden = !record.hidden;
    store.upsert(&record)?;
    Ok(record.hidden)
}

pub fn delete_affiliate<S: RecordStore>(store: &mut S, id: &str) -> Result<()> {
    if !store.delete(id)? {
        return Err(Error::NotFound(format!("affiliate {}", id)));
    }
    Ok(())
}

/// Remove every record; returns how many were deleted
pub fn clear_all<S: RecordStore>(store: &mut S) -> Result<usize> {
    let ids: Vec<String> = store.all_records()?.into_iter().map(|a| a.id).collect();
    let event = Event::new(
        "affiliates_cleared",
        "affiliate",
        "*",
        serde_json::json!({ "removed": ids.len() }),
        ACTOR,
    );
    let removed = store.delete_batch_with_events(&ids, &[event])?;

    info!(removed, "all affiliates cleared");
    Ok(removed)
}

// ============================================================================
// PIN ASSETS
// ============================================================================

pub fn set_pin<S: AssetStore>(store: &mut S, catalog: &RankCatalog, rank_name: &str, image: &str) -> Result<()> {
    if !catalog.contains(rank_name) {
        return Err(Error::UnknownRank(rank_name.to_string()));
    }
    store.set_asset(&PinAssets::rank_key(rank_name), image)
}

pub fn delete_pin<S: AssetStore>(store: &mut S, rank_name: &str) -> Result<bool> {
    store.delete_asset(&PinAssets::rank_key(rank_name))
}

pub fn set_club_pin<S: AssetStore>(store: &mut S, image: &str) -> Result<()> {
    store.set_asset(CLUB_PIN_KEY, image)
}

pub fn delete_club_pin<S: AssetStore>(store: &mut S) -> Result<bool> {
    store.delete_asset(CLUB_PIN_KEY)
}

pub fn load_pins<S: AssetStore>(store: &S) -> Result<PinAssets> {
    Ok(PinAssets::from_assets(&store.assets()?))
}

// ============================================================================
// IMPORT (two-phase)
// ============================================================================

/// Operator-facing result of one import batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub added: usize,
    pub skipped_rows: usize,
    pub duplicate_rows: usize,
    pub unchanged_rows: usize,
    pub fingerprint: String,

    /// Promotions waiting for `confirm_promotions` / `reject_promotions`
    pub pending: PendingConflicts,
}

/// Reconcile `raw_text` against the store and commit the new records.
/// Promotion conflicts are returned, not written.
pub fn import_batch<S: RecordStore>(
    store: &mut S,
    catalog: &RankCatalog,
    raw_text: &str,
    options: &ImportOptions,
) -> Result<ImportSummary> {
    let existing = store.all_records()?;
    let outcome = reconcile(raw_text, &existing, catalog, options);
    let batch = fingerprint(raw_text);

    let event = Event::new(
        "affiliates_imported",
        "import",
        &batch,
        serde_json::json!({
            "added": outcome.to_add.len(),
            "ids": outcome.to_add.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(),
        }),
        ACTOR,
    );
    let added = store.upsert_batch_with_events(&outcome.to_add, &[event])?;

    Ok(ImportSummary {
        added,
        skipped_rows: outcome.skipped_rows,
        duplicate_rows: outcome.duplicate_rows,
        unchanged_rows: outcome.unchanged_rows,
        fingerprint: batch,
        pending: outcome.conflicts,
    })
}

/// Apply every pending promotion; returns how many records were updated.
/// On error nothing is written and `pending` can be confirmed again.
pub fn confirm_promotions<S: RecordStore>(store: &mut S, pending: &PendingConflicts) -> Result<usize> {
    let events: Vec<Event> = pending
        .iter()
        .map(|c| {
            Event::new(
                "rank_promoted",
                "affiliate",
                &c.existing.id,
                serde_json::json!({ "from": c.existing.rank_name, "to": c.incoming.rank_name }),
                ACTOR,
            )
        })
        .collect();

    let updated = store.upsert_batch_with_events(&pending.incoming_records(), &events)?;

    info!(updated, "promotions confirmed");
    Ok(updated)
}

/// Drop every pending promotion; the store is untouched
pub fn reject_promotions(pending: PendingConflicts) -> usize {
    let dropped = pending.reject();
    info!(dropped, "promotions rejected");
    dropped
}

/// Promotions of the latest import that produced any, waiting for the
/// operator. Imports without promotions leave an earlier set in place, and
/// a failed confirm keeps the set for a retry.
#[derive(Debug, Default)]
pub struct PromotionInbox {
    pending: Option<PendingConflicts>,
}

impl PromotionInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold `conflicts` if non-empty; returns true when an unresolved set was replaced
    pub fn offer(&mut self, conflicts: PendingConflicts) -> bool {
        if conflicts.is_empty() {
            return false;
        }
        self.pending.replace(conflicts).is_some()
    }

    pub fn pending(&self) -> Option<&PendingConflicts> {
        self.pending.as_ref()
    }

    pub fn confirm<S: RecordStore>(&mut self, store: &mut S) -> Result<usize> {
        let pending = self.pending.as_ref().ok_or_else(no_pending)?;
        let updated = confirm_promotions(store, pending)?;
        self.pending = None;
        Ok(updated)
    }

    pub fn reject(&mut self) -> Result<usize> {
        let pending = self.pending.take().ok_or_else(no_pending)?;
        Ok(reject_promotions(pending))
    }
}

fn no_pending() -> Error {
    Error::NotFound("pending promotions".to_string())
}

// ============================================================================
// DISPLAY
// ============================================================================

/// Current records and pins turned into a display sequence
pub fn load_timeline<S: RecordStore + AssetStore>(
    store: &S,
    catalog: &RankCatalog,
    policy: &SchedulePolicy,
) -> Result<Vec<TimelineEntry>> {
    let records = store.all_records()?;
    let pins = load_pins(store)?;
    Ok(build(&records, catalog, &pins, policy))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;

    fn catalog() -> RankCatalog {
        RankCatalog::default()
    }

    fn manual(distributor_id: &str, name: &str, rank: &str) -> AffiliateRecord {
        AffiliateRecord::new(String::new(), distributor_id.to_string(), name.to_string(), rank.to_string())
    }

    #[test]
    fn test_save_assigns_manual_id_and_rejects_duplicates() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        let saved = save_affiliate(&mut store, &catalog(), manual("100", "Ana", "Oro")).unwrap();
        assert!(saved.id.starts_with("man-"));

        let err = save_affiliate(&mut store, &catalog(), manual("100", "Beto", "Plata")).unwrap_err();
        assert!(matches!(err, Error::DuplicateDistributorId { ref holder, .. } if holder == "Ana"));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_edit_keeps_id_and_position() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let ana = save_affiliate(&mut store, &catalog(), manual("100", "Ana", "Oro")).unwrap();
        save_affiliate(&mut store, &catalog(), manual("200", "Beto", "Oro")).unwrap();

        let mut edited = ana.clone();
        edited.rank_name = "Platino".to_string();
        save_affiliate(&mut store, &catalog(), edited).unwrap();

        let records = store.all_records().unwrap();
        assert_eq!(records[0].id, ana.id);
        assert_eq!(records[0].rank_name, "Platino");
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_invalid_rank_writes_nothing() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        let err = save_affiliate(&mut store, &catalog(), manual("100", "Ana", "Diamante")).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn test_toggle_delete_and_clear() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let ana = save_affiliate(&mut store, &catalog(), manual("100", "Ana", "Oro")).unwrap();
        save_affiliate(&mut store, &catalog(), manual("200", "Beto", "Oro")).unwrap();

        assert!(toggle_hidden(&mut store, &ana.id).unwrap());
        assert!(!toggle_hidden(&mut store, &ana.id).unwrap());

        delete_affiliate(&mut store, &ana.id).unwrap();
        assert!(matches!(delete_affiliate(&mut store, &ana.id), Err(Error::NotFound(_))));

        assert_eq!(clear_all(&mut store).unwrap(), 1);
        assert_eq!(store.count().unwrap(), 0);
        let events = store.events_for_entity("affiliate", "*").unwrap();
        assert_eq!(events[0].event_type, "affiliates_cleared");
    }

    #[test]
    fn test_import_commits_additions_and_holds_promotions() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let ana = save_affiliate(&mut store, &catalog(), manual("100", "Ana", "Plata")).unwrap();

        let raw = "Nombre;Rango;ID\nAna;Oro;100\nBeto;Bronce;200\n";
        let summary = import_batch(&mut store, &catalog(), raw, &ImportOptions::default()).unwrap();

        assert_eq!(summary.added, 1);
        assert_eq!(summary.pending.len(), 1);
        assert_eq!(summary.fingerprint.len(), 64);
        // Ana still at her old rank until confirmed
        assert_eq!(find_by_distributor_id(&store, "100").unwrap().rank_name, "Plata");
        assert!(find_by_distributor_id(&store, "200").unwrap().id.starts_with("csv-"));

        assert_eq!(confirm_promotions(&mut store, &summary.pending).unwrap(), 1);

        let promoted = find_by_distributor_id(&store, "100").unwrap();
        assert_eq!(promoted.id, ana.id);
        assert_eq!(promoted.rank_name, "Oro");
        assert_eq!(store.count().unwrap(), 2);

        let events = store.events_for_entity("affiliate", &ana.id).unwrap();
        assert_eq!(events[0].event_type, "rank_promoted");
        assert_eq!(events[0].data["from"], "Plata");
    }

    /// Delegates to SQLite but can be told to refuse batch writes
    struct FlakyStore {
        inner: SqliteStore,
        fail_batches: bool,
        fail_reads: bool,
    }

    impl RecordStore for FlakyStore {
        fn all_records(&self) -> Result<Vec<AffiliateRecord>> {
            if self.fail_reads {
                return Err(Error::Store(rusqlite::Error::InvalidQuery));
            }
            self.inner.all_records()
        }

        fn upsert(&mut self, record: &AffiliateRecord) -> Result<()> {
            self.inner.upsert(record)
        }

        fn delete(&mut self, id: &str) -> Result<bool> {
            self.inner.delete(id)
        }

        fn upsert_batch(&mut self, records: &[AffiliateRecord]) -> Result<usize> {
            self.upsert_batch_with_events(records, &[])
        }

        fn delete_batch(&mut self, ids: &[String]) -> Result<usize> {
            self.inner.delete_batch(ids)
        }

        fn subscribe(&self) -> tokio::sync::watch::Receiver<u64> {
            self.inner.subscribe()
        }

        fn upsert_batch_with_events(&mut self, records: &[AffiliateRecord], events: &[Event]) -> Result<usize> {
            if self.fail_batches && !records.is_empty() {
                return Err(Error::Store(rusqlite::Error::InvalidQuery));
            }
            self.inner.upsert_batch_with_events(records, events)
        }
    }

    #[test]
    fn test_failed_confirm_keeps_promotions_pending() {
        let mut store = FlakyStore {
            inner: SqliteStore::open_in_memory().unwrap(),
            fail_batches: false,
            fail_reads: false,
        };
        save_affiliate(&mut store, &catalog(), manual("100", "Ana", "Plata")).unwrap();
        let summary =
            import_batch(&mut store, &catalog(), "nombre;rango;id\nAna;Oro;100\n", &ImportOptions::default()).unwrap();

        store.fail_batches = true;
        assert!(confirm_promotions(&mut store, &summary.pending).is_err());
        assert_eq!(summary.pending.len(), 1);
        assert_eq!(find_by_distributor_id(&store, "100").unwrap().rank_name, "Plata");

        // Retry once the store recovers
        store.fail_batches = false;
        assert_eq!(confirm_promotions(&mut store, &summary.pending).unwrap(), 1);
        assert_eq!(find_by_distributor_id(&store, "100").unwrap().rank_name, "Oro");
    }

    #[test]
    fn test_failed_import_writes_nothing() {
        let mut store = FlakyStore {
            inner: SqliteStore::open_in_memory().unwrap(),
            fail_batches: true,
            fail_reads: false,
        };

        let result = import_batch(&mut store, &catalog(), "nombre;rango;id\nBeto;Oro;200\n", &ImportOptions::default());

        assert!(result.is_err());
        assert_eq!(store.inner.count().unwrap(), 0);
        assert_eq!(store.inner.revision(), 0);
    }

    #[test]
    fn test_existing_id_separates_absent_from_unreadable() {
        let mut store = FlakyStore {
            inner: SqliteStore::open_in_memory().unwrap(),
            fail_batches: false,
            fail_reads: false,
        };
        let ana = save_affiliate(&mut store, &catalog(), manual("100", "Ana", "Oro")).unwrap();

        assert_eq!(existing_id(&store, "100").unwrap(), Some(ana.id));
        assert_eq!(existing_id(&store, "999").unwrap(), None);

        store.fail_reads = true;
        assert!(matches!(existing_id(&store, "100"), Err(Error::Store(_))));
    }

    #[test]
    fn test_inbox_keeps_promotions_until_resolved() {
        let mut store = FlakyStore {
            inner: SqliteStore::open_in_memory().unwrap(),
            fail_batches: false,
            fail_reads: false,
        };
        save_affiliate(&mut store, &catalog(), manual("100", "Ana", "Plata")).unwrap();
        let mut inbox = PromotionInbox::new();

        let first =
            import_batch(&mut store, &catalog(), "nombre;rango;id\nAna;Oro;100\n", &ImportOptions::default()).unwrap();
        assert!(!inbox.offer(first.pending));

        // An import with nothing to promote does not discard the held set
        let quiet =
            import_batch(&mut store, &catalog(), "nombre;rango;id\nBeto;Plata;200\n", &ImportOptions::default()).unwrap();
        assert!(!inbox.offer(quiet.pending));
        assert_eq!(inbox.pending().map(|p| p.len()), Some(1));

        store.fail_batches = true;
        assert!(inbox.confirm(&mut store).is_err());
        assert_eq!(inbox.pending().map(|p| p.len()), Some(1));

        store.fail_batches = false;
        assert_eq!(inbox.confirm(&mut store).unwrap(), 1);
        assert!(inbox.pending().is_none());
        assert!(matches!(inbox.confirm(&mut store), Err(Error::NotFound(_))));
        assert!(matches!(inbox.reject(), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_reject_leaves_store_untouched() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        save_affiliate(&mut store, &catalog(), manual("100", "Ana", "Plata")).unwrap();
        let revision = store.revision();

        let summary =
            import_batch(&mut store, &catalog(), "nombre;rango;id\nAna;Oro;100\n", &ImportOptions::default()).unwrap();
        assert_eq!(summary.added, 0);
        assert_eq!(store.revision(), revision);

        assert_eq!(reject_promotions(summary.pending), 1);
        assert_eq!(find_by_distributor_id(&store, "100").unwrap().rank_name, "Plata");
    }

    #[test]
    fn test_pins_feed_the_timeline() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        save_affiliate(&mut store, &catalog(), manual("100", "Ana", "Oro").honored()).unwrap();

        assert!(matches!(set_pin(&mut store, &catalog(), "Diamante", "x.png"), Err(Error::UnknownRank(_))));
        set_pin(&mut store, &catalog(), "Oro", "oro.png").unwrap();
        set_club_pin(&mut store, "club.png").unwrap();

        let timeline = load_timeline(&store, &catalog(), &SchedulePolicy::default()).unwrap();
        match (&timeline[0], &timeline[1]) {
            (TimelineEntry::Separator { pin, .. }, TimelineEntry::AffiliateSlide { club_pin, .. }) => {
                assert_eq!(pin.as_deref(), Some("oro.png"));
                assert_eq!(club_pin.as_deref(), Some("club.png"));
            }
            other => panic!("unexpected timeline {:?}", other),
        }

        assert!(delete_pin(&mut store, "Oro").unwrap());
        assert!(delete_club_pin(&mut store).unwrap());
        assert_eq!(load_pins(&store).unwrap(), PinAssets::default());
    }
}
