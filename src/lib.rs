// Recognition Wall - Core Library
// Exposes all modules for use in the CLI, the API server, and tests

pub mod error;
pub mod ranks;      // Rank catalog: priority, pacing, grouping
pub mod affiliate;  // Records, manual-entry validation, admin listing
pub mod timeline;   // Display sequence builder
pub mod scheduler;  // Advance + quote-phase state machines (logical clock)
pub mod player;     // tokio driver for the scheduler
pub mod import;     // Delimited-text import and promotion conflicts
pub mod db;         // SQLite store + audit trail
pub mod admin;      // Operator workflow over the store
pub mod config;

// Re-export commonly used types
pub use error::{Error, Result};
pub use ranks::{
    GroupingPolicy, PacingClass, RankCatalog, RankDefinition, UNRANKED,
};
pub use affiliate::{
    AffiliateRecord, group_by_rank, validate_for_save,
};
pub use timeline::{
    PinAssets, SchedulePolicy, TimelineEntry, build as build_timeline,
};
pub use scheduler::{
    QuotePhase, Scheduler, SchedulerEvent, SchedulerState,
};
pub use player::{NowShowing, Player, PlayerCommand};
pub use import::{
    ImportConflict, ImportOptions, ImportOutcome, ParseReport, PendingConflicts,
    fingerprint, parse_candidates, reconcile,
};
pub use db::{
    AssetStore, Event, RecordStore, SqliteStore,
    get_events_for_entity, insert_event, setup_database,
};
pub use admin::{ImportSummary, PromotionInbox};
pub use config::{Config, ServerConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
