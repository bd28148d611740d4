// 🎞️ Timeline Builder - records → ordered, timed screens
//
// Pure and deterministic: same records, catalog, pins and policy always give
// the same sequence. Catalog order is display order.

use crate::affiliate::AffiliateRecord;
use crate::ranks::{GroupingPolicy, PacingClass, RankCatalog, RankDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Asset key of the honored-member (President's Club) pin
pub const CLUB_PIN_KEY: &str = "club-pin";

/// Asset key prefix for per-rank pins: "rank-<RankName>"
pub const RANK_PIN_PREFIX: &str = "rank-";

/// Identity key of the Empty entry
pub const EMPTY_KEY: &str = "empty";

// ============================================================================
// SCHEDULE POLICY
// ============================================================================

/// Tunable pacing constants (milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulePolicy {
    pub separator_ms: u64,
    pub standard_slide_ms: u64,
    pub extended_slide_ms: u64,
    pub empty_ms: u64,

    /// Fraction of the slide duration after which the quote phase starts
    pub quote_split: f64,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        SchedulePolicy {
            separator_ms: 4000,
            standard_slide_ms: 8000,
            extended_slide_ms: 12000,
            empty_ms: 5000,
            quote_split: 0.5,
        }
    }
}

impl SchedulePolicy {
    pub fn slide_duration(&self, pacing: PacingClass) -> u64 {
        match pacing {
            PacingClass::Standard => self.standard_slide_ms,
            PacingClass::Extended => self.extended_slide_ms,
        }
    }

    /// Offset into a slide at which the quote phase begins
    pub fn quote_offset(&self, slide_ms: u64) -> u64 {
        (slide_ms as f64 * self.quote_split).round() as u64
    }
}

// ============================================================================
// PIN ASSETS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinAssets {
    /// Rank name → image reference
    pub rank_pins: HashMap<String, String>,

    /// Image shown next to honored members
    pub club_pin: Option<String>,
}

impl PinAssets {
    /// Split the flat asset map into rank pins and the club pin.
    /// Unrecognized keys are ignored.
    pub fn from_assets(assets: &HashMap<String, String>) -> Self {
        let mut pins = PinAssets::default();

        for (key, image) in assets {
            if image.is_empty() {
                continue;
            }
            if key == CLUB_PIN_KEY {
                pins.club_pin = Some(image.clone());
            } else if let Some(rank_name) = key.strip_prefix(RANK_PIN_PREFIX) {
                pins.rank_pins.insert(rank_name.to_string(), image.clone());
            }
        }

        pins
    }

    pub fn rank_pin(&self, rank_name: &str) -> Option<&str> {
        self.rank_pins.get(rank_name).map(String::as_str)
    }

    /// Asset key for a rank's pin
    pub fn rank_key(rank_name: &str) -> String {
        format!("{}{}", RANK_PIN_PREFIX, rank_name)
    }
}

// ============================================================================
// TIMELINE ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineEntry {
    /// Introduces a rank group
    Separator {
        key: String,
        rank_name: String,
        color: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pin: Option<String>,
        theme: [String; 3],
        duration_ms: u64,
    },

    /// One or two records of the same rank
    AffiliateSlide {
        key: String,
        items: Vec<AffiliateRecord>,
        rank: RankDefinition,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        club_pin: Option<String>,
        duration_ms: u64,
    },

    /// Nothing to show
    Empty {
        theme: [String; 3],
        duration_ms: u64,
    },
}

impl TimelineEntry {
    /// Stable identity, unchanged across rebuilds with the same membership
    pub fn key(&self) -> &str {
        match self {
            TimelineEntry::Separator { key, .. } => key,
            TimelineEntry::AffiliateSlide { key, .. } => key,
            TimelineEntry::Empty { .. } => EMPTY_KEY,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match self {
            TimelineEntry::Separator { duration_ms, .. }
            | TimelineEntry::AffiliateSlide { duration_ms, .. }
            | TimelineEntry::Empty { duration_ms, .. } => *duration_ms,
        }
    }

    pub fn is_empty_entry(&self) -> bool {
        matches!(self, TimelineEntry::Empty { .. })
    }

    /// Background theme for the renderer
    pub fn theme(&self) -> &[String; 3] {
        match self {
            TimelineEntry::Separator { theme, .. } | TimelineEntry::Empty { theme, .. } => theme,
            TimelineEntry::AffiliateSlide { rank, .. } => &rank.theme,
        }
    }

    /// Quote text that the slide will show in its quote phase, if any.
    /// Only slides of single-grouping quote-phase ranks qualify.
    pub fn quote_for_phase(&self) -> Option<&str> {
        match self {
            TimelineEntry::AffiliateSlide { items, rank, .. }
                if rank.has_quote_phase && rank.grouping == GroupingPolicy::Single =>
            {
                items.first().and_then(|a| a.quote_text())
            }
            _ => None,
        }
    }

    fn empty(policy: &SchedulePolicy) -> Self {
        TimelineEntry::Empty {
            theme: neutral_theme(),
            duration_ms: policy.empty_ms,
        }
    }
}

fn neutral_theme() -> [String; 3] {
    ["#000000", "#111111", "#000000"].map(str::to_string)
}

fn slide_key(items: &[AffiliateRecord]) -> String {
    match items {
        [single] => format!("aff-{}", single.id),
        _ => {
            let mut ids: Vec<&str> = items.iter().map(|a| a.id.as_str()).collect();
            ids.sort_unstable();
            format!("group-{}", ids.join("-"))
        }
    }
}

// ============================================================================
// BUILD
// ============================================================================

/// Build the display sequence.
///
/// For each rank in catalog order with at least one visible record: one
/// Separator, then slides of 1 (single) or up to 2 (paired) records in
/// insertion order. An empty result becomes a single Empty entry.
pub fn build(
    records: &[AffiliateRecord],
    catalog: &RankCatalog,
    pins: &PinAssets,
    policy: &SchedulePolicy,
) -> Vec<TimelineEntry> {
    let active: Vec<&AffiliateRecord> = records.iter().filter(|a| a.is_active()).collect();
    let mut sequence = Vec::new();

    for rank in catalog.ranks() {
        let in_rank: Vec<AffiliateRecord> = active
            .iter()
            .filter(|a| a.rank_name == rank.name)
            .map(|a| (*a).clone())
            .collect();

        if in_rank.is_empty() {
            continue;
        }

        sequence.push(TimelineEntry::Separator {
            key: format!("sep-{}", rank.name),
            rank_name: rank.name.clone(),
            color: rank.color.clone(),
            pin: pins.rank_pin(&rank.name).map(str::to_string),
            theme: rank.theme.clone(),
            duration_ms: policy.separator_ms,
        });

        let slide_ms = policy.slide_duration(rank.pacing);
        for chunk in in_rank.chunks(rank.grouping.slide_capacity()) {
            let club_pin = if chunk.iter().any(|a| a.is_honored_member) {
                pins.club_pin.clone()
            } else {
                None
            };

            sequence.push(TimelineEntry::AffiliateSlide {
                key: slide_key(chunk),
                items: chunk.to_vec(),
                rank: rank.clone(),
                club_pin,
                duration_ms: slide_ms,
            });
        }
    }

    if sequence.is_empty() {
        sequence.push(TimelineEntry::empty(policy));
    }

    tracing::debug!(entries = sequence.len(), "timeline built");
    sequence
}

// ============================================================================
// TESTS
// ============================================================================
