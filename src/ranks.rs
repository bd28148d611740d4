// 🏅 Rank Catalog - ordered rank tiers
// Position in the catalog IS the priority: index 0 is the lowest rank.
//
// The catalog drives three things:
// - Display order of the timeline (catalog order)
// - Promotion comparisons during import (higher index wins)
// - Pacing and grouping of slides

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Priority returned for rank names that are not in the catalog.
/// Lower than any valid priority, so unranked loses every comparison.
pub const UNRANKED: i32 = -1;

// ============================================================================
// RANK POLICIES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingClass {
    /// Standard slide duration
    Standard,

    /// Extended slide duration (top ranks get more screen time)
    Extended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingPolicy {
    /// One record per slide
    Single,

    /// Up to two records per slide
    Paired,
}

impl GroupingPolicy {
    /// Maximum number of records on one slide
    pub fn slide_capacity(&self) -> usize {
        match self {
            GroupingPolicy::Single => 1,
            GroupingPolicy::Paired => 2,
        }
    }
}

// ============================================================================
// RANK DEFINITION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankDefinition {
    /// Unique rank name (matches AffiliateRecord::rank_name exactly)
    pub name: String,

    /// Accent color for the separator title
    pub color: String,

    /// Background gradient: [highlight, mid, base]
    pub theme: [String; 3],

    pub pacing: PacingClass,
    pub grouping: GroupingPolicy,

    /// Slides alternate between the info view and the record's quote
    pub has_quote_phase: bool,
}

impl RankDefinition {
    pub fn new(name: &str, color: &str, theme: [&str; 3]) -> Self {
        RankDefinition {
            name: name.to_string(),
            color: color.to_string(),
            theme: theme.map(str::to_string),
            pacing: PacingClass::Standard,
            grouping: GroupingPolicy::Single,
            has_quote_phase: false,
        }
    }

    /// Builder pattern: paired grouping
    pub fn paired(mut self) -> Self {
        self.grouping = GroupingPolicy::Paired;
        self
    }

    /// Builder pattern: extended pacing
    pub fn extended(mut self) -> Self {
        self.pacing = PacingClass::Extended;
        self
    }

    /// Builder pattern: enable the quote phase
    pub fn with_quote(mut self) -> Self {
        self.has_quote_phase = true;
        self
    }
}

// ============================================================================
// RANK CATALOG
// ============================================================================

/// Immutable, ordered list of rank definitions.
///
/// Passed by reference into the timeline builder and the import reconciler,
/// never held as a global.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankCatalog {
    ranks: Vec<RankDefinition>,
}

impl RankCatalog {
    /// Build a catalog from an ordered list (lowest rank first)
    pub fn new(ranks: Vec<RankDefinition>) -> Result<Self> {
        if ranks.is_empty() {
            return Err(Error::InvalidCatalog("catalog needs at least one rank".to_string()));
        }

        let mut seen = HashSet::new();
        for rank in &ranks {
            if !seen.insert(rank.name.as_str()) {
                return Err(Error::InvalidCatalog(format!("duplicate rank name {}", rank.name)));
            }
            // The quote replaces the info panel of a single-record slide
            if rank.has_quote_phase && rank.grouping == GroupingPolicy::Paired {
                return Err(Error::InvalidCatalog(format!(
                    "rank {} cannot both pair records and show a quote phase",
                    rank.name
                )));
            }
        }

        Ok(RankCatalog { ranks })
    }

    /// All ranks in priority order (lowest first)
    pub fn ranks(&self) -> &[RankDefinition] {
        &self.ranks
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Zero-based position of the rank, or UNRANKED
    pub fn priority_of(&self, rank_name: &str) -> i32 {
        self.ranks
            .iter()
            .position(|r| r.name == rank_name)
            .map(|p| p as i32)
            .unwrap_or(UNRANKED)
    }

    pub fn get(&self, rank_name: &str) -> Option<&RankDefinition> {
        self.ranks.iter().find(|r| r.name == rank_name)
    }

    pub fn contains(&self, rank_name: &str) -> bool {
        self.get(rank_name).is_some()
    }

    /// Lowest-priority rank; imports without a rank land here
    pub fn lowest(&self) -> &RankDefinition {
        // new() rejects empty catalogs
        &self.ranks[0]
    }

    /// True when `candidate` strictly outranks `current`
    pub fn is_promotion(&self, current: &str, candidate: &str) -> bool {
        self.priority_of(candidate) > self.priority_of(current)
    }
}

impl Default for RankCatalog {
    /// The ten production tiers, Presidencial → Platino Élite
    fn default() -> Self {
        let ranks = vec![
            RankDefinition::new("Presidencial", "#60A5FA", ["#1e3a8a", "#172554", "#0f172a"]).paired(),
            RankDefinition::new("Presidencial Élite", "#3B82F6", ["#1e40af", "#1e3a8a", "#0f172a"]).paired(),
            RankDefinition::new("Bronce", "#F59E0B", ["#fef08a", "#854d0e", "#000000"]).paired(),
            RankDefinition::new("Bronce Élite", "#D97706", ["#fde047", "#713f12", "#000000"]).paired(),
            RankDefinition::new("Plata", "#C0C0C0", ["#9CA3AF", "#4B5563", "#111827"]),
            RankDefinition::new("Plata Élite", "#A9A9A9", ["#D1D5DB", "#6B7280", "#1F2937"]),
            RankDefinition::new("Oro", "#FDE047", ["#fef9c3", "#a16207", "#000000"]).extended().with_quote(),
            RankDefinition::new("Oro Élite", "#D4AF37", ["#fef08a", "#854d0e", "#000000"]).extended().with_quote(),
            RankDefinition::new("Platino", "#E5E4E2", ["#E2E8F0", "#64748B", "#0F172A"]).extended().with_quote(),
            RankDefinition::new("Platino Élite", "#FFFFFF", ["#F8FAFC", "#94A3B8", "#1E293B"]).extended().with_quote(),
        ];

        RankCatalog { ranks }
    }
}

// ============================================================================
// TESTS
// ============================================================================
