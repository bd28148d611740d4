// 👤 Affiliate Record - the person shown on the wall
//
// Two identifiers:
// - id: internal store key, generated (man-<uuid> / csv-<uuid>)
// - distributor_id: external identifier from the business, unique across the store

use crate::error::{Error, Result};
use crate::ranks::RankCatalog;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffiliateRecord {
    /// Internal store key
    pub id: String,

    /// External identifier (distributor code)
    pub distributor_id: String,

    pub display_name: String,

    /// Must reference a RankDefinition by name
    pub rank_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    /// URL or opaque image reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,

    /// President's Club member (shows the club pin)
    #[serde(default)]
    pub is_honored_member: bool,

    /// Hidden records stay in the store but never reach the timeline
    #[serde(default)]
    pub hidden: bool,
}

impl AffiliateRecord {
    pub fn new(id: String, distributor_id: String, display_name: String, rank_name: String) -> Self {
        AffiliateRecord {
            id,
            distributor_id,
            display_name,
            rank_name,
            country: None,
            photo_ref: None,
            quote: None,
            is_honored_member: false,
            hidden: false,
        }
    }

    /// Fresh internal key for manually entered records
    pub fn generate_manual_id() -> String {
        format!("man-{}", uuid::Uuid::new_v4())
    }

    /// Fresh internal key for imported records
    pub fn generate_import_id() -> String {
        format!("csv-{}", uuid::Uuid::new_v4())
    }

    /// Quote text, if present and not blank
    pub fn quote_text(&self) -> Option<&str> {
        self.quote.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    pub fn is_active(&self) -> bool {
        !self.hidden
    }

    /// Builder pattern: add country
    pub fn with_country(mut self, country: &str) -> Self {
        self.country = Some(country.to_string());
        self
    }

    /// Builder pattern: add quote
    pub fn with_quote(mut self, quote: &str) -> Self {
        self.quote = Some(quote.to_string());
        self
    }

    /// Builder pattern: add photo reference
    pub fn with_photo(mut self, photo_ref: &str) -> Self {
        self.photo_ref = Some(photo_ref.to_string());
        self
    }

    /// Builder pattern: mark as honored member
    pub fn honored(mut self) -> Self {
        self.is_honored_member = true;
        self
    }

    /// Builder pattern: mark as hidden
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

// ============================================================================
// MANUAL ENTRY VALIDATION
// ============================================================================

/// Validate a record before saving it.
///
/// Checks, in order: display name, distributor id, distributor id collision
/// with a *different* record, rank membership. Nothing is written on error.
pub fn validate_for_save(
    record: &AffiliateRecord,
    existing: &[AffiliateRecord],
    catalog: &RankCatalog,
) -> Result<()> {
    if record.display_name.trim().is_empty() {
        return Err(Error::MissingField { field: "display_name" });
    }

    if record.distributor_id.trim().is_empty() {
        return Err(Error::MissingField { field: "distributor_id" });
    }

    if let Some(holder) = existing
        .iter()
        .find(|a| a.distributor_id == record.distributor_id && a.id != record.id)
    {
        return Err(Error::DuplicateDistributorId {
            distributor_id: record.distributor_id.clone(),
            holder: holder.display_name.clone(),
        });
    }

    if !catalog.contains(&record.rank_name) {
        return Err(Error::UnknownRank(record.rank_name.clone()));
    }

    Ok(())
}

// ============================================================================
// ADMIN LISTING
// ============================================================================

/// Records matching `search`, grouped by rank.
///
/// Groups follow catalog order and skip empty ranks. Records whose rank is not
/// in the catalog come last, one group per unknown rank name.
pub fn group_by_rank<'a>(
    records: &'a [AffiliateRecord],
    catalog: &RankCatalog,
    search: &str,
) -> Vec<(String, Vec<&'a AffiliateRecord>)> {
    let needle = search.trim().to_lowercase();
    let matching: Vec<&AffiliateRecord> = records
        .iter()
        .filter(|a| {
            needle.is_empty()
                || a.display_name.to_lowercase().contains(&needle)
                || a.distributor_id.contains(search.trim())
        })
        .collect();

    let mut groups: Vec<(String, Vec<&AffiliateRecord>)> = catalog
        .ranks()
        .iter()
        .map(|rank| {
            let in_rank: Vec<&AffiliateRecord> = matching
                .iter()
                .copied()
                .filter(|a| a.rank_name == rank.name)
                .collect();
            (rank.name.clone(), in_rank)
        })
        .filter(|(_, items)| !items.is_empty())
        .collect();

    for record in matching.iter().copied().filter(|a| !catalog.contains(&a.rank_name)) {
        match groups.iter_mut().find(|(name, _)| *name == record.rank_name) {
            Some((_, items)) => items.push(record),
            None => groups.push((record.rank_name.clone(), vec![record])),
        }
    }

    groups
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, distributor_id: &str, name: &str, rank: &str) -> AffiliateRecord {
        AffiliateRecord::new(
            id.to_string(),
            distributor_id.to_string(),
            name.to_string(),
            rank.to_string(),
        )
    }

    #[test]
    fn test_validate_requires_name_and_distributor_id() {
        let catalog = RankCatalog::default();

        let nameless = record("man-1", "D1", "  ", "Oro");
        let err = validate_for_save(&nameless, &[], &catalog).unwrap_err();
        assert!(matches!(err, Error::MissingField { field: "display_name" }));

        let no_id = record("man-1", "", "Ana", "Oro");
        let err = validate_for_save(&no_id, &[], &catalog).unwrap_err();
        assert!(matches!(err, Error::MissingField { field: "distributor_id" }));
        assert!(err.is_validation());
    }

    #[test]
    fn test_validate_rejects_duplicate_distributor_id() {
        let catalog = RankCatalog::default();
        let existing = vec![record("man-1", "D1", "Ana", "Oro")];

        let clash = record("man-2", "D1", "Luis", "Plata");
        let err = validate_for_save(&clash, &existing, &catalog).unwrap_err();
        assert!(err.to_string().contains("registered to Ana"));

        // Editing the same record keeps its own distributor id
        let edit = record("man-1", "D1", "Ana María", "Platino");
        assert!(validate_for_save(&edit, &existing, &catalog).is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_rank() {
        let catalog = RankCatalog::default();
        let unknown = record("man-1", "D1", "Ana", "Diamante");

        let err = validate_for_save(&unknown, &[], &catalog).unwrap_err();
        assert!(matches!(err, Error::UnknownRank(ref r) if r == "Diamante"));
    }

    #[test]
    fn test_quote_text_ignores_blank() {
        let with_blank = record("a", "1", "Ana", "Oro").with_quote("   ");
        assert_eq!(with_blank.quote_text(), None);

        let with_quote = record("a", "1", "Ana", "Oro").with_quote(" Nunca te rindas ");
        assert_eq!(with_quote.quote_text(), Some("Nunca te rindas"));
    }

    #[test]
    fn test_group_by_rank_follows_catalog_and_search() {
        let catalog = RankCatalog::default();
        let records = vec![
            record("1", "100", "Zoe", "Oro"),
            record("2", "200", "Ana", "Bronce"),
            record("3", "300", "Anibal", "Oro"),
            record("4", "400", "Beto", "Diamante"),
        ];

        let groups = group_by_rank(&records, &catalog, "");
        let names: Vec<&str> = groups.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Bronce", "Oro", "Diamante"]);
        assert_eq!(groups[1].1.len(), 2);
        assert_eq!(groups[1].1[0].display_name, "Zoe");

        let filtered = group_by_rank(&records, &catalog, "ani");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].1[0].display_name, "Anibal");

        let by_id = group_by_rank(&records, &catalog, "20");
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_id[0].0, "Bronce");
    }
}
