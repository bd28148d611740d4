// 📥 Bulk Import Reconciler - delimited text → additions + promotion conflicts
//
// Pipeline:
//   1. Parse: header fragments map columns to fields, incomplete rows dropped
//   2. Dedup: first row per distributor id wins within the batch
//   3. Reconcile against the store:
//        - unknown distributor id      → to_add
//        - strictly higher rank         → conflict (operator decides)
//        - same or lower rank           → dropped, existing record untouched
//
// Parsing is deliberately lossy: malformed rows are counted, never reported.

use crate::affiliate::AffiliateRecord;
use crate::ranks::RankCatalog;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

// ============================================================================
// OPTIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Column delimiter (single ASCII character)
    pub delimiter: char,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions { delimiter: ';' }
    }
}

impl ImportOptions {
    fn delimiter_byte(&self) -> u8 {
        u8::try_from(self.delimiter).unwrap_or_else(|_| {
            warn!(delimiter = %self.delimiter, "non-ASCII delimiter, falling back to ';'");
            b';'
        })
    }
}

// ============================================================================
// HEADER MATCHING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Rank,
    Country,
    Photo,
    Quote,
    ClubFlag,
    DistributorId,
}

/// Checked in order; the first field with a matching fragment wins.
/// The club flag is checked before the identifier because "id" is a
/// substring of headers like "President's Club".
const HEADER_FRAGMENTS: &[(Field, &[&str])] = &[
    (Field::Name, &["nombre", "name"]),
    (Field::Rank, &["rango", "rank"]),
    (Field::Country, &["pais", "país", "country"]),
    (Field::Photo, &["foto", "photo"]),
    (Field::Quote, &["bio", "frase", "quote"]),
    (Field::ClubFlag, &["club", "pc"]),
    (Field::DistributorId, &["id", "distribuidor", "distributor", "codigo", "código", "code"]),
];

const TRUTHY_TOKENS: &[&str] = &["SI", "SÍ", "YES", "TRUE", "1"];

fn classify_header(header: &str) -> Option<Field> {
    let lower = header.trim().to_lowercase();
    HEADER_FRAGMENTS
        .iter()
        .find(|(_, fragments)| fragments.iter().any(|f| lower.contains(f)))
        .map(|(field, _)| *field)
}

fn is_truthy(value: &str) -> bool {
    let upper = value.trim().to_uppercase();
    TRUTHY_TOKENS.contains(&upper.as_str())
}

// ============================================================================
// PARSING
// ============================================================================

/// Rows that survived parsing, in file order
#[derive(Debug, Clone, Default)]
pub struct ParseReport {
    pub candidates: Vec<AffiliateRecord>,

    /// Rows dropped for a missing name/identifier or malformed content
    pub skipped_rows: usize,
}

/// Parse raw delimited text into candidate records.
///
/// One physical line is one row; a broken line never affects its
/// neighbours. Cells are trimmed and a leading and a trailing double quote
/// are removed. Candidates get a fresh internal id. A missing rank is left empty
/// here and defaulted by `reconcile`, which knows the catalog.
pub fn parse_candidates(raw_text: &str, options: &ImportOptions) -> ParseReport {
    let mut report = ParseReport::default();
    let delimiter = options.delimiter_byte();

    let mut lines = raw_text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let columns: Vec<Option<Field>> = match lines.next().map(|(_, line)| split_line(line, delimiter)) {
        Some(Ok(headers)) => headers.iter().map(|h| classify_header(unwrap_cell(h))).collect(),
        Some(Err(e)) => {
            warn!(error = %e, "import header unreadable, nothing imported");
            return report;
        }
        None => return report,
    };

    for (line_index, line) in lines {
        let row = match split_line(line, delimiter) {
            Ok(row) => row,
            Err(e) => {
                debug!(row = line_index + 1, error = %e, "skipping malformed row");
                report.skipped_rows += 1;
                continue;
            }
        };

        let mut candidate = AffiliateRecord::new(
            AffiliateRecord::generate_import_id(),
            String::new(),
            String::new(),
            String::new(),
        );

        for (column, raw_value) in columns.iter().zip(row.iter()) {
            let Some(field) = column else { continue };
            let value = unwrap_cell(raw_value);
            if value.is_empty() {
                continue;
            }

            match field {
                Field::Name => candidate.display_name = value.to_string(),
                Field::Rank => candidate.rank_name = value.to_string(),
                Field::Country => candidate.country = Some(value.to_string()),
                Field::Photo => candidate.photo_ref = Some(value.to_string()),
                Field::Quote => candidate.quote = Some(value.to_string()),
                Field::ClubFlag => candidate.is_honored_member = is_truthy(value),
                Field::DistributorId => candidate.distributor_id = value.to_string(),
            }
        }

        if candidate.distributor_id.is_empty() || candidate.display_name.is_empty() {
            report.skipped_rows += 1;
            continue;
        }

        report.candidates.push(candidate);
    }

    report
}

/// Split a single line on the delimiter. Quotes are not special here;
/// `unwrap_cell` strips them per cell afterwards.
fn split_line(line: &str, delimiter: u8) -> Result<csv::StringRecord, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .quoting(false)
        .flexible(true)
        .from_reader(line.as_bytes());

    match reader.records().next() {
        Some(record) => record,
        None => Ok(csv::StringRecord::new()),
    }
}

/// Trim, then drop a leading and a trailing double quote
fn unwrap_cell(value: &str) -> &str {
    let trimmed = value.trim();
    let trimmed = trimmed.strip_prefix('"').unwrap_or(trimmed);
    trimmed.strip_suffix('"').unwrap_or(trimmed)
}

// ============================================================================
// CONFLICTS
// ============================================================================

/// An import row claiming a higher rank than the store holds.
/// `incoming.id` is the existing record's internal id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportConflict {
    pub incoming: AffiliateRecord,
    pub existing: AffiliateRecord,
}

/// Promotion conflicts waiting for operator confirmation.
///
/// All-or-nothing: `incoming_records` yields every incoming record, `reject` drops them all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingConflicts {
    conflicts: Vec<ImportConflict>,
}

impl PendingConflicts {
    pub fn new(conflicts: Vec<ImportConflict>) -> Self {
        PendingConflicts { conflicts }
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImportConflict> {
        self.conflicts.iter()
    }

    /// Records to write back, each replacing its existing record wholesale.
    /// The pending set is left intact so a failed write can be retried.
    pub fn incoming_records(&self) -> Vec<AffiliateRecord> {
        self.conflicts.iter().map(|c| c.incoming.clone()).collect()
    }

    /// Discard every pending conflict; returns how many were dropped
    pub fn reject(self) -> usize {
        self.conflicts.len()
    }
}

// ============================================================================
// RECONCILIATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportOutcome {
    /// New distributor ids, safe to commit immediately
    pub to_add: Vec<AffiliateRecord>,

    pub conflicts: PendingConflicts,

    pub skipped_rows: usize,

    /// Later rows repeating a distributor id already seen in this batch
    pub duplicate_rows: usize,

    /// Rows matching an existing record at the same or a lower rank
    pub unchanged_rows: usize,
}

/// Parse `raw_text` and partition it against `existing`.
///
/// Never produces two entries for the same distributor id, and never touches
/// a record whose incoming rank is not strictly higher.
pub fn reconcile(
    raw_text: &str,
    existing: &[AffiliateRecord],
    catalog: &RankCatalog,
    options: &ImportOptions,
) -> ImportOutcome {
    let report = parse_candidates(raw_text, options);

    // First record per distributor id, as the store does not enforce uniqueness
    let mut by_distributor: HashMap<&str, &AffiliateRecord> = HashMap::new();
    for record in existing {
        by_distributor.entry(record.distributor_id.as_str()).or_insert(record);
    }

    let mut outcome = ImportOutcome {
        skipped_rows: report.skipped_rows,
        ..ImportOutcome::default()
    };
    let mut conflicts = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for mut candidate in report.candidates {
        if !seen.insert(candidate.distributor_id.clone()) {
            outcome.duplicate_rows += 1;
            continue;
        }

        if candidate.rank_name.is_empty() {
            candidate.rank_name = catalog.lowest().name.clone();
        }

        match by_distributor.get(candidate.distributor_id.as_str()) {
            None => outcome.to_add.push(candidate),
            Some(current) if catalog.is_promotion(&current.rank_name, &candidate.rank_name) => {
                candidate.id = current.id.clone();
                conflicts.push(ImportConflict {
                    incoming: candidate,
                    existing: (*current).clone(),
                });
            }
            Some(_) => outcome.unchanged_rows += 1,
        }
    }

    outcome.conflicts = PendingConflicts::new(conflicts);

    info!(
        to_add = outcome.to_add.len(),
        conflicts = outcome.conflicts.len(),
        skipped = outcome.skipped_rows,
        duplicates = outcome.duplicate_rows,
        unchanged = outcome.unchanged_rows,
        "import reconciled"
    );

    outcome
}

/// SHA-256 of the raw batch, recorded in the audit trail
pub fn fingerprint(raw_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_text.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================
