//! Price data structures broadcast to live clients

use serde::{Deserialize, Serialize, Serializer};

/// Latest known price for one company
///
/// Field names follow the wire protocol: `company`, `avgPrice` and the
/// datastore's insertion marker as `_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRecord {
    /// Entity key (ticker symbol, e.g. "MSFT")
    pub company: String,

    /// Averaged price for the most recent batch of events
    pub avg_price: f64,

    /// Monotonic insertion marker assigned by the datastore
    #[serde(rename = "_id")]
    pub sequence: i64,
}

impl PriceRecord {
    pub fn new(company: impl Into<String>, avg_price: f64, sequence: i64) -> Self {
        Self {
            company: company.into(),
            avg_price,
            sequence,
        }
    }
}

/// One record per company, ordered by company ascending
///
/// A snapshot can only be built through [`Snapshot::from_records`], which
/// enforces both properties. It is never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "Vec<PriceRecord>")]
pub struct Snapshot {
    records: Vec<PriceRecord>,
}

impl Snapshot {
    /// Build a snapshot from arbitrary records
    ///
    /// When a company appears more than once, the record with the highest
    /// sequence wins. Ordering is byte-wise on the company key.
    pub fn from_records(mut records: Vec<PriceRecord>) -> Self {
        records.sort_by(|a, b| {
            a.company
                .cmp(&b.company)
                .then_with(|| b.sequence.cmp(&a.sequence))
        });
        records.dedup_by(|later, earlier| later.company == earlier.company);

        Self { records }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[PriceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PriceRecord> {
        self.records.iter()
    }

    /// Look up the record for a company
    pub fn get(&self, company: &str) -> Option<&PriceRecord> {
        self.records
            .binary_search_by(|r| r.company.as_str().cmp(company))
            .ok()
            .map(|idx| &self.records[idx])
    }
}

impl From<Vec<PriceRecord>> for Snapshot {
    fn from(records: Vec<PriceRecord>) -> Self {
        Self::from_records(records)
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.records.serialize(serializer)
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a PriceRecord;
    type IntoIter = std::slice::Iter<'a, PriceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
