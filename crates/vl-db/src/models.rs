//! Rust structs mapping to database tables.

/// How a completion mark came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkSource {
    /// Written after a successful harvest.
    Harvest,
    /// Imported from a legacy completion log.
    Legacy,
}

impl MarkSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkSource::Harvest => "harvest",
            MarkSource::Legacy => "legacy",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "legacy" => MarkSource::Legacy,
            _ => MarkSource::Harvest,
        }
    }
}

/// A library whose cover has been generated.
#[derive(Debug, Clone)]
pub struct HarvestMark {
    pub library_name: String,
    pub source: MarkSource,
    pub completed_at: String,
}

impl HarvestMark {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let source: String = row.get(1)?;
        Ok(Self {
            library_name: row.get(0)?,
            source: MarkSource::parse(&source),
            completed_at: row.get(2)?,
        })
    }
}
