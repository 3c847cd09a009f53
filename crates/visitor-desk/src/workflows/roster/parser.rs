use std::io::Read;

use super::normalizer::{clean_field, normalize_header};
use super::RosterImportError;

/// The six roster columns, in sheet order.
pub const ROSTER_HEADERS: [&str; 6] = [
    "First Name",
    "Last Name",
    "Email",
    "Phone",
    "Organization",
    "Event",
];

/// One data row with blank cells collapsed to `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RosterRow {
    /// 1-based, header excluded.
    pub(crate) row: usize,
    pub(crate) first_name: Option<String>,
    pub(crate) last_name: Option<String>,
    pub(crate) email: Option<String>,
    pub(crate) phone: Option<String>,
    pub(crate) organization: Option<String>,
    pub(crate) event: Option<String>,
}

/// A row with a cell that is not valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UndecodableRow {
    pub(crate) row: usize,
    pub(crate) column: &'static str,
    pub(crate) email: Option<String>,
}

pub(crate) type ParsedRow = Result<RosterRow, UndecodableRow>;

/// Reads the sheet. Only unreadable input and a missing column fail the whole call;
/// undecodable rows come back in place for the caller to report.
pub(crate) fn parse_rows<R: Read>(reader: R) -> Result<Vec<ParsedRow>, RosterImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let normalized: Vec<String> = headers.iter().map(normalize_header).collect();
    let mut columns = [0usize; 6];
    for (slot, expected) in columns.iter_mut().zip(ROSTER_HEADERS) {
        let key = normalize_header(expected);
        *slot = normalized
            .iter()
            .position(|header| *header == key)
            .ok_or(RosterImportError::MissingColumn(expected))?;
    }

    let mut rows = Vec::new();
    for (index, record) in csv_reader.byte_records().enumerate() {
        let record = record?;
        // Sheet line numbers, so rows after an empty line keep their spreadsheet number.
        let number = record
            .position()
            .map(|position| position.line().saturating_sub(1) as usize)
            .unwrap_or(index + 1);

        let mut cells: [Option<String>; 6] = Default::default();
        let mut undecodable = None;
        for (slot, (column, name)) in cells.iter_mut().zip(columns.iter().zip(ROSTER_HEADERS)) {
            match record.get(*column).map(std::str::from_utf8).transpose() {
                Ok(value) => *slot = clean_field(value),
                Err(_) => {
                    undecodable.get_or_insert(name);
                }
            }
        }

        let [first_name, last_name, email, phone, organization, event] = cells;
        if let Some(column) = undecodable {
            rows.push(Err(UndecodableRow {
                row: number,
                column,
                email,
            }));
            continue;
        }

        let row = RosterRow {
            row: number,
            first_name,
            last_name,
            email,
            phone,
            organization,
            event,
        };
        if row.is_blank() {
            continue;
        }
        rows.push(Ok(row));
    }

    Ok(rows)
}

impl RosterRow {
    fn is_blank(&self) -> bool {
        [
            &self.first_name,
            &self.last_name,
            &self.email,
            &self.phone,
            &self.organization,
            &self.event,
        ]
        .iter()
        .all(|cell| cell.is_none())
    }
}
