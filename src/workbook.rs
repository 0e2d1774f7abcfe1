use std::path::Path;

use rust_xlsxwriter::{Format, Workbook};
use tracing::info;

use crate::{api::AuditEvent, error::Result};

pub const SHEET_NAME: &str = "Audit Sheet";
const HEADERS: [&str; 6] = [
    "Date Time",
    "Functionality",
    "Event Type",
    "User",
    "Store",
    "Message",
];

/// Write the displayed rows to a single-sheet workbook at `path`.
pub fn write_rows(path: &Path, rows: &[AuditEvent]) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    let bold = Format::new().set_bold();
    for (col, header) in (0u16..).zip(HEADERS) {
        worksheet.write_string_with_format(0, col, header, &bold)?;
    }

    for (row, event) in (1u32..).zip(rows) {
        let store = event
            .store_name
            .as_deref()
            .or(event.store_location_id.as_deref())
            .unwrap_or_default();
        let cells = [
            event.event_timestamp.as_str(),
            event.functionality.as_str(),
            event.event_type.as_str(),
            event.user_name.as_str(),
            store,
            event.message.as_str(),
        ];
        for (col, value) in (0u16..).zip(cells) {
            worksheet.write_string(row, col, value)?;
        }
    }

    workbook.save(path)?;
    info!(file = %path.display(), rows = rows.len(), "rows written to workbook");
    Ok(())
}
