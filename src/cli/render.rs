//! Snapshot rendering for terminal and scripted output

use crate::core::register::RegisterMap;
use crate::core::sink::SnapshotRow;
use clap::ValueEnum;

/// Output format for snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned table
    Text,
    /// One JSON document per sweep
    Json,
    /// One CSV line per register
    Csv,
}

const HEADERS: [&str; 6] = ["Name", "FC", "Offset", "Address", "Unit", "Value"];

fn cells(row: &SnapshotRow) -> [String; 6] {
    [
        row.name.clone(),
        row.function.code().to_string(),
        row.offset.to_string(),
        row.address.to_string(),
        row.unit.clone(),
        row.value_text(),
    ]
}

/// Render one sweep worth of rows
pub fn render_snapshot(rows: &[SnapshotRow], cycle: u64, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => text_table(rows),
        OutputFormat::Json => json_snapshot(rows, cycle),
        OutputFormat::Csv => csv_snapshot(rows, cycle),
    }
}

/// CSV header matching [`render_snapshot`] with [`OutputFormat::Csv`]
pub fn csv_header() -> String {
    format!("cycle,{}", HEADERS.join(",").to_lowercase())
}

fn text_table(rows: &[SnapshotRow]) -> String {
    let body: Vec<[String; 6]> = rows.iter().map(cells).collect();

    let mut widths = HEADERS.map(str::len);
    for row in &body {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(widths.iter())
            .enumerate()
            .map(|(i, (cell, width))| match i {
                // numeric columns
                1..=3 | 5 => format!("{cell:>width$}"),
                _ => format!("{cell:<width$}"),
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let header: Vec<String> = HEADERS.iter().map(|h| (*h).to_string()).collect();
    let mut out = vec![line(&header)];
    out.extend(body.iter().map(|row| line(row)));
    out.join("\n")
}

fn json_snapshot(rows: &[SnapshotRow], cycle: u64) -> String {
    serde_json::json!({
        "cycle": cycle,
        "registers": rows,
    })
    .to_string()
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_snapshot(rows: &[SnapshotRow], cycle: u64) -> String {
    rows.iter()
        .map(|row| {
            let fields: Vec<String> = cells(row).iter().map(|c| csv_field(c)).collect();
            format!("{},{}", cycle, fields.join(","))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Register map as a table, without values
pub fn render_register_map(map: &RegisterMap) -> String {
    let mut out = vec![format!(
        "{:>3}  {:<28} {:>2} {:>6} {:>7}  {}",
        "#", "Name", "FC", "Offset", "Address", "Unit"
    )];
    for (i, def) in map.iter().enumerate() {
        out.push(
            format!(
                "{:>3}  {:<28} {:>2} {:>6} {:>7}  {}",
                i,
                def.name,
                def.function.code(),
                def.offset,
                def.address(),
                def.unit
            )
            .trim_end()
            .to_string(),
        );
    }
    out.join("\n")
}
