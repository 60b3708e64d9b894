use std::collections::BTreeMap;

use chrono::NaiveDate;
use comfy_table::modifiers::{UTF8_ROUND_CORNERS, UTF8_SOLID_INNER_BORDERS};
use comfy_table::presets::{UTF8_FULL, UTF8_FULL_CONDENSED};
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use insulin_model::BatchReport;

use crate::types::RunResult;

pub fn print_summary(result: &RunResult, show_tdd: bool) {
    let report = &result.report;
    println!(
        "Patients: {} normalized, {} failed",
        report.outputs.len(),
        report.failures.len()
    );
    if let Ok(options) = serde_json::to_string(&result.options) {
        println!("Options: {options}");
    }
    if let Some(dir) = &result.output_dir {
        println!("Output: {} ({} files)", dir.display(), result.written.len());
    }

    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Patient"),
        header_cell("Days"),
        header_cell("Grid points"),
        header_cell("Bolus (U)"),
        header_cell("Basal (U)"),
        header_cell("CGM coverage"),
        header_cell("Warnings"),
    ]);
    apply_summary_table_style(&mut table);
    for index in 1..=6 {
        align_column(&mut table, index, CellAlignment::Right);
    }
    let mut total_days = 0usize;
    let mut total_points = 0usize;
    let mut total_bolus = 0.0;
    let mut total_basal = 0.0;
    let mut total_warnings = 0usize;
    for output in &report.outputs {
        let warnings = output.issues.len();
        total_days += output.daily_doses.len();
        total_points += output.grid_points();
        total_bolus += output.bolus_total();
        total_basal += output.basal_delivery_total();
        total_warnings += warnings;
        table.add_row(vec![
            patient_cell(&output.patient_id),
            Cell::new(output.daily_doses.len()),
            Cell::new(output.grid_points()),
            units_cell(output.bolus.as_ref().map(|_| output.bolus_total())),
            units_cell(output.basal.as_ref().map(|_| output.basal_delivery_total())),
            coverage_cell(output.cgm_coverage()),
            count_cell(warnings, Color::Yellow),
        ]);
    }
    table.add_row(vec![
        Cell::new("TOTAL")
            .fg(Color::Cyan)
            .add_attribute(Attribute::Bold),
        Cell::new(total_days).add_attribute(Attribute::Bold),
        Cell::new(total_points).add_attribute(Attribute::Bold),
        Cell::new(format!("{total_bolus:.2}")).add_attribute(Attribute::Bold),
        Cell::new(format!("{total_basal:.2}")).add_attribute(Attribute::Bold),
        dim_cell("-"),
        count_cell(total_warnings, Color::Yellow).add_attribute(Attribute::Bold),
    ]);
    println!("{table}");

    print_issue_table(report);
    if show_tdd {
        print_tdd_table(report);
    }
    if !report.failures.is_empty() {
        eprintln!("Failed patients:");
        for failure in &report.failures {
            eprintln!(
                "- {} [{}]: {}",
                failure.patient_id,
                failure.error.category(),
                failure.error
            );
        }
    }
}

fn print_issue_table(report: &BatchReport) {
    let mut issues: Vec<_> = report.issues().collect();
    if issues.is_empty() {
        return;
    }
    issues.sort_by(|a, b| {
        a.patient_id
            .cmp(&b.patient_id)
            .then(a.stream.as_str().cmp(b.stream.as_str()))
            .then(a.kind.cmp(&b.kind))
    });
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Patient"),
        header_cell("Stream"),
        header_cell("Issue"),
        header_cell("Count"),
        header_cell("Message"),
    ]);
    apply_issue_table_style(&mut table);
    align_column(&mut table, 3, CellAlignment::Right);
    for issue in issues {
        table.add_row(vec![
            patient_cell(&issue.patient_id),
            Cell::new(issue.stream.as_str()),
            Cell::new(issue.kind.as_str()).fg(Color::Yellow),
            Cell::new(issue.count),
            Cell::new(&issue.message),
        ]);
    }
    println!();
    println!("Issues:");
    println!("{table}");
}

fn print_tdd_table(report: &BatchReport) {
    let mut reported: BTreeMap<(&str, NaiveDate), Vec<f64>> = BTreeMap::new();
    for row in report
        .outputs
        .iter()
        .flat_map(|output| output.reported_tdd.iter())
    {
        reported
            .entry((row.patient_id.as_str(), row.date))
            .or_default()
            .push(row.tdd);
    }
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Patient"),
        header_cell("Date"),
        header_cell("Basal (U)"),
        header_cell("Bolus (U)"),
        header_cell("Total (U)"),
        header_cell("Reported (U)"),
    ]);
    apply_table_style(&mut table);
    for index in 2..=5 {
        align_column(&mut table, index, CellAlignment::Right);
    }
    for dose in report.tdd_table() {
        let device = reported
            .get(&(dose.patient_id.as_str(), dose.date))
            .map(|values| {
                values
                    .iter()
                    .map(|value| format!("{value:.2}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            });
        table.add_row(vec![
            patient_cell(&dose.patient_id),
            Cell::new(dose.date),
            total_cell(dose.basal_total),
            total_cell(dose.bolus_total),
            total_cell(dose.total()),
            device.map_or_else(|| dim_cell("-"), Cell::new),
        ]);
    }
    println!();
    println!("Daily doses:");
    println!("{table}");
}

pub fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120);
}

fn apply_summary_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120);
}

fn apply_issue_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::DynamicFullWidth)
        .set_width(160);
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn patient_cell(patient_id: &str) -> Cell {
    Cell::new(patient_id)
        .fg(Color::Blue)
        .add_attribute(Attribute::Bold)
}

fn count_cell(count: usize, color: Color) -> Cell {
    if count > 0 {
        Cell::new(count).fg(color).add_attribute(Attribute::Bold)
    } else {
        dim_cell(count)
    }
}

/// Stream total; `None` when the patient has no events in that stream.
fn units_cell(total: Option<f64>) -> Cell {
    match total {
        Some(value) => Cell::new(format!("{value:.2}")),
        None => dim_cell("-"),
    }
}

/// Daily total; NaN marks a day without coverage.
fn total_cell(total: f64) -> Cell {
    if total.is_nan() {
        dim_cell("-")
    } else {
        Cell::new(format!("{total:.2}"))
    }
}

fn coverage_cell(coverage: Option<f64>) -> Cell {
    match coverage {
        Some(fraction) => Cell::new(format!("{:.1}%", fraction * 100.0)),
        None => dim_cell("-"),
    }
}

fn dim_cell<T: ToString>(value: T) -> Cell {
    Cell::new(value).fg(Color::DarkGrey)
}
