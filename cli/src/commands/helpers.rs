use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};
use uuid::Uuid;

use calsnap_core::models::{FoodRecord, total_calories};

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

pub(crate) fn parse_record_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s.trim()).with_context(|| format!("Invalid record ID '{s}'"))
}

/// Split "rice, beans,, salsa" into `["rice", "beans", "salsa"]`.
pub(crate) fn parse_ingredient_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|i| !i.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn print_record_table(records: &[FoodRecord]) {
    #[derive(Tabled)]
    struct RecordRow {
        #[tabled(rename = "Time")]
        time: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Calories")]
        calories: u32,
        #[tabled(rename = "Ingredients")]
        ingredients: String,
        #[tabled(rename = "ID")]
        id: Uuid,
    }

    let rows: Vec<RecordRow> = records
        .iter()
        .map(|r| RecordRow {
            time: r.captured_at.with_timezone(&Local).format("%H:%M").to_string(),
            name: truncate(&r.name, 30),
            calories: r.calories,
            ingredients: truncate(&r.ingredients.join(", "), 40),
            id: r.id,
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..3)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    println!("Total: {} kcal", total_calories(records));
}

pub(crate) fn print_record_detail(record: &FoodRecord) {
    let captured = record.captured_at.with_timezone(&Local);
    println!("{}", record.name);
    println!("  ID:        {}", record.id);
    println!("  Captured:  {}", captured.format("%Y-%m-%d %H:%M"));
    println!("  Calories:  {} kcal", record.calories);
    if record.ingredients.is_empty() {
        println!("  Ingredients: none");
    } else {
        println!("  Ingredients:");
        for (i, ingredient) in record.ingredients.iter().enumerate() {
            println!("    {}. {ingredient}", i + 1);
        }
    }
    if let Some(notes) = &record.notes {
        println!("  Notes:     {notes}");
    }
    match record.image_len() {
        0 => println!("  Image:     none"),
        n => println!("  Image:     {n} bytes"),
    }
}

/// Report a missing record and exit with status 2.
pub(crate) fn exit_not_found(id: Uuid, json: bool) -> ! {
    let message = format!("Record {id} not found");
    if json {
        println!("{}", json_error(&message));
    } else {
        eprintln!("{message}");
    }
    process::exit(2);
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
