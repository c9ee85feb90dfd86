use anyhow::{Context, Result, bail};
use std::path::Path;
use uuid::Uuid;

use calsnap_core::coordinator::FoodLogCoordinator;
use calsnap_core::models::{FoodRecord, total_calories};

use super::helpers::{
    exit_not_found, parse_date, parse_ingredient_list, print_record_detail, print_record_table,
};

/// Field changes requested by `calsnap edit`.
#[derive(Debug, Default)]
pub(crate) struct RecordEdit {
    pub name: Option<String>,
    pub calories: Option<u32>,
    /// Comma-separated replacement list.
    pub ingredients: Option<String>,
    pub add_ingredients: Vec<String>,
    /// 1-based positions, as shown by `calsnap show`.
    pub remove_ingredients: Vec<usize>,
    pub notes: Option<String>,
}

impl RecordEdit {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.calories.is_none()
            && self.ingredients.is_none()
            && self.add_ingredients.is_empty()
            && self.remove_ingredients.is_empty()
            && self.notes.is_none()
    }

    /// Replacement list first, then removals, then additions.
    fn apply(&self, record: &mut FoodRecord) -> Result<()> {
        if let Some(name) = &self.name {
            let name = name.trim();
            if name.is_empty() {
                bail!("Name cannot be empty");
            }
            record.name = name.to_string();
        }
        if let Some(calories) = self.calories {
            record.calories = calories;
        }
        if let Some(list) = &self.ingredients {
            record.ingredients = parse_ingredient_list(list);
        }

        let mut positions = self.remove_ingredients.clone();
        positions.sort_unstable_by(|a, b| b.cmp(a));
        positions.dedup();
        for position in positions {
            if position == 0 {
                bail!("Ingredient positions start at 1");
            }
            record.remove_ingredient(position - 1)?;
        }

        for ingredient in &self.add_ingredients {
            if ingredient.trim().is_empty() {
                bail!("Ingredient cannot be empty");
            }
            record.add_ingredient(ingredient);
        }

        if let Some(notes) = &self.notes {
            record.set_notes(Some(notes.clone()));
        }
        Ok(())
    }
}

pub(crate) fn cmd_list(coordinator: &FoodLogCoordinator, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date)?;
    let records = coordinator.records_for_date(date);

    if json {
        let out = serde_json::json!({
            "date": date,
            "total_calories": total_calories(&records),
            "records": records,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No records for {date}");
        return Ok(());
    }

    println!("=== {date} ===");
    print_record_table(&records);
    Ok(())
}

pub(crate) fn cmd_show(coordinator: &FoodLogCoordinator, id: Uuid, json: bool) -> Result<()> {
    let Some(record) = coordinator.find_record(id) else {
        exit_not_found(id, json);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_record_detail(&record);
    }
    Ok(())
}

pub(crate) fn cmd_edit(
    coordinator: &FoodLogCoordinator,
    id: Uuid,
    edit: &RecordEdit,
    json: bool,
) -> Result<()> {
    if edit.is_empty() {
        bail!(
            "Nothing to update. Provide at least one of --name, --calories, --ingredients, \
             --add-ingredient, --remove-ingredient, or --notes"
        );
    }

    let Some(mut record) = coordinator.find_record(id) else {
        exit_not_found(id, json);
    };
    edit.apply(&mut record)?;

    if !coordinator.update_record(&record)? {
        exit_not_found(id, json);
    }
    let record = coordinator.find_record(id).unwrap_or(record);

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        let name = &record.name;
        let cal = record.calories;
        println!("Updated record {id}: {name} ({cal} kcal)");
    }
    Ok(())
}

pub(crate) fn cmd_delete(coordinator: &FoodLogCoordinator, id: Uuid, json: bool) -> Result<()> {
    if !coordinator.delete_by_id(id)? {
        exit_not_found(id, json);
    }

    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted record {id}");
    }
    Ok(())
}

pub(crate) fn cmd_image(coordinator: &FoodLogCoordinator, id: Uuid, out: &Path) -> Result<()> {
    let Some(record) = coordinator.find_record(id) else {
        exit_not_found(id, false);
    };
    let Some(bytes) = record.image_bytes.as_deref().filter(|b| !b.is_empty()) else {
        bail!("Record {id} has no stored image");
    };

    std::fs::write(out, bytes)
        .with_context(|| format!("Failed to write image: {}", out.display()))?;
    println!("Wrote {} bytes to {}", bytes.len(), out.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use calsnap_core::models::AnalysisResult;
    use chrono::Utc;

    fn burrito() -> FoodRecord {
        FoodRecord::from_analysis(
            AnalysisResult {
                name: "Burrito".to_string(),
                ingredients: vec![
                    "tortilla".to_string(),
                    "rice".to_string(),
                    "beans".to_string(),
                    "salsa".to_string(),
                ],
                calories: 650,
            },
            vec![0xFF, 0xD8],
            Utc::now(),
        )
    }

    #[test]
    fn test_empty_edit() {
        assert!(RecordEdit::default().is_empty());
        let edit = RecordEdit {
            notes: Some(String::new()),
            ..RecordEdit::default()
        };
        assert!(!edit.is_empty());
    }

    #[test]
    fn test_apply_scalar_fields() {
        let mut record = burrito();
        let edit = RecordEdit {
            name: Some("  Veggie burrito ".to_string()),
            calories: Some(540),
            notes: Some("no cheese".to_string()),
            ..RecordEdit::default()
        };
        edit.apply(&mut record).unwrap();
        assert_eq!(record.name, "Veggie burrito");
        assert_eq!(record.calories, 540);
        assert_eq!(record.notes.as_deref(), Some("no cheese"));
        assert_eq!(record.ingredients.len(), 4);
    }

    #[test]
    fn test_apply_clears_notes() {
        let mut record = burrito();
        record.notes = Some("old".to_string());
        let edit = RecordEdit {
            notes: Some("   ".to_string()),
            ..RecordEdit::default()
        };
        edit.apply(&mut record).unwrap();
        assert!(record.notes.is_none());
    }

    #[test]
    fn test_apply_ingredient_changes() {
        let mut record = burrito();
        let edit = RecordEdit {
            remove_ingredients: vec![2, 4, 2],
            add_ingredients: vec!["guacamole".to_string(), "rice".to_string()],
            ..RecordEdit::default()
        };
        edit.apply(&mut record).unwrap();
        assert_eq!(
            record.ingredients,
            vec!["tortilla", "beans", "guacamole", "rice"]
        );
    }

    #[test]
    fn test_apply_replaces_list_before_removing() {
        let mut record = burrito();
        let edit = RecordEdit {
            ingredients: Some("egg, bacon, cheese".to_string()),
            remove_ingredients: vec![3],
            ..RecordEdit::default()
        };
        edit.apply(&mut record).unwrap();
        assert_eq!(record.ingredients, vec!["egg", "bacon"]);
    }

    #[test]
    fn test_apply_rejects_bad_input() {
        let bad_edits = [
            RecordEdit {
                name: Some(" ".to_string()),
                ..RecordEdit::default()
            },
            RecordEdit {
                remove_ingredients: vec![0],
                ..RecordEdit::default()
            },
            RecordEdit {
                remove_ingredients: vec![9],
                ..RecordEdit::default()
            },
            RecordEdit {
                add_ingredients: vec![String::new()],
                ..RecordEdit::default()
            },
        ];
        for edit in bad_edits {
            let mut record = burrito();
            assert!(edit.apply(&mut record).is_err(), "{edit:?} should fail");
        }
    }
}
