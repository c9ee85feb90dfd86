use anyhow::{Result, bail};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One logged food event.
///
/// `id`, `captured_at` and `image_bytes` are fixed at creation. The remaining
/// fields are editable from the detail view and written back through the
/// store as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FoodRecord {
    pub id: Uuid,
    pub name: String,
    pub ingredients: Vec<String>,
    pub calories: u32,
    #[serde(skip)]
    pub image_bytes: Option<Vec<u8>>,
    pub captured_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl FoodRecord {
    /// Build a new record from a finished analysis.
    #[must_use]
    pub fn from_analysis(
        result: AnalysisResult,
        image_bytes: Vec<u8>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: result.name,
            ingredients: result.ingredients,
            calories: result.calories,
            image_bytes: Some(image_bytes),
            captured_at,
            notes: None,
        }
    }

    pub fn set_notes(&mut self, notes: Option<String>) {
        self.notes = normalize_notes(notes);
    }

    pub fn add_ingredient(&mut self, ingredient: &str) {
        self.ingredients.push(ingredient.trim().to_string());
    }

    /// Remove the ingredient at a zero-based position.
    pub fn remove_ingredient(&mut self, index: usize) -> Result<String> {
        if index >= self.ingredients.len() {
            let len = self.ingredients.len();
            bail!("Ingredient #{} does not exist (record has {len})", index + 1);
        }
        Ok(self.ingredients.remove(index))
    }

    /// Whether `captured_at` falls on `date` as seen from `tz`.
    pub fn captured_on<Tz: TimeZone>(&self, date: NaiveDate, tz: &Tz) -> bool {
        self.captured_at.with_timezone(tz).date_naive() == date
    }

    #[must_use]
    pub fn image_len(&self) -> usize {
        self.image_bytes.as_ref().map_or(0, Vec::len)
    }
}

/// Structured output of one vision API call. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AnalysisResult {
    pub name: String,
    pub ingredients: Vec<String>,
    pub calories: u32,
}

#[must_use]
pub fn normalize_notes(notes: Option<String>) -> Option<String> {
    notes.filter(|n| !n.trim().is_empty())
}

#[must_use]
pub fn total_calories(records: &[FoodRecord]) -> u64 {
    records.iter().map(|r| u64::from(r.calories)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn apple() -> AnalysisResult {
        AnalysisResult {
            name: "Apple".to_string(),
            ingredients: vec!["apple".to_string()],
            calories: 95,
        }
    }

    #[test]
    fn test_from_analysis_copies_fields() {
        let now = Utc::now();
        let record = FoodRecord::from_analysis(apple(), vec![1, 2], now);
        assert_eq!(record.name, "Apple");
        assert_eq!(record.ingredients, vec!["apple"]);
        assert_eq!(record.calories, 95);
        assert_eq!(record.image_bytes.as_deref(), Some(&[1u8, 2][..]));
        assert_eq!(record.captured_at, now);
        assert!(record.notes.is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let now = Utc::now();
        let a = FoodRecord::from_analysis(apple(), vec![1], now);
        let b = FoodRecord::from_analysis(apple(), vec![1], now);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_set_notes_normalizes_empty() {
        let mut record = FoodRecord::from_analysis(apple(), vec![1], Utc::now());
        record.set_notes(Some(String::new()));
        assert!(record.notes.is_none());
        record.set_notes(Some("   ".to_string()));
        assert!(record.notes.is_none());
        record.set_notes(Some("after run".to_string()));
        assert_eq!(record.notes.as_deref(), Some("after run"));
    }

    #[test]
    fn test_ingredient_editing_keeps_order_and_duplicates() {
        let mut record = FoodRecord::from_analysis(apple(), vec![1], Utc::now());
        record.add_ingredient("cinnamon");
        record.add_ingredient("apple");
        assert_eq!(record.ingredients, vec!["apple", "cinnamon", "apple"]);

        let removed = record.remove_ingredient(1).unwrap();
        assert_eq!(removed, "cinnamon");
        assert_eq!(record.ingredients, vec!["apple", "apple"]);

        assert!(record.remove_ingredient(5).is_err());
    }

    #[test]
    fn test_captured_on_uses_given_zone() {
        // 23:30 UTC is already the next day at UTC+2
        let at = Utc.with_ymd_and_hms(2024, 6, 15, 23, 30, 0).unwrap();
        let record = FoodRecord::from_analysis(apple(), vec![1], at);
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();

        let june_15 = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let june_16 = NaiveDate::from_ymd_opt(2024, 6, 16).unwrap();
        assert!(record.captured_on(june_15, &Utc));
        assert!(!record.captured_on(june_16, &Utc));
        assert!(record.captured_on(june_16, &plus_two));
    }

    #[test]
    fn test_total_calories() {
        let now = Utc::now();
        let mut a = FoodRecord::from_analysis(apple(), vec![1], now);
        let b = FoodRecord::from_analysis(apple(), vec![1], now);
        a.calories = 400;
        assert_eq!(total_calories(&[a, b]), 495);
        assert_eq!(total_calories(&[]), 0);
    }

    #[test]
    fn test_serialize_skips_image() {
        let record = FoodRecord::from_analysis(apple(), vec![1, 2, 3], Utc::now());
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("image_bytes").is_none());
        assert!(json.get("notes").is_none());
        assert_eq!(json["calories"], 95);
    }
}
