use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use sqlx::{PgPool, Row};

/// What a normalization pass changed on one teacher document.
#[derive(Debug, Default, PartialEq)]
struct Normalization {
    removed_keys: Vec<String>,
    removed_classes: Vec<String>,
}

impl Normalization {
    fn changed(&self) -> bool {
        !self.removed_keys.is_empty() || !self.removed_classes.is_empty()
    }
}

fn is_empty_entry(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Drop empty `subjects[level]` entries and the matching `classes` members.
fn normalize_teacher(doc: &mut Value) -> Normalization {
    let mut result = Normalization::default();

    if let Some(subjects) = doc.get_mut("subjects").and_then(Value::as_object_mut) {
        result.removed_keys = subjects
            .iter()
            .filter(|(_, v)| is_empty_entry(v))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &result.removed_keys {
            subjects.remove(key);
        }
    }

    if result.removed_keys.is_empty() {
        return result;
    }

    if let Some(classes) = doc.get_mut("classes").and_then(Value::as_array_mut) {
        classes.retain(|class| match class.as_str() {
            Some(level_id) if result.removed_keys.iter().any(|k| k == level_id) => {
                result.removed_classes.push(level_id.to_string());
                false
            }
            _ => true,
        });
    }

    result
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Connect to database
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = PgPool::connect(&database_url).await?;

    println!("Connected to database. Normalizing teacher subject maps...");

    let teachers: Vec<(String, i64, Value)> =
        sqlx::query("SELECT id, version, data FROM teachers ORDER BY id")
            .fetch_all(&pool)
            .await?
            .into_iter()
            .map(|row| {
                (
                    row.get::<String, _>("id"),
                    row.get::<i64, _>("version"),
                    row.get::<Value, _>("data"),
                )
            })
            .collect();

    let total = teachers.len();
    println!("Found {} teachers to inspect", total);

    let mut updated = 0usize;
    let mut skipped = 0usize;
    let mut removed_keys = 0usize;
    let mut removed_classes = 0usize;

    for (i, (id, version, mut data)) in teachers.into_iter().enumerate() {
        if (i + 1) % 10 == 0 || i + 1 == total {
            println!("Processing teacher {}/{}: {}", i + 1, total, id);
        }

        let change = normalize_teacher(&mut data);
        if !change.changed() {
            continue;
        }

        let now = Utc::now();
        if let Some(obj) = data.as_object_mut() {
            obj.insert("updatedAt".to_string(), Value::String(now.to_rfc3339()));
        }

        let result = sqlx::query(
            "UPDATE teachers SET data = $1, version = version + 1, updated_at = $2 WHERE id = $3 AND version = $4",
        )
        .bind(&data)
        .bind(now)
        .bind(&id)
        .bind(version)
        .execute(&pool)
        .await?;

        if result.rows_affected() == 0 {
            println!("  Skipped {}: modified concurrently, rerun to pick it up", id);
            skipped += 1;
            continue;
        }

        println!(
            "  Cleaned {}: empty levels {:?}, classes removed {:?}",
            id, change.removed_keys, change.removed_classes
        );
        updated += 1;
        removed_keys += change.removed_keys.len();
        removed_classes += change.removed_classes.len();
    }

    println!("\nNormalization completed!");
    println!("  Teachers updated:      {}", updated);
    println!("  Teachers skipped:      {}", skipped);
    println!("  Empty levels removed:  {}", removed_keys);
    println!("  Classes removed:       {}", removed_classes);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_levels_are_dropped_with_their_class() {
        let mut doc = json!({
            "id": "T1",
            "classes": ["L1", "L2", "L3"],
            "subjects": { "L1": [], "L2": ["MATH"], "L3": null },
            "nickname": "kept"
        });

        let change = normalize_teacher(&mut doc);
        assert_eq!(change.removed_keys, vec!["L1".to_string(), "L3".to_string()]);
        assert_eq!(change.removed_classes, vec!["L1".to_string(), "L3".to_string()]);
        assert_eq!(doc["classes"], json!(["L2"]));
        assert_eq!(doc["subjects"], json!({ "L2": ["MATH"] }));
        assert_eq!(doc["nickname"], "kept");
    }

    #[test]
    fn test_clean_document_is_untouched() {
        let mut doc = json!({
            "classes": ["L1", "L2"],
            "subjects": { "L1": ["MATH"] }
        });
        let before = doc.clone();

        let change = normalize_teacher(&mut doc);
        assert!(!change.changed());
        assert_eq!(doc, before);
    }

    #[test]
    fn test_missing_subjects_map() {
        let mut doc = json!({ "classes": ["L1"] });
        assert!(!normalize_teacher(&mut doc).changed());
    }
}
