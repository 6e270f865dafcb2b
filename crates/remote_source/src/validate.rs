//! Structural validation of sales payloads.
//!
//! `parse_dataset` walks the raw JSON so malformed values are reported with
//! their location instead of a generic deserialization failure.

use common::{Dataset, Series, SourceError};
use serde_json::Value;

fn invalid(message: String, field: &str) -> SourceError {
    SourceError::validation(message, Some(field.to_string()))
}

/// Validate a raw JSON payload and convert it into a `Dataset`.
pub fn parse_dataset(raw: &Value) -> Result<Dataset, SourceError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| invalid("payload is not an object".into(), "$"))?;

    let date_range = obj
        .get("dateRange")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("missing dateRange array".into(), "dateRange"))?;

    let mut labels = Vec::with_capacity(date_range.len());
    for (idx, label) in date_range.iter().enumerate() {
        match label.as_str() {
            Some(s) => labels.push(s.to_string()),
            None => {
                return Err(invalid(
                    format!("dateRange[{}] is not a string", idx),
                    "dateRange",
                ))
            }
        }
    }

    let brands = obj
        .get("brands")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("missing brands object".into(), "brands"))?;

    let mut dataset = Dataset::new(labels);
    for (brand, categories) in brands {
        let categories = categories.as_object().ok_or_else(|| {
            invalid(
                format!("brand '{}' is not an object", brand),
                &format!("brands.{}", brand),
            )
        })?;

        for (category, values) in categories {
            let path = format!("brands.{}.{}", brand, category);
            let values = values
                .as_array()
                .ok_or_else(|| invalid(format!("{} is not an array", path), &path))?;

            let mut series: Series = Vec::with_capacity(values.len());
            for (idx, v) in values.iter().enumerate() {
                match v {
                    Value::Null => series.push(None),
                    Value::Number(n) => series.push(n.as_f64()),
                    other => {
                        return Err(invalid(
                            format!("{}[{}] has non-numeric value {}", path, idx, other),
                            &path,
                        ))
                    }
                }
            }
            dataset.insert_series(brand, category, series);
        }
    }

    check_dataset(&dataset)?;
    Ok(dataset)
}

/// Check the invariants of an already-typed dataset.
pub fn check_dataset(dataset: &Dataset) -> Result<(), SourceError> {
    let periods = dataset.period_count();

    for (brand, categories) in &dataset.brands {
        if brand.trim().is_empty() {
            return Err(invalid("empty brand name".into(), "brands"));
        }
        for (category, series) in categories {
            let path = format!("brands.{}.{}", brand, category);
            if category.trim().is_empty() {
                return Err(invalid(
                    format!("empty category name under '{}'", brand),
                    &path,
                ));
            }
            if series.len() != periods {
                return Err(invalid(
                    format!(
                        "{} has {} values, expected {} (dateRange length)",
                        path,
                        series.len(),
                        periods
                    ),
                    &path,
                ));
            }
            if let Some(idx) = series
                .iter()
                .position(|v| matches!(v, Some(x) if !x.is_finite()))
            {
                return Err(invalid(
                    format!("{}[{}] is not a finite number", path, idx),
                    &path,
                ));
            }
        }
    }

    Ok(())
}
