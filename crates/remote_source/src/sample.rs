//! Deterministic sample sales dataset served by the simulated source.

use common::Dataset;
use serde_json::Value;

const BRANDS: [(&str, f64); 4] = [
    ("Natura", 1.0),
    ("Avon", 0.8),
    ("The Body Shop", 0.45),
    ("Aesop", 0.2),
];

const CATEGORIES: [(&str, f64); 4] = [
    ("Perfumaria", 420.0),
    ("Maquiagem", 310.0),
    ("Cuidados com a Pele", 280.0),
    ("Cabelos", 190.0),
];

/// Monthly labels `YYYY-MM` starting at `start_year`-01.
pub fn month_labels(start_year: i32, months: usize) -> Vec<String> {
    (0..months)
        .map(|i| format!("{}-{:02}", start_year + (i / 12) as i32, i % 12 + 1))
        .collect()
}

/// Sales figures (thousands) for 2023-01 through 2024-12.
pub fn sample_dataset() -> Dataset {
    let labels = month_labels(2023, 24);
    let periods = labels.len();
    let mut dataset = Dataset::new(labels);

    for (b_idx, (brand, scale)) in BRANDS.iter().enumerate() {
        for (c_idx, (category, base)) in CATEGORIES.iter().enumerate() {
            let series = (0..periods)
                .map(|p| {
                    // Aesop has no makeup line; The Body Shop haircare launched in 2023-04.
                    if (*brand == "Aesop" && *category == "Maquiagem")
                        || (*brand == "The Body Shop" && *category == "Cabelos" && p < 3)
                    {
                        return None;
                    }
                    let trend = 1.0 + 0.012 * p as f64;
                    let season = match p % 12 {
                        4 => 1.18,  // Mother's Day
                        10 => 1.12, // Black Friday
                        11 => 1.35, // Christmas
                        _ => 1.0,
                    };
                    let jitter = ((b_idx * 7 + c_idx * 13 + p * 3) % 11) as f64 / 100.0;
                    let value = base * scale * trend * season * (0.95 + jitter);
                    Some((value * 10.0).round() / 10.0)
                })
                .collect();
            dataset.insert_series(brand, category, series);
        }
    }

    dataset
}

/// The sample dataset as the raw JSON body a backend would return.
pub fn sample_payload() -> Value {
    serde_json::to_value(sample_dataset()).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::parse_dataset;

    #[test]
    fn test_month_labels_roll_over_years() {
        let labels = month_labels(2023, 14);
        assert_eq!(labels[0], "2023-01");
        assert_eq!(labels[11], "2023-12");
        assert_eq!(labels[12], "2024-01");
        assert_eq!(labels.len(), 14);
    }

    #[test]
    fn test_sample_payload_is_valid() {
        let ds = parse_dataset(&sample_payload()).unwrap();
        assert_eq!(ds, sample_dataset());
        assert_eq!(ds.period_count(), 24);
        assert_eq!(ds.series_count(), 16);
        assert!(ds
            .series("Aesop", "Maquiagem")
            .unwrap()
            .iter()
            .all(Option::is_none));
    }
}
