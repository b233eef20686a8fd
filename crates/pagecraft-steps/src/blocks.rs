//! Reusable content blocks shared by the page steps.

use crate::schemas::Product;

/// `1234.5, "USD"` -> `"1,234.50 USD"`.
pub fn format_currency(amount: f64, currency: &str) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{}{}.{:02} {}", sign, grouped, cents % 100, currency)
}

pub fn seo_title(name: &str, category: &str) -> String {
    format!("{} | Best {} Review & Specs", name, category)
}

pub fn disclaimer() -> &'static str {
    "Disclaimer: Product specifications and prices are subject to change. Please verify with the manufacturer."
}

/// Turn features into consumer-facing benefits.
pub fn benefits(features: &[String]) -> Vec<String> {
    features
        .iter()
        .map(|feature| {
            if feature.contains("Vitamin C") {
                "Brightens and evens skin tone".to_string()
            } else if feature.contains("Hyaluronic") {
                "Deeply hydrates and plumps".to_string()
            } else if feature.contains("SPF") {
                "Protects against UV damage".to_string()
            } else {
                format!("Provides the benefit of {}", feature)
            }
        })
        .collect()
}

pub fn usage(product: &Product) -> String {
    let method = product
        .specs
        .get("application")
        .map(String::as_str)
        .unwrap_or("Apply as needed");
    format!("Usage Instructions: {}. For best results, use daily.", method)
}

/// The product's top three features, used as its ingredient summary.
pub fn key_ingredients(features: &[String]) -> String {
    features.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
}

/// The product's top three features against a competitor's ingredients.
pub fn compare_ingredients(features: &[String], competitor_ingredients: &[String]) -> String {
    let theirs = if competitor_ingredients.is_empty() {
        "N/A".to_string()
    } else {
        competitor_ingredients.join(", ")
    };
    format!("{} VS {}", key_ingredients(features), theirs)
}
