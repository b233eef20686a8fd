use std::collections::BTreeMap;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use pagecraft_core::error::{PagecraftError, Result};
use pagecraft_core::state::StateView;
use pagecraft_core::traits::Step;
use pagecraft_core::types::{Delta, StepOutput};

use crate::schemas::{keys, Competitor, Price, Product};

/// Normalizes the raw input payload into a [`Product`].
///
/// Accepts both the camelCase export format (`productId`, `productName`) and
/// plain keys. Input that is not an object, has no product name, or carries
/// an unusable price is rejected as invalid: retrying cannot fix it.
pub struct ParserStep;

/// Amounts above this are accepted but logged.
const PRICE_WARN_ABOVE: f64 = 100_000.0;
const MIN_PRICE: f64 = 0.01;

const KNOWN_CURRENCIES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CNY", "INR", "AUD", "CAD", "CHF", "SEK", "NZD", "KRW", "SGD",
    "HKD", "NOK", "MXN",
];

impl Step for ParserStep {
    fn execute(&self, view: StateView) -> BoxFuture<'_, Result<StepOutput>> {
        Box::pin(async move {
            let product = parse_product(view.input())?;
            debug!(
                id = %product.id,
                features = product.features.len(),
                competitors = product.competitors.len(),
                "Parsed product"
            );
            Ok(StepOutput::success(
                Delta::new().with(keys::PRODUCT, serde_json::to_value(&product)?),
            ))
        })
    }
}

pub fn parse_product(raw: &Value) -> Result<Product> {
    let obj = raw
        .as_object()
        .ok_or_else(|| PagecraftError::InvalidInput("product input must be a JSON object".into()))?;

    let name = first_str(obj, &["productName", "name"])
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| PagecraftError::InvalidInput("product has no name".into()))?;

    let competitors = match obj.get("competitors") {
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, c)| parse_competitor(i, c))
            .collect::<Result<Vec<_>>>()?,
        _ => Vec::new(),
    };

    let price = parse_price(obj.get("price"))?;
    validate_price(&price)?;

    Ok(Product {
        id: first_str(obj, &["productId", "id"]).unwrap_or_else(|| "UNKNOWN".to_string()),
        name,
        category: first_str(obj, &["category"]).unwrap_or_else(|| "General".to_string()),
        price,
        features: string_list(obj.get("features")),
        specs: string_map(obj.get("specs")),
        description: first_str(obj, &["description"]).unwrap_or_default(),
        competitors,
    })
}

fn parse_competitor(index: usize, raw: &Value) -> Result<Competitor> {
    let obj = raw.as_object().ok_or_else(|| {
        PagecraftError::InvalidInput(format!("competitor #{} is not an object", index + 1))
    })?;
    let name = first_str(obj, &["name", "productName"]).ok_or_else(|| {
        PagecraftError::InvalidInput(format!("competitor #{} has no name", index + 1))
    })?;
    let price = parse_price(obj.get("price"))?.amount;
    if price < 0.0 {
        return Err(PagecraftError::InvalidInput(format!(
            "competitor #{} has a negative price ({})",
            index + 1,
            price
        )));
    }
    Ok(Competitor {
        name,
        price,
        ingredients: string_list(obj.get("ingredients")),
        benefits: string_list(obj.get("benefits")),
        volume: first_str(obj, &["volume"]),
    })
}

/// `price` is either a bare amount or `{ amount, currency }`. A missing
/// price means zero dollars. The currency code is upper-cased.
fn parse_price(raw: Option<&Value>) -> Result<Price> {
    let usd = |amount| Price {
        amount,
        currency: "USD".to_string(),
    };
    match raw {
        None | Some(Value::Null) => Ok(usd(0.0)),
        Some(Value::Number(n)) => Ok(usd(n.as_f64().unwrap_or(0.0))),
        Some(Value::Object(obj)) => {
            let amount = match obj.get("amount") {
                None | Some(Value::Null) => 0.0,
                Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
                Some(other) => {
                    return Err(PagecraftError::InvalidInput(format!(
                        "price amount must be a number, got {}",
                        other
                    )))
                }
            };
            let currency = first_str(obj, &["currency"])
                .map(|c| c.trim().to_ascii_uppercase())
                .unwrap_or_else(|| "USD".to_string());
            Ok(Price { amount, currency })
        }
        Some(other) => Err(PagecraftError::InvalidInput(format!(
            "price must be a number or an object, got {}",
            other
        ))),
    }
}

/// The product price must be at least one cent in a three-letter currency.
fn validate_price(price: &Price) -> Result<()> {
    if !price.amount.is_finite() || price.amount <= 0.0 {
        return Err(PagecraftError::InvalidInput(format!(
            "price must be positive, got {}",
            price.amount
        )));
    }
    if price.amount < MIN_PRICE {
        return Err(PagecraftError::InvalidInput(format!(
            "price is too low: {} {}",
            price.amount, price.currency
        )));
    }
    if price.currency.len() != 3 || !price.currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(PagecraftError::InvalidInput(format!(
            "currency code must be 3 letters, got '{}'",
            price.currency
        )));
    }
    if price.amount > PRICE_WARN_ABOVE {
        warn!(amount = price.amount, currency = %price.currency, "Price seems unusually high");
    }
    if !KNOWN_CURRENCIES.contains(&price.currency.as_str()) {
        warn!(currency = %price.currency, "Unusual currency code");
    }
    Ok(())
}

fn first_str(obj: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| obj.get(*n).and_then(Value::as_str))
        .map(str::to_string)
}

fn string_list(raw: Option<&Value>) -> Vec<String> {
    match raw {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_to_string).collect(),
        _ => Vec::new(),
    }
}

fn string_map(raw: Option<&Value>) -> BTreeMap<String, String> {
    match raw {
        Some(Value::Object(obj)) => obj
            .iter()
            .filter_map(|(k, v)| scalar_to_string(v).map(|v| (k.clone(), v)))
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use pagecraft_core::state::State;
    use pagecraft_core::types::Signal;
    use serde_json::json;

    #[test]
    fn camel_case_export_is_normalized() {
        let product = parse_product(&json!({
            "productId": "GS-01",
            "productName": "Glow Serum",
            "category": "Skincare",
            "price": {"amount": 29.99, "currency": "EUR"},
            "features": ["Vitamin C", "Hyaluronic Acid", 3],
            "specs": {"volume": "30ml", "pH": 3.5},
            "competitors": [{"name": "Rival", "price": 39.99, "ingredients": ["Niacinamide"]}]
        }))
        .unwrap();

        assert_eq!(product.id, "GS-01");
        assert_eq!(product.name, "Glow Serum");
        assert_eq!(product.price.currency, "EUR");
        assert_eq!(product.features, ["Vitamin C", "Hyaluronic Acid", "3"]);
        assert_eq!(product.specs["pH"], "3.5");
        assert_eq!(product.competitors[0].price, 39.99);
        assert_eq!(product.competitors[0].ingredients, ["Niacinamide"]);
        assert!(product.competitors[0].volume.is_none());
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let product = parse_product(&json!({"name": "Plain", "price": 12})).unwrap();
        assert_eq!(product.id, "UNKNOWN");
        assert_eq!(product.category, "General");
        assert_eq!(product.price.amount, 12.0);
        assert_eq!(product.price.currency, "USD");
        assert!(product.features.is_empty());
        assert!(product.competitors.is_empty());
    }

    #[test]
    fn missing_name_is_invalid_input() {
        let err = parse_product(&json!({"productId": "x"})).unwrap_err();
        assert!(matches!(err, PagecraftError::InvalidInput(_)));
        assert!(!err.is_retryable());

        let err = parse_product(&json!(["not", "an", "object"])).unwrap_err();
        assert!(err.to_string().contains("JSON object"));

        let err = parse_product(&json!({"name": "A", "price": 5, "competitors": [{"price": 1}]}))
            .unwrap_err();
        assert!(err.to_string().contains("competitor #1"));
    }

    #[test]
    fn non_positive_or_missing_price_is_invalid_input() {
        for price in [json!(-5), json!(0), json!({"amount": 0.001}), json!(null)] {
            let err = parse_product(&json!({"name": "Glow", "price": price})).unwrap_err();
            assert!(matches!(err, PagecraftError::InvalidInput(_)), "{}", price);
            assert!(!err.is_retryable());
        }
        let err = parse_product(&json!({"name": "Glow"})).unwrap_err();
        assert!(err.to_string().contains("price must be positive"));

        let err =
            parse_product(&json!({"name": "Glow", "price": {"amount": "cheap"}})).unwrap_err();
        assert!(err.to_string().contains("must be a number"));

        let err = parse_product(&json!({
            "name": "Glow",
            "price": 10,
            "competitors": [{"name": "Rival", "price": -1}]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("negative price"));
    }

    #[test]
    fn currency_must_be_a_three_letter_code() {
        let product =
            parse_product(&json!({"name": "Glow", "price": {"amount": 9.5, "currency": "inr"}}))
                .unwrap();
        assert_eq!(product.price.currency, "INR");

        // Unusual but well-formed codes are accepted.
        assert!(parse_product(&json!({"name": "Glow", "price": {"amount": 9.5, "currency": "BRL"}}))
            .is_ok());

        for currency in ["US", "DOLLARS", "U$D"] {
            let err = parse_product(&json!({
                "name": "Glow",
                "price": {"amount": 9.5, "currency": currency}
            }))
            .unwrap_err();
            assert!(err.to_string().contains("currency code"), "{}", currency);
        }
    }

    #[tokio::test]
    async fn step_writes_product_artifact() {
        let state = State::new(json!({"productName": "Glow Serum", "price": 24}), 3);
        let view = StateView::new(Arc::new(state), Arc::from(Vec::<String>::new()));
        let output = ParserStep.execute(view).await.unwrap();
        assert_eq!(output.signal, Signal::Success);
        let product = output.delta.get(keys::PRODUCT).unwrap();
        assert_eq!(product["name"], "Glow Serum");
    }
}
