//! Lenient decoding of order-service responses.
//!
//! Products come from a legacy database and may use any of several column
//! names for the same field; numbers may arrive as JSON numbers or strings.
//! Unparsable prices and stock levels default to zero instead of failing the
//! whole catalog.
//!
//! Account endpoints report validation failures per field
//! (`{"email": ["already registered"]}`); [`error_detail`] flattens those too.

use std::str::FromStr;

use bioapp_core::{OrderId, Price, ProductId};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{Map, Value};

use super::{ApiError, AuthTokens, CheckoutSession};
use crate::catalog::Product;

const ID_KEYS: &[&str] = &["id", "ID_PRODUCTO", "pk", "pk_id"];
const NAME_KEYS: &[&str] = &["name", "PROD_NOMBRE", "nombre"];
const PRICE_KEYS: &[&str] = &["price", "PROD_PRECIO_PUB", "precio"];
const STOCK_KEYS: &[&str] = &["stock", "STOCK_PROD"];
const CATEGORY_KEYS: &[&str] = &["category", "PROD_CATEGORIA", "categoria"];
const IMAGE_KEYS: &[&str] = &["image", "PROD_IMAGEN", "imagen"];

const CHECKOUT_URL_KEYS: &[&str] = &["checkout_url", "checkoutUrl", "url"];
const ORDER_ID_KEYS: &[&str] = &["order_id", "orderId", "id"];
const ERROR_DETAIL_KEYS: &[&str] = &[
    "detail",
    "error",
    "email",
    "username",
    "password",
    "new_password",
    "uid",
    "token",
    "non_field_errors",
];

/// Name shown for products the service returns without one.
pub const UNNAMED_PRODUCT: &str = "Unnamed product";

// =============================================================================
// Field helpers
// =============================================================================

/// First value among `keys` that is present, non-null and not a blank string.
fn first_of<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|key| obj.get(*key)).find(|value| match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    })
}

/// Render a scalar JSON value as a trimmed string.
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Leading numeric part of a price string (`"$1,249.50 MXN"` -> `"1249.50"`).
fn numeric_prefix(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',')
        .enumerate()
        .take_while(|(i, c)| c.is_ascii_digit() || *c == '.' || (*i == 0 && *c == '-'))
        .map(|(_, c)| c)
        .collect()
}

/// Parse a price, defaulting to zero for anything unparsable or negative.
fn parse_price(value: Option<&Value>) -> Price {
    let amount = value.and_then(as_text).and_then(|text| {
        let digits = numeric_prefix(&text);
        Decimal::from_str(&digits)
            .or_else(|_| Decimal::from_scientific(&text))
            .ok()
    });

    match amount {
        Some(amount) if !amount.is_sign_negative() => Price::new(amount),
        _ => Price::ZERO,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // `as` saturates on overflow
fn whole_units(f: f64) -> u64 {
    f.trunc() as u64
}

/// Parse a stock level, defaulting to zero for anything unparsable or negative.
fn parse_stock(value: Option<&Value>) -> u32 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0)
                    .map(whole_units)
            })
            .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX)),
        Some(Value::String(s)) => {
            let digits = numeric_prefix(s);
            let whole = digits.split('.').next().unwrap_or_default();
            whole.parse::<u32>().unwrap_or(0)
        }
        _ => 0,
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Decode a catalog response: either a bare array or `{ "results": [...] }`.
///
/// Items that are not objects or carry no usable identifier are skipped.
///
/// # Errors
///
/// Returns `ApiError::MissingField` if the body is neither shape.
pub fn parse_products(body: &Value) -> Result<Vec<Product>, ApiError> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(obj) => obj
            .get("results")
            .and_then(Value::as_array)
            .ok_or(ApiError::MissingField("results"))?,
        _ => return Err(ApiError::MissingField("results")),
    };

    let products: Vec<Product> = items.iter().filter_map(parse_product).collect();
    if products.len() < items.len() {
        tracing::warn!(
            skipped = items.len() - products.len(),
            "Skipped catalog items without a usable id"
        );
    }
    Ok(products)
}

/// Map one catalog item onto the canonical [`Product`] shape.
#[must_use]
pub fn parse_product(item: &Value) -> Option<Product> {
    let obj = item.as_object()?;
    let id = first_of(obj, ID_KEYS).and_then(as_text)?;

    Some(Product {
        id: ProductId::new(id),
        name: first_of(obj, NAME_KEYS)
            .and_then(as_text)
            .unwrap_or_else(|| UNNAMED_PRODUCT.to_string()),
        price: parse_price(first_of(obj, PRICE_KEYS)),
        stock: parse_stock(first_of(obj, STOCK_KEYS)),
        category: first_of(obj, CATEGORY_KEYS).and_then(as_text),
        image: first_of(obj, IMAGE_KEYS)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|url| url::Url::parse(url).is_ok())
            .map(String::from),
    })
}

// =============================================================================
// Checkout
// =============================================================================

/// Decode an order-creation response.
#[must_use]
pub fn parse_checkout_session(body: &Value) -> CheckoutSession {
    let Some(obj) = body.as_object() else {
        return CheckoutSession {
            checkout_url: None,
            order_id: None,
        };
    };

    CheckoutSession {
        checkout_url: first_of(obj, CHECKOUT_URL_KEYS)
            .and_then(Value::as_str)
            .map(|url| url.trim().to_string()),
        order_id: first_of(obj, ORDER_ID_KEYS)
            .and_then(as_text)
            .map(OrderId::new),
    }
}

/// Decode a `POST /token/` response. `access` is required.
///
/// # Errors
///
/// Returns [`ApiError::MissingField`] if no access token is present.
pub fn parse_tokens(body: &Value) -> Result<AuthTokens, ApiError> {
    let token = |key: &str| {
        body.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| SecretString::from(t.to_string()))
    };

    Ok(AuthTokens {
        access: token("access").ok_or(ApiError::MissingField("access"))?,
        refresh: token("refresh"),
    })
}

fn detail_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => {
            let joined = items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .collect::<Vec<_>>()
                .join(" ");
            if joined.is_empty() {
                value.to_string()
            } else {
                joined
            }
        }
        other => other.to_string(),
    }
}

/// Extract a human-readable error from a non-success response body.
///
/// JSON bodies yield their `detail` or `error` field, then the first
/// field-level error; lists of messages are joined. Other non-empty bodies
/// are returned verbatim (truncated).
#[must_use]
pub fn error_detail(body: &str) -> Option<String> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(obj)) => first_of(&obj, ERROR_DETAIL_KEYS).map(detail_text),
        Ok(_) => None,
        Err(_) => {
            let text = body.trim();
            (!text.is_empty()).then(|| text.chars().take(200).collect())
        }
    }
}
