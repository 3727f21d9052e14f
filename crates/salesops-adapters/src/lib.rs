//! Normalizes raw Yampi order payloads into [`CanonicalOrder`].
//!
//! The provider returns nested objects either bare or wrapped as
//! `{ "data": ... }` depending on the endpoint and `include` set. Every nested
//! access goes through [`unwrap_envelope`]. Missing or malformed nested fields
//! degrade to `None` or the `-` placeholder; only a non-object payload fails.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use salesops_core::{CanonicalOrder, UNKNOWN_LABEL};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "salesops-adapters";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("provider order payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Strips the provider's optional `{ "data": ... }` envelope.
pub fn unwrap_envelope(value: &JsonValue) -> Option<&JsonValue> {
    match value {
        JsonValue::Null => None,
        JsonValue::Object(map) => match map.get("data") {
            Some(inner) if inner.is_null() => None,
            Some(inner) => Some(inner),
            None => Some(value),
        },
        other => Some(other),
    }
}

fn nested<'a>(value: &'a JsonValue, key: &str) -> Option<&'a JsonValue> {
    value.get(key).and_then(unwrap_envelope)
}

fn nested_list<'a>(value: &'a JsonValue, key: &str) -> &'a [JsonValue] {
    nested(value, key)
        .and_then(JsonValue::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn json_string(value: &JsonValue, key: &str) -> Option<String> {
    match value.get(key)? {
        JsonValue::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_i64(value: &JsonValue, key: &str) -> Option<i64> {
    match value.get(key)? {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_amount(value: &JsonValue, key: &str) -> Option<f64> {
    match value.get(key)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn plan_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)PLANO\s+(.+)$").expect("plan pattern compiles"))
}

fn plan_delimiter_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\s*-\s*PLANO").expect("delimiter pattern compiles"))
}

fn model_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)Facility\s+(\w+)").expect("model pattern compiles"))
}

/// Plan name following the `PLANO` keyword, uppercased.
/// `"Facility Mini - PLANO express"` -> `"EXPRESS"`.
pub fn extract_plan(title: Option<&str>) -> String {
    title
        .and_then(|t| plan_pattern().captures(t))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_uppercase())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| UNKNOWN_LABEL.to_string())
}

/// Device model from the part of the title preceding the `- PLANO` delimiter
/// (the whole title when absent). A `Facility` brand narrows it to the word
/// after the brand; without the brand the whole delimited head is the model.
pub fn extract_model(title: Option<&str>) -> String {
    let Some(title) = title else {
        return UNKNOWN_LABEL.to_string();
    };
    let delimiter = plan_delimiter_pattern().find(title);
    let head = match delimiter {
        Some(delim) => &title[..delim.start()],
        None => title,
    };
    if let Some(model) = model_pattern().captures(head).and_then(|c| c.get(1)) {
        return model.as_str().to_string();
    }
    match delimiter.map(|_| head.trim()).filter(|h| !h.is_empty()) {
        Some(head) => head.to_string(),
        None => UNKNOWN_LABEL.to_string(),
    }
}

/// `"{street}, {number} - {neighborhood}, {city}/{state}"`, or `None` when the
/// address is absent or has no populated part.
pub fn format_address(address: &JsonValue) -> Option<String> {
    if !address.is_object() {
        return None;
    }
    let part = |key: &str| json_string(address, key).unwrap_or_default();
    let (street, number, neighborhood, city, state) = (
        part("street"),
        part("number"),
        part("neighborhood"),
        part("city"),
        part("state"),
    );
    if [&street, &number, &neighborhood, &city, &state]
        .iter()
        .all(|p| p.is_empty())
    {
        return None;
    }
    Some(format!("{street}, {number} - {neighborhood}, {city}/{state}"))
}

/// `created_at` arrives as a string or as `{ "date": "..." }`.
pub fn parse_sale_date(value: &JsonValue) -> Option<NaiveDateTime> {
    let text = match value {
        JsonValue::String(s) => s.as_str(),
        JsonValue::Object(_) => value.get("date")?.as_str()?,
        _ => return None,
    };
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Display title of a line item: `sku.data.title`, then `sku.title`, then
/// `product.name`.
pub fn item_title(item: &JsonValue) -> Option<String> {
    let raw_sku = item.get("sku");
    raw_sku
        .and_then(unwrap_envelope)
        .and_then(|sku| json_string(sku, "title"))
        .or_else(|| raw_sku.and_then(|sku| json_string(sku, "title")))
        .or_else(|| nested(item, "product").and_then(|p| json_string(p, "name")))
}

fn payment_method(order: &JsonValue) -> Option<String> {
    nested_list(order, "transactions")
        .first()
        .and_then(|t| json_string(t, "payment_method"))
        .or_else(|| {
            nested_list(order, "payments").first().and_then(|p| {
                json_string(p, "name").or_else(|| json_string(p, "payment_method"))
            })
        })
}

pub fn normalize(raw: &JsonValue) -> Result<CanonicalOrder, NormalizeError> {
    if !raw.is_object() {
        return Err(NormalizeError::NotAnObject(json_type_name(raw)));
    }

    let items = nested_list(raw, "items");
    let quantity: i64 = items
        .iter()
        .map(|item| json_i64(item, "quantity").unwrap_or(0))
        .sum();
    let product_title = items.first().and_then(item_title);

    let customer = nested(raw, "customer");
    let customer_str = |key: &str| customer.and_then(|c| json_string(c, key));
    let phone = customer
        .and_then(|c| nested(c, "phone"))
        .and_then(|p| json_string(p, "full_number"));

    let gross_amount = json_amount(raw, "value_total");
    let discount_amount = json_amount(raw, "value_discount");
    let net_amount = gross_amount.map(|gross| gross - discount_amount.unwrap_or(0.0));

    Ok(CanonicalOrder {
        provider_order_id: json_i64(raw, "id"),
        provider_order_number: json_i64(raw, "number"),
        customer_name: customer_str("name"),
        customer_cpf: customer_str("cpf"),
        customer_cnpj: customer_str("cnpj"),
        phone,
        delivery_address: nested(raw, "shipping_address").and_then(format_address),
        sold_at: raw.get("created_at").and_then(parse_sale_date),
        status: nested(raw, "status").and_then(|s| json_string(s, "name")),
        payment_method: payment_method(raw),
        model: extract_model(product_title.as_deref()),
        plan: extract_plan(product_title.as_deref()),
        quantity,
        product_title,
        gross_amount,
        discount_amount,
        net_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_order(wrapped: bool) -> JsonValue {
        let wrap = |v: JsonValue| if wrapped { json!({ "data": v }) } else { v };
        json!({
            "id": 501,
            "number": 1042,
            "value_total": 100,
            "value_discount": 15,
            "created_at": {"date": "2026-02-03 14:25:10.000000", "timezone": "America/Sao_Paulo"},
            "status": wrap(json!({"id": 4, "name": "Pago", "alias": "paid"})),
            "customer": wrap(json!({
                "name": "Maria Souza",
                "cpf": "123.456.789-00",
                "cnpj": null,
                "phone": {"full_number": "(11) 98888-7777"}
            })),
            "shipping_address": wrap(json!({
                "street": "Rua das Flores",
                "number": "120",
                "neighborhood": "Centro",
                "city": "Campinas",
                "state": "SP"
            })),
            "items": wrap(json!([
                {"quantity": 2, "sku": {"data": {"title": "Facility Mini - PLANO EXPRESS"}}},
                {"quantity": 1, "product": {"name": "Bobina"}}
            ])),
            "transactions": wrap(json!([{"payment_method": "credit_card"}]))
        })
    }

    #[test]
    fn title_parsing_examples() {
        let title = Some("Facility Mini - PLANO EXPRESS");
        assert_eq!(extract_model(title), "Mini");
        assert_eq!(extract_plan(title), "EXPRESS");

        assert_eq!(extract_plan(Some("Facility Pro - plano anual plus ")), "ANUAL PLUS");
        assert_eq!(extract_model(Some("Facility Pro")), "Pro");
        assert_eq!(extract_plan(Some("Facility Pro")), "-");

        assert_eq!(extract_model(Some("POS Ultra - PLANO X")), "POS Ultra");
        assert_eq!(extract_plan(Some("POS Ultra - PLANO X")), "X");
        assert_eq!(extract_model(Some(" - PLANO X")), "-");

        let unknown = Some("Bobina térmica 57mm");
        assert_eq!(extract_model(unknown), "-");
        assert_eq!(extract_plan(unknown), "-");
        assert_eq!(extract_model(None), "-");
        assert_eq!(extract_plan(None), "-");
    }

    #[test]
    fn unwrap_envelope_treats_bare_and_wrapped_alike() {
        let bare = json!({"name": "x"});
        let wrapped = json!({"data": {"name": "x"}});
        assert_eq!(unwrap_envelope(&bare), Some(&bare));
        assert_eq!(unwrap_envelope(&wrapped), Some(&bare));
        assert_eq!(unwrap_envelope(&json!(null)), None);
        assert_eq!(unwrap_envelope(&json!({"data": null})), None);
        assert_eq!(unwrap_envelope(&json!([1])), Some(&json!([1])));
    }

    #[test]
    fn normalize_is_envelope_agnostic() {
        let bare = normalize(&full_order(false)).unwrap();
        let wrapped = normalize(&full_order(true)).unwrap();
        assert_eq!(bare, wrapped);

        assert_eq!(bare.provider_order_id, Some(501));
        assert_eq!(bare.provider_order_number, Some(1042));
        assert_eq!(bare.customer_name.as_deref(), Some("Maria Souza"));
        assert_eq!(bare.customer_cpf.as_deref(), Some("123.456.789-00"));
        assert_eq!(bare.customer_cnpj, None);
        assert_eq!(bare.phone.as_deref(), Some("(11) 98888-7777"));
        assert_eq!(
            bare.delivery_address.as_deref(),
            Some("Rua das Flores, 120 - Centro, Campinas/SP")
        );
        assert_eq!(bare.status.as_deref(), Some("Pago"));
        assert_eq!(bare.payment_method.as_deref(), Some("credit_card"));
        assert_eq!(bare.quantity, 3);
        assert_eq!(bare.product_title.as_deref(), Some("Facility Mini - PLANO EXPRESS"));
        assert_eq!(bare.model, "Mini");
        assert_eq!(bare.plan, "EXPRESS");
        assert_eq!(
            bare.sold_at,
            NaiveDate::from_ymd_opt(2026, 2, 3).and_then(|d| d.and_hms_opt(14, 25, 10))
        );
    }

    #[test]
    fn net_amount_is_gross_minus_discount() {
        let order = normalize(&json!({"id": 1, "value_total": 100, "value_discount": 15})).unwrap();
        assert_eq!(order.gross_amount, Some(100.0));
        assert_eq!(order.discount_amount, Some(15.0));
        assert_eq!(order.net_amount, Some(85.0));

        let order = normalize(&json!({"id": 1, "value_total": "59.90"})).unwrap();
        assert_eq!(order.net_amount, Some(59.90));
    }

    #[test]
    fn sparse_payload_degrades_instead_of_failing() {
        let order = normalize(&json!({
            "id": 9,
            "customer": "unexpected",
            "shipping_address": [],
            "items": {"data": "nope"},
            "created_at": "garbage",
            "payments": {"data": [{"name": "Pix"}]}
        }))
        .unwrap();
        assert_eq!(order.customer_name, None);
        assert_eq!(order.delivery_address, None);
        assert_eq!(order.quantity, 0);
        assert_eq!(order.product_title, None);
        assert_eq!(order.model, "-");
        assert_eq!(order.plan, "-");
        assert_eq!(order.sold_at, None);
        assert_eq!(order.payment_method.as_deref(), Some("Pix"));
        assert_eq!(order.net_amount, None);
    }

    #[test]
    fn sku_title_falls_back_to_product_name() {
        let item = json!({"sku": {"title": "Facility Max - PLANO PRO"}});
        assert_eq!(item_title(&item).as_deref(), Some("Facility Max - PLANO PRO"));
        let item = json!({"sku": {"data": {}}, "product": {"data": {"name": "Facility Go"}}});
        assert_eq!(item_title(&item).as_deref(), Some("Facility Go"));
    }

    #[test]
    fn non_object_payload_is_a_hard_error() {
        assert_eq!(normalize(&json!([1, 2])), Err(NormalizeError::NotAnObject("array")));
        assert_eq!(normalize(&json!("x")), Err(NormalizeError::NotAnObject("string")));
    }

    #[test]
    fn sale_date_accepts_rfc3339_and_date_only() {
        assert_eq!(
            parse_sale_date(&json!("2026-02-03T10:00:00-03:00")),
            NaiveDate::from_ymd_opt(2026, 2, 3).and_then(|d| d.and_hms_opt(10, 0, 0))
        );
        assert_eq!(
            parse_sale_date(&json!("2026-02-03")),
            NaiveDate::from_ymd_opt(2026, 2, 3).and_then(|d| d.and_hms_opt(0, 0, 0))
        );
        assert_eq!(parse_sale_date(&json!(17)), None);
    }
}
