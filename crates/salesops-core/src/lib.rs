//! Core order model shared by the provider client, normalizer, store and web API.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "salesops-core";

/// Provenance tag written on rows created by sync.
pub const PROVIDER_SOURCE: &str = "yampi";

/// Placeholder for model/plan values the title parser could not recognize.
pub const UNKNOWN_LABEL: &str = "-";

/// Flat, provider-independent shape produced by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CanonicalOrder {
    pub provider_order_id: Option<i64>,
    pub provider_order_number: Option<i64>,
    pub customer_name: Option<String>,
    pub customer_cpf: Option<String>,
    pub customer_cnpj: Option<String>,
    pub phone: Option<String>,
    pub delivery_address: Option<String>,
    pub sold_at: Option<NaiveDateTime>,
    pub status: Option<String>,
    pub payment_method: Option<String>,
    pub model: String,
    pub plan: String,
    pub quantity: i64,
    pub product_title: Option<String>,
    pub gross_amount: Option<f64>,
    pub discount_amount: Option<f64>,
    pub net_amount: Option<f64>,
}

/// Fields an operator fills in from the dashboard. Sync never writes these on
/// an existing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OperatorFields {
    pub cpf: Option<String>,
    pub cnpj: Option<String>,
    pub primeiro_contato: Option<NaiveDate>,
    pub cad_portal: Option<String>,
    pub cad_pagseguro: Option<String>,
    pub data_aceite: Option<NaiveDate>,
    pub maquina: Option<String>,
    pub maq_de_rua: Option<String>,
    pub data_envio_pos: Option<NaiveDate>,
    pub forma_pag_pos: Option<String>,
    pub manual_cliente: Option<String>,
    pub data_envio_manual: Option<NaiveDate>,
    pub custo_op_pagarme: Option<f64>,
    pub custo_pos: Option<f64>,
    pub comissao_afiliado: Option<f64>,
    pub lucro: Option<f64>,
}

/// Persisted order row. Serialized names follow the `orders` table columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    #[serde(rename = "yampi_order_id")]
    pub provider_order_id: Option<i64>,
    #[serde(rename = "yampi_order_number")]
    pub provider_order_number: Option<i64>,
    #[serde(rename = "cliente")]
    pub customer_name: Option<String>,
    #[serde(rename = "telefone")]
    pub phone: Option<String>,
    #[serde(rename = "endereco_entrega")]
    pub delivery_address: Option<String>,
    #[serde(rename = "data_venda")]
    pub sold_at: Option<NaiveDateTime>,
    pub status: Option<String>,
    #[serde(rename = "forma_pagamento")]
    pub payment_method: Option<String>,
    #[serde(rename = "modelo")]
    pub model: Option<String>,
    #[serde(rename = "plano")]
    pub plan: Option<String>,
    #[serde(rename = "quantidade")]
    pub quantity: Option<i64>,
    #[serde(rename = "link_cupom")]
    pub product_title: Option<String>,
    #[serde(rename = "valor_bruto")]
    pub gross_amount: Option<f64>,
    #[serde(rename = "valor_liquido")]
    pub net_amount: Option<f64>,
    #[serde(rename = "valor_desconto")]
    pub discount_amount: Option<f64>,
    #[serde(flatten)]
    pub operator: OperatorFields,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Builds the row sync inserts for a provider order that has no local match.
    /// Every operator field starts empty.
    pub fn from_synced(id: i64, order: &CanonicalOrder, now: DateTime<Utc>) -> Self {
        let mut row = Self {
            id,
            provider_order_id: None,
            provider_order_number: None,
            customer_name: None,
            phone: None,
            delivery_address: None,
            sold_at: None,
            status: None,
            payment_method: None,
            model: None,
            plan: None,
            quantity: None,
            product_title: None,
            gross_amount: None,
            net_amount: None,
            discount_amount: None,
            operator: OperatorFields::default(),
            source: PROVIDER_SOURCE.to_string(),
            created_at: now,
            updated_at: now,
            last_synced_at: None,
        };
        row.apply_sync(order, now);
        row
    }

    /// Overwrites the provider-sourced columns and sync timestamps only.
    pub fn apply_sync(&mut self, order: &CanonicalOrder, now: DateTime<Utc>) {
        self.provider_order_id = order.provider_order_id;
        self.provider_order_number = order.provider_order_number;
        self.customer_name = order.customer_name.clone();
        self.phone = order.phone.clone();
        self.delivery_address = order.delivery_address.clone();
        self.sold_at = order.sold_at;
        self.status = order.status.clone();
        self.payment_method = order.payment_method.clone();
        self.model = Some(order.model.clone());
        self.plan = Some(order.plan.clone());
        self.quantity = Some(order.quantity);
        self.product_title = order.product_title.clone();
        self.gross_amount = order.gross_amount;
        self.net_amount = order.net_amount;
        self.discount_amount = order.discount_amount;
        self.updated_at = now;
        self.last_synced_at = Some(now);
    }

    pub fn apply_edit(&mut self, edit: &OperatorEdit, now: DateTime<Utc>) {
        let op = &mut self.operator;
        match edit.clone() {
            OperatorEdit::Cpf(v) => op.cpf = v,
            OperatorEdit::Cnpj(v) => op.cnpj = v,
            OperatorEdit::PrimeiroContato(v) => op.primeiro_contato = v,
            OperatorEdit::CadPortal(v) => op.cad_portal = v,
            OperatorEdit::CadPagseguro(v) => op.cad_pagseguro = v,
            OperatorEdit::DataAceite(v) => op.data_aceite = v,
            OperatorEdit::Maquina(v) => op.maquina = v,
            OperatorEdit::MaqDeRua(v) => op.maq_de_rua = v,
            OperatorEdit::DataEnvioPos(v) => op.data_envio_pos = v,
            OperatorEdit::FormaPagPos(v) => op.forma_pag_pos = v,
            OperatorEdit::ManualCliente(v) => op.manual_cliente = v,
            OperatorEdit::DataEnvioManual(v) => op.data_envio_manual = v,
            OperatorEdit::CustoOpPagarme(v) => op.custo_op_pagarme = v,
            OperatorEdit::CustoPos(v) => op.custo_pos = v,
            OperatorEdit::ComissaoAfiliado(v) => op.comissao_afiliado = v,
            OperatorEdit::Lucro(v) => op.lucro = v,
        }
        self.updated_at = now;
    }
}

/// Allow-list of columns the dashboard's single-field edit may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorField {
    Cpf,
    Cnpj,
    PrimeiroContato,
    CadPortal,
    CadPagseguro,
    DataAceite,
    Maquina,
    MaqDeRua,
    DataEnvioPos,
    FormaPagPos,
    ManualCliente,
    DataEnvioManual,
    CustoOpPagarme,
    CustoPos,
    ComissaoAfiliado,
    Lucro,
}

impl OperatorField {
    pub const ALL: [OperatorField; 16] = [
        OperatorField::Cpf,
        OperatorField::Cnpj,
        OperatorField::PrimeiroContato,
        OperatorField::CadPortal,
        OperatorField::CadPagseguro,
        OperatorField::DataAceite,
        OperatorField::Maquina,
        OperatorField::MaqDeRua,
        OperatorField::DataEnvioPos,
        OperatorField::FormaPagPos,
        OperatorField::ManualCliente,
        OperatorField::DataEnvioManual,
        OperatorField::CustoOpPagarme,
        OperatorField::CustoPos,
        OperatorField::ComissaoAfiliado,
        OperatorField::Lucro,
    ];

    pub fn column(self) -> &'static str {
        match self {
            OperatorField::Cpf => "cpf",
            OperatorField::Cnpj => "cnpj",
            OperatorField::PrimeiroContato => "primeiro_contato",
            OperatorField::CadPortal => "cad_portal",
            OperatorField::CadPagseguro => "cad_pagseguro",
            OperatorField::DataAceite => "data_aceite",
            OperatorField::Maquina => "maquina",
            OperatorField::MaqDeRua => "maq_de_rua",
            OperatorField::DataEnvioPos => "data_envio_pos",
            OperatorField::FormaPagPos => "forma_pag_pos",
            OperatorField::ManualCliente => "manual_cliente",
            OperatorField::DataEnvioManual => "data_envio_manual",
            OperatorField::CustoOpPagarme => "custo_op_pagarme",
            OperatorField::CustoPos => "custo_pos",
            OperatorField::ComissaoAfiliado => "comissao_afiliado",
            OperatorField::Lucro => "lucro",
        }
    }

    pub fn from_column(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.column() == name)
    }

    /// Converts a raw JSON value into the typed edit for this field. `null` and
    /// the empty string clear the column.
    pub fn parse_value(self, value: &JsonValue) -> Result<OperatorEdit, EditError> {
        let invalid = || EditError::InvalidValue {
            field: self.column(),
            value: value.to_string(),
        };
        let text = || json_text(value).ok_or_else(invalid);
        let date = || json_date(value).ok_or_else(invalid);
        let amount = || json_amount(value).ok_or_else(invalid);

        Ok(match self {
            OperatorField::Cpf => OperatorEdit::Cpf(text()?),
            OperatorField::Cnpj => OperatorEdit::Cnpj(text()?),
            OperatorField::PrimeiroContato => OperatorEdit::PrimeiroContato(date()?),
            OperatorField::CadPortal => OperatorEdit::CadPortal(text()?),
            OperatorField::CadPagseguro => OperatorEdit::CadPagseguro(text()?),
            OperatorField::DataAceite => OperatorEdit::DataAceite(date()?),
            OperatorField::Maquina => OperatorEdit::Maquina(text()?),
            OperatorField::MaqDeRua => OperatorEdit::MaqDeRua(text()?),
            OperatorField::DataEnvioPos => OperatorEdit::DataEnvioPos(date()?),
            OperatorField::FormaPagPos => OperatorEdit::FormaPagPos(text()?),
            OperatorField::ManualCliente => OperatorEdit::ManualCliente(text()?),
            OperatorField::DataEnvioManual => OperatorEdit::DataEnvioManual(date()?),
            OperatorField::CustoOpPagarme => OperatorEdit::CustoOpPagarme(amount()?),
            OperatorField::CustoPos => OperatorEdit::CustoPos(amount()?),
            OperatorField::ComissaoAfiliado => OperatorEdit::ComissaoAfiliado(amount()?),
            OperatorField::Lucro => OperatorEdit::Lucro(amount()?),
        })
    }
}

// The outer Option is None when the value has the wrong shape; the inner one
// is None when the column should be cleared.
fn json_text(value: &JsonValue) -> Option<Option<String>> {
    match value {
        JsonValue::Null => Some(None),
        JsonValue::String(s) if s.is_empty() => Some(None),
        JsonValue::String(s) => Some(Some(s.clone())),
        _ => None,
    }
}

fn json_date(value: &JsonValue) -> Option<Option<NaiveDate>> {
    match value {
        JsonValue::Null => Some(None),
        JsonValue::String(s) if s.trim().is_empty() => Some(None),
        JsonValue::String(s) => {
            let s = s.trim();
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
                .map(Some)
        }
        _ => None,
    }
}

fn json_amount(value: &JsonValue) -> Option<Option<f64>> {
    match value {
        JsonValue::Null => Some(None),
        JsonValue::Number(n) => n.as_f64().map(Some),
        JsonValue::String(s) if s.trim().is_empty() => Some(None),
        JsonValue::String(s) => {
            let s = s.trim();
            s.parse::<f64>()
                .ok()
                .or_else(|| s.replace(',', ".").parse::<f64>().ok())
                .filter(|v| v.is_finite())
                .map(Some)
        }
        _ => None,
    }
}

/// One operator edit: the allow-listed column plus its typed new value.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorEdit {
    Cpf(Option<String>),
    Cnpj(Option<String>),
    PrimeiroContato(Option<NaiveDate>),
    CadPortal(Option<String>),
    CadPagseguro(Option<String>),
    DataAceite(Option<NaiveDate>),
    Maquina(Option<String>),
    MaqDeRua(Option<String>),
    DataEnvioPos(Option<NaiveDate>),
    FormaPagPos(Option<String>),
    ManualCliente(Option<String>),
    DataEnvioManual(Option<NaiveDate>),
    CustoOpPagarme(Option<f64>),
    CustoPos(Option<f64>),
    ComissaoAfiliado(Option<f64>),
    Lucro(Option<f64>),
}

/// Borrowed view of an edit's value, grouped by column type for SQL binding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EditValue<'a> {
    Text(Option<&'a str>),
    Date(Option<NaiveDate>),
    Amount(Option<f64>),
}

impl OperatorEdit {
    pub fn field(&self) -> OperatorField {
        match self {
            OperatorEdit::Cpf(_) => OperatorField::Cpf,
            OperatorEdit::Cnpj(_) => OperatorField::Cnpj,
            OperatorEdit::PrimeiroContato(_) => OperatorField::PrimeiroContato,
            OperatorEdit::CadPortal(_) => OperatorField::CadPortal,
            OperatorEdit::CadPagseguro(_) => OperatorField::CadPagseguro,
            OperatorEdit::DataAceite(_) => OperatorField::DataAceite,
            OperatorEdit::Maquina(_) => OperatorField::Maquina,
            OperatorEdit::MaqDeRua(_) => OperatorField::MaqDeRua,
            OperatorEdit::DataEnvioPos(_) => OperatorField::DataEnvioPos,
            OperatorEdit::FormaPagPos(_) => OperatorField::FormaPagPos,
            OperatorEdit::ManualCliente(_) => OperatorField::ManualCliente,
            OperatorEdit::DataEnvioManual(_) => OperatorField::DataEnvioManual,
            OperatorEdit::CustoOpPagarme(_) => OperatorField::CustoOpPagarme,
            OperatorEdit::CustoPos(_) => OperatorField::CustoPos,
            OperatorEdit::ComissaoAfiliado(_) => OperatorField::ComissaoAfiliado,
            OperatorEdit::Lucro(_) => OperatorField::Lucro,
        }
    }

    pub fn value(&self) -> EditValue<'_> {
        match self {
            OperatorEdit::Cpf(v)
            | OperatorEdit::Cnpj(v)
            | OperatorEdit::CadPortal(v)
            | OperatorEdit::CadPagseguro(v)
            | OperatorEdit::Maquina(v)
            | OperatorEdit::MaqDeRua(v)
            | OperatorEdit::FormaPagPos(v)
            | OperatorEdit::ManualCliente(v) => EditValue::Text(v.as_deref()),
            OperatorEdit::PrimeiroContato(v)
            | OperatorEdit::DataAceite(v)
            | OperatorEdit::DataEnvioPos(v)
            | OperatorEdit::DataEnvioManual(v) => EditValue::Date(*v),
            OperatorEdit::CustoOpPagarme(v)
            | OperatorEdit::CustoPos(v)
            | OperatorEdit::ComissaoAfiliado(v)
            | OperatorEdit::Lucro(v) => EditValue::Amount(*v),
        }
    }

    /// Picks the first allow-listed key of a PATCH body, in body order, and
    /// parses its value. Unknown keys are ignored; a body with no allow-listed
    /// key is rejected.
    pub fn from_body(body: &serde_json::Map<String, JsonValue>) -> Result<Self, EditError> {
        let (field, value) = body
            .iter()
            .find_map(|(k, v)| OperatorField::from_column(k).map(|f| (f, v)))
            .ok_or(EditError::NoEditableField)?;
        field.parse_value(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("no valid fields to update")]
    NoEditableField,
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Filter accepted by the provider's order listing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderFilter {
    #[serde(default)]
    pub status_ids: Vec<String>,
    #[serde(default)]
    pub payment_methods: Vec<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub q: Option<String>,
}

/// Filter for the local order list. Both date bounds are inclusive days and
/// apply independently.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OrderQuery {
    pub q: Option<String>,
    pub payment_method: Option<String>,
    pub status: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

/// Per-run outcome counts. `created + updated + errors == total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncResult {
    pub created: usize,
    pub updated: usize,
    pub errors: usize,
    pub total: usize,
}

impl SyncResult {
    pub fn message(&self) -> String {
        format!(
            "Synced: {} created, {} updated, {} errors",
            self.created, self.updated, self.errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().unwrap()
    }

    fn canonical(id: i64, name: &str) -> CanonicalOrder {
        CanonicalOrder {
            provider_order_id: Some(id),
            provider_order_number: Some(id + 1000),
            customer_name: Some(name.to_string()),
            customer_cpf: Some("111.222.333-44".into()),
            model: "Mini".into(),
            plan: "EXPRESS".into(),
            quantity: 2,
            gross_amount: Some(100.0),
            discount_amount: Some(15.0),
            net_amount: Some(85.0),
            ..CanonicalOrder::default()
        }
    }

    #[test]
    fn every_operator_column_round_trips_through_from_column() {
        for field in OperatorField::ALL {
            assert_eq!(OperatorField::from_column(field.column()), Some(field));
        }
        assert_eq!(OperatorField::from_column("cliente"), None);
        assert_eq!(OperatorField::from_column("valor_bruto"), None);
    }

    #[test]
    fn provider_columns_are_not_editable() {
        for column in ["yampi_order_id", "cliente", "status", "valor_liquido", "modelo", "source"] {
            assert!(OperatorField::from_column(column).is_none(), "{column} must not be editable");
        }
    }

    #[test]
    fn parse_value_types_by_field_kind() {
        assert_eq!(
            OperatorField::PrimeiroContato.parse_value(&json!("2026-02-10")).unwrap(),
            OperatorEdit::PrimeiroContato(NaiveDate::from_ymd_opt(2026, 2, 10))
        );
        assert_eq!(
            OperatorField::Lucro.parse_value(&json!("12,50")).unwrap(),
            OperatorEdit::Lucro(Some(12.5))
        );
        assert_eq!(
            OperatorField::CustoPos.parse_value(&json!(30)).unwrap(),
            OperatorEdit::CustoPos(Some(30.0))
        );
        assert_eq!(
            OperatorField::Maquina.parse_value(&json!(null)).unwrap(),
            OperatorEdit::Maquina(None)
        );
        assert!(matches!(
            OperatorField::DataAceite.parse_value(&json!("not a date")),
            Err(EditError::InvalidValue { field: "data_aceite", .. })
        ));
        assert!(OperatorField::Cpf.parse_value(&json!(42)).is_err());
    }

    #[test]
    fn from_body_takes_first_allowed_key() {
        let body = json!({"cliente": "ignored", "cnpj": "12.345.678/0001-90"});
        let edit = OperatorEdit::from_body(body.as_object().unwrap()).unwrap();
        assert_eq!(edit, OperatorEdit::Cnpj(Some("12.345.678/0001-90".into())));

        let body = json!({"maquina": "S920", "cpf": "111"});
        let edit = OperatorEdit::from_body(body.as_object().unwrap()).unwrap();
        assert_eq!(edit, OperatorEdit::Maquina(Some("S920".into())));

        let parsed: JsonValue = serde_json::from_str(r#"{"lucro": 10, "cad_portal": "sim"}"#).unwrap();
        let edit = OperatorEdit::from_body(parsed.as_object().unwrap()).unwrap();
        assert_eq!(edit.field(), OperatorField::Lucro);

        let body = json!({"status": "paid"});
        assert_eq!(
            OperatorEdit::from_body(body.as_object().unwrap()),
            Err(EditError::NoEditableField)
        );
    }

    #[test]
    fn sync_update_leaves_operator_fields_alone() {
        let mut row = Order::from_synced(1, &canonical(7, "Ana"), now());
        assert_eq!(row.operator, OperatorFields::default());
        assert_eq!(row.source, PROVIDER_SOURCE);

        row.apply_edit(&OperatorEdit::Cpf(Some("999".into())), now());
        row.apply_edit(&OperatorEdit::Lucro(Some(40.0)), now());
        let before = row.operator.clone();

        let mut changed = canonical(7, "Ana Maria");
        changed.customer_cpf = Some("000".into());
        row.apply_sync(&changed, now());

        assert_eq!(row.customer_name.as_deref(), Some("Ana Maria"));
        assert_eq!(row.operator, before);
        assert_eq!(row.last_synced_at, Some(now()));
    }

    #[test]
    fn order_serializes_with_column_names() {
        let row = Order::from_synced(3, &canonical(9, "Bia"), now());
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["yampi_order_id"], json!(9));
        assert_eq!(value["cliente"], json!("Bia"));
        assert_eq!(value["valor_liquido"], json!(85.0));
        assert_eq!(value["cpf"], json!(null));
        assert_eq!(value["lucro"], json!(null));
    }

    #[test]
    fn sync_result_message_lists_counts() {
        let result = SyncResult { created: 2, updated: 3, errors: 1, total: 6 };
        assert_eq!(result.message(), "Synced: 2 created, 3 updated, 1 errors");
    }
}
