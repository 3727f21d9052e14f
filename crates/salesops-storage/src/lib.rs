//! Local order store: parameterized queries over the `orders` table.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDateTime, Utc};
use salesops_core::{CanonicalOrder, EditValue, OperatorEdit, OperatorFields, Order, OrderQuery, PROVIDER_SOURCE};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

pub const CRATE_NAME: &str = "salesops-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("provider order {0} already exists")]
    DuplicateProviderOrder(i64),
    #[error("order has no provider identifier")]
    MissingProviderId,
}

/// Store operations used by sync and the dashboard API.
///
/// Sync only ever calls `insert_synced`/`update_synced`, which write the
/// provider-sourced columns. Operator columns change only through
/// `apply_edit`, whose column set is closed by [`OperatorEdit`].
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_id_by_provider_id(&self, provider_order_id: i64) -> Result<Option<i64>, StoreError>;

    async fn insert_synced(&self, order: &CanonicalOrder, now: DateTime<Utc>) -> Result<i64, StoreError>;

    /// Returns `false` when no row matched the provider identifier.
    async fn update_synced(&self, order: &CanonicalOrder, now: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn list_orders(&self, query: &OrderQuery) -> Result<Vec<Order>, StoreError>;

    async fn get_order(&self, id: i64) -> Result<Option<Order>, StoreError>;

    /// Returns the updated row, or `None` when `id` does not exist.
    async fn apply_edit(&self, id: i64, edit: &OperatorEdit) -> Result<Option<Order>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        info!("database connection established");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn order_from_row(row: &PgRow) -> Result<Order, sqlx::Error> {
    Ok(Order {
        id: row.try_get("id")?,
        provider_order_id: row.try_get("yampi_order_id")?,
        provider_order_number: row.try_get("yampi_order_number")?,
        customer_name: row.try_get("cliente")?,
        phone: row.try_get("telefone")?,
        delivery_address: row.try_get("endereco_entrega")?,
        sold_at: row.try_get("data_venda")?,
        status: row.try_get("status")?,
        payment_method: row.try_get("forma_pagamento")?,
        model: row.try_get("modelo")?,
        plan: row.try_get("plano")?,
        quantity: row.try_get("quantidade")?,
        product_title: row.try_get("link_cupom")?,
        gross_amount: row.try_get("valor_bruto")?,
        net_amount: row.try_get("valor_liquido")?,
        discount_amount: row.try_get("valor_desconto")?,
        operator: OperatorFields {
            cpf: row.try_get("cpf")?,
            cnpj: row.try_get("cnpj")?,
            primeiro_contato: row.try_get("primeiro_contato")?,
            cad_portal: row.try_get("cad_portal")?,
            cad_pagseguro: row.try_get("cad_pagseguro")?,
            data_aceite: row.try_get("data_aceite")?,
            maquina: row.try_get("maquina")?,
            maq_de_rua: row.try_get("maq_de_rua")?,
            data_envio_pos: row.try_get("data_envio_pos")?,
            forma_pag_pos: row.try_get("forma_pag_pos")?,
            manual_cliente: row.try_get("manual_cliente")?,
            data_envio_manual: row.try_get("data_envio_manual")?,
            custo_op_pagarme: row.try_get("custo_op_pagarme")?,
            custo_pos: row.try_get("custo_pos")?,
            comissao_afiliado: row.try_get("comissao_afiliado")?,
            lucro: row.try_get("lucro")?,
        },
        source: row.try_get("source")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_synced_at: row.try_get("last_synced_at")?,
    })
}

fn day_start(date: chrono::NaiveDate) -> NaiveDateTime {
    date.and_time(chrono::NaiveTime::MIN)
}

/// Builds the filtered order listing. Search matches customer name, tax ids
/// and phone case-insensitively.
pub fn list_query_builder(query: &OrderQuery) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT * FROM orders WHERE TRUE");

    if let Some(q) = query.q.as_deref().filter(|q| !q.trim().is_empty()) {
        let term = format!("%{}%", q.trim());
        qb.push(" AND (cliente ILIKE ");
        qb.push_bind(term.clone());
        qb.push(" OR cpf ILIKE ");
        qb.push_bind(term.clone());
        qb.push(" OR cnpj ILIKE ");
        qb.push_bind(term.clone());
        qb.push(" OR telefone ILIKE ");
        qb.push_bind(term);
        qb.push(")");
    }
    if let Some(method) = query.payment_method.clone() {
        qb.push(" AND forma_pagamento = ");
        qb.push_bind(method);
    }
    if let Some(status) = query.status.clone() {
        qb.push(" AND status = ");
        qb.push_bind(status);
    }
    if let Some(from) = query.date_from {
        qb.push(" AND data_venda >= ");
        qb.push_bind(day_start(from));
    }
    if let Some(to) = query.date_to.and_then(|d| d.checked_add_days(Days::new(1))) {
        qb.push(" AND data_venda < ");
        qb.push_bind(day_start(to));
    }

    qb.push(" ORDER BY data_venda DESC NULLS LAST, id DESC");
    qb
}

/// Single-column operator update. The column name comes from the closed
/// [`OperatorEdit`] set, never from the caller.
pub fn edit_query_builder(id: i64, edit: &OperatorEdit) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("UPDATE orders SET ");
    qb.push(edit.field().column());
    qb.push(" = ");
    match edit.value() {
        EditValue::Text(v) => qb.push_bind(v.map(str::to_owned)),
        EditValue::Date(v) => qb.push_bind(v),
        EditValue::Amount(v) => qb.push_bind(v),
    };
    qb.push(", updated_at = NOW() WHERE id = ");
    qb.push_bind(id);
    qb.push(" RETURNING *");
    qb
}

fn map_insert_error(err: sqlx::Error, provider_order_id: i64) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::DuplicateProviderOrder(provider_order_id)
        }
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn find_id_by_provider_id(&self, provider_order_id: i64) -> Result<Option<i64>, StoreError> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM orders WHERE yampi_order_id = $1")
            .bind(provider_order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn insert_synced(&self, order: &CanonicalOrder, now: DateTime<Utc>) -> Result<i64, StoreError> {
        let provider_order_id = order.provider_order_id.ok_or(StoreError::MissingProviderId)?;
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO orders (
                yampi_order_id, yampi_order_number, cliente, telefone,
                endereco_entrega, data_venda, status, forma_pagamento, modelo, plano,
                quantidade, link_cupom, valor_bruto, valor_liquido, valor_desconto,
                source, created_at, updated_at, last_synced_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $17, $17
            )
            RETURNING id
            "#,
        )
        .bind(provider_order_id)
        .bind(order.provider_order_number)
        .bind(&order.customer_name)
        .bind(&order.phone)
        .bind(&order.delivery_address)
        .bind(order.sold_at)
        .bind(&order.status)
        .bind(&order.payment_method)
        .bind(&order.model)
        .bind(&order.plan)
        .bind(order.quantity)
        .bind(&order.product_title)
        .bind(order.gross_amount)
        .bind(order.net_amount)
        .bind(order.discount_amount)
        .bind(PROVIDER_SOURCE)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, provider_order_id))?;
        Ok(id)
    }

    async fn update_synced(&self, order: &CanonicalOrder, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let provider_order_id = order.provider_order_id.ok_or(StoreError::MissingProviderId)?;
        let result = sqlx::query(
            r#"
            UPDATE orders SET
                yampi_order_number = $2,
                cliente = $3,
                telefone = $4,
                endereco_entrega = $5,
                data_venda = $6,
                status = $7,
                forma_pagamento = $8,
                modelo = $9,
                plano = $10,
                quantidade = $11,
                link_cupom = $12,
                valor_bruto = $13,
                valor_liquido = $14,
                valor_desconto = $15,
                updated_at = $16,
                last_synced_at = $16
             WHERE yampi_order_id = $1
            "#,
        )
        .bind(provider_order_id)
        .bind(order.provider_order_number)
        .bind(&order.customer_name)
        .bind(&order.phone)
        .bind(&order.delivery_address)
        .bind(order.sold_at)
        .bind(&order.status)
        .bind(&order.payment_method)
        .bind(&order.model)
        .bind(&order.plan)
        .bind(order.quantity)
        .bind(&order.product_title)
        .bind(order.gross_amount)
        .bind(order.net_amount)
        .bind(order.discount_amount)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<Vec<Order>, StoreError> {
        let rows = list_query_builder(query).build().fetch_all(&self.pool).await?;
        let orders = rows.iter().map(order_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(orders)
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(order_from_row).transpose()?)
    }

    async fn apply_edit(&self, id: i64, edit: &OperatorEdit) -> Result<Option<Order>, StoreError> {
        let row = edit_query_builder(id, edit)
            .build()
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(order_from_row).transpose()?)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    rows: Vec<Order>,
}

/// In-process store with the same contract as [`PgOrderStore`], including the
/// provider-identifier uniqueness constraint. Used in tests.
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    state: Mutex<MemoryState>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn contains_ci(haystack: Option<&str>, needle_lower: &str) -> bool {
    haystack
        .map(|h| h.to_lowercase().contains(needle_lower))
        .unwrap_or(false)
}

fn matches_query(order: &Order, query: &OrderQuery) -> bool {
    if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let needle = q.to_lowercase();
        let hit = contains_ci(order.customer_name.as_deref(), &needle)
            || contains_ci(order.operator.cpf.as_deref(), &needle)
            || contains_ci(order.operator.cnpj.as_deref(), &needle)
            || contains_ci(order.phone.as_deref(), &needle);
        if !hit {
            return false;
        }
    }
    if let Some(method) = &query.payment_method {
        if order.payment_method.as_ref() != Some(method) {
            return false;
        }
    }
    if let Some(status) = &query.status {
        if order.status.as_ref() != Some(status) {
            return false;
        }
    }
    if query.date_from.is_some() || query.date_to.is_some() {
        let Some(sold_on) = order.sold_at.map(|dt| dt.date()) else {
            return false;
        };
        if query.date_from.is_some_and(|from| sold_on < from) {
            return false;
        }
        if query.date_to.is_some_and(|to| sold_on > to) {
            return false;
        }
    }
    true
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn find_id_by_provider_id(&self, provider_order_id: i64) -> Result<Option<i64>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .iter()
            .find(|o| o.provider_order_id == Some(provider_order_id))
            .map(|o| o.id))
    }

    async fn insert_synced(&self, order: &CanonicalOrder, now: DateTime<Utc>) -> Result<i64, StoreError> {
        let provider_order_id = order.provider_order_id.ok_or(StoreError::MissingProviderId)?;
        let mut state = self.state.lock().await;
        if state
            .rows
            .iter()
            .any(|o| o.provider_order_id == Some(provider_order_id))
        {
            return Err(StoreError::DuplicateProviderOrder(provider_order_id));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.rows.push(Order::from_synced(id, order, now));
        Ok(id)
    }

    async fn update_synced(&self, order: &CanonicalOrder, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let provider_order_id = order.provider_order_id.ok_or(StoreError::MissingProviderId)?;
        let mut state = self.state.lock().await;
        match state
            .rows
            .iter_mut()
            .find(|o| o.provider_order_id == Some(provider_order_id))
        {
            Some(row) => {
                row.apply_sync(order, now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock().await;
        let mut rows = state
            .rows
            .iter()
            .filter(|o| matches_query(o, query))
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| match (a.sold_at, b.sold_at) {
            (Some(x), Some(y)) => y.cmp(&x).then(b.id.cmp(&a.id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => b.id.cmp(&a.id),
        });
        Ok(rows)
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.rows.iter().find(|o| o.id == id).cloned())
    }

    async fn apply_edit(&self, id: i64, edit: &OperatorEdit) -> Result<Option<Order>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(row) = state.rows.iter_mut().find(|o| o.id == id) else {
            return Ok(None);
        };
        row.apply_edit(edit, Utc::now());
        Ok(Some(row.clone()))
    }
}
