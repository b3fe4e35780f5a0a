// src/orders/store.rs
//! Persistent cache of conditional orders, behind a CRUD trait keyed by
//! the immutable order hash.

use crate::error::LiquidatorError;
use crate::orders::feed::FeedOrderRecord;
use crate::types::{OrderSide, OrderSummary, SignedOrder};
use async_trait::async_trait;
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Open = 0,
    Filled = 1,
    Failed = 2,
}

impl OrderStatus {
    fn from_i64(value: i64) -> Self {
        match value {
            1 => OrderStatus::Filled,
            2 => OrderStatus::Failed,
            _ => OrderStatus::Open,
        }
    }
}

/// Full persisted order record: the signed payload plus the decoded
/// trigger parameters and bookkeeping columns.
#[derive(Debug, Clone)]
pub struct PersistedOrder {
    pub order_hash: String,
    pub signed_order: SignedOrder,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub order_price: Decimal,
    pub oracle_address: String,
    pub base_token: String,
    pub quote_token: String,
    pub order_type: OrderSide,
    pub status: OrderStatus,
}

impl PersistedOrder {
    /// Build a record from an admitted feed order. Returns `None` when the
    /// record carries no trigger parameters (not a conditional order).
    pub fn from_feed_record(
        record: &FeedOrderRecord,
        base_token: &str,
        quote_token: &str,
        order_type: OrderSide,
    ) -> Option<Self> {
        Some(Self {
            order_hash: record.order_hash.clone(),
            signed_order: record.signed_order.clone(),
            min_price: record.min_price?,
            max_price: record.max_price?,
            order_price: record.price,
            oracle_address: record.oracle_address.clone()?,
            base_token: base_token.to_string(),
            quote_token: quote_token.to_string(),
            order_type,
            status: OrderStatus::Open,
        })
    }

    pub fn is_expired(&self, now_seconds: i64) -> bool {
        self.signed_order.expiration_time_seconds < Decimal::from(now_seconds)
    }

    pub fn to_summary(&self) -> OrderSummary {
        OrderSummary {
            base_token: self.base_token.clone(),
            quote_token: self.quote_token.clone(),
            min_price: self.min_price,
            max_price: self.max_price,
            order_price: self.order_price,
            maker_asset_amount: self.signed_order.maker_asset_amount,
            taker_asset_amount: self.signed_order.taker_asset_amount,
            taker_fee: self.signed_order.taker_fee,
            is_coordinated: self.signed_order.is_coordinated(),
            order_hash: self.order_hash.clone(),
            order_type: self.order_type,
        }
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Upsert by order hash; storing the same order twice is a no-op.
    async fn insert(&self, order: &PersistedOrder) -> Result<(), LiquidatorError>;
    async fn find_by_hash(&self, order_hash: &str)
        -> Result<Option<PersistedOrder>, LiquidatorError>;
    /// Open orders for one pair.
    async fn find_for_pair(
        &self,
        base_token: &str,
        quote_token: &str,
    ) -> Result<Vec<PersistedOrder>, LiquidatorError>;
    async fn find_all(&self) -> Result<Vec<PersistedOrder>, LiquidatorError>;
    /// Deleting an absent hash is a no-op.
    async fn delete(&self, order_hash: &str) -> Result<(), LiquidatorError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conditional_orders (
    order_hash TEXT PRIMARY KEY,
    chain_id INTEGER NOT NULL,
    exchange_address TEXT NOT NULL,
    maker_address TEXT NOT NULL,
    taker_address TEXT NOT NULL,
    fee_recipient_address TEXT NOT NULL,
    sender_address TEXT NOT NULL,
    maker_asset_amount TEXT NOT NULL,
    taker_asset_amount TEXT NOT NULL,
    maker_fee TEXT NOT NULL,
    taker_fee TEXT NOT NULL,
    expiration_time_seconds TEXT NOT NULL,
    salt TEXT NOT NULL,
    maker_asset_data TEXT NOT NULL,
    taker_asset_data TEXT NOT NULL,
    maker_fee_asset_data TEXT NOT NULL,
    taker_fee_asset_data TEXT NOT NULL,
    signature TEXT NOT NULL,
    min_price TEXT NOT NULL,
    max_price TEXT NOT NULL,
    order_price TEXT NOT NULL,
    oracle_address TEXT NOT NULL,
    base_token TEXT NOT NULL,
    quote_token TEXT NOT NULL,
    order_type INTEGER NOT NULL,
    status INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_conditional_orders_pair
    ON conditional_orders (base_token, quote_token);
";

const COLUMNS: &str = "order_hash, chain_id, exchange_address, maker_address, taker_address, \
    fee_recipient_address, sender_address, maker_asset_amount, taker_asset_amount, maker_fee, \
    taker_fee, expiration_time_seconds, salt, maker_asset_data, taker_asset_data, \
    maker_fee_asset_data, taker_fee_asset_data, signature, min_price, max_price, order_price, \
    oracle_address, base_token, quote_token, order_type, status";

/// Sqlite-backed store. Amount columns are stored as text to keep their
/// full precision.
pub struct SqliteOrderStore {
    conn: Mutex<Connection>,
}

impl SqliteOrderStore {
    pub fn open(db_path: &str) -> Result<Self, LiquidatorError> {
        let conn = Connection::open(db_path)
            .map_err(|e| LiquidatorError::StorageError(format!("open {}: {}", db_path, e)))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| LiquidatorError::StorageError(format!("schema: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn insert(&self, order: &PersistedOrder) -> Result<(), LiquidatorError> {
        let conn = self.conn.lock().await;
        let signed = &order.signed_order;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO conditional_orders ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
                 ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
                COLUMNS
            ),
            params![
                order.order_hash,
                signed.chain_id as i64,
                signed.exchange_address,
                signed.maker_address,
                signed.taker_address,
                signed.fee_recipient_address,
                signed.sender_address,
                signed.maker_asset_amount.to_string(),
                signed.taker_asset_amount.to_string(),
                signed.maker_fee.to_string(),
                signed.taker_fee.to_string(),
                signed.expiration_time_seconds.to_string(),
                signed.salt,
                signed.maker_asset_data,
                signed.taker_asset_data,
                signed.maker_fee_asset_data,
                signed.taker_fee_asset_data,
                signed.signature,
                order.min_price.to_string(),
                order.max_price.to_string(),
                order.order_price.to_string(),
                order.oracle_address,
                order.base_token,
                order.quote_token,
                order.order_type as i64,
                order.status as i64,
            ],
        )
        .map_err(|e| LiquidatorError::StorageError(format!("insert: {}", e)))?;
        Ok(())
    }

    async fn find_by_hash(
        &self,
        order_hash: &str,
    ) -> Result<Option<PersistedOrder>, LiquidatorError> {
        let conn = self.conn.lock().await;
        let mut statement = conn
            .prepare(&format!(
                "SELECT {} FROM conditional_orders WHERE order_hash = ?1",
                COLUMNS
            ))
            .map_err(|e| LiquidatorError::StorageError(format!("prepare: {}", e)))?;
        let mut rows = statement
            .query_map(params![order_hash], row_to_order)
            .map_err(|e| LiquidatorError::StorageError(format!("query: {}", e)))?;
        match rows.next() {
            Some(row) => Ok(Some(
                row.map_err(|e| LiquidatorError::StorageError(format!("row: {}", e)))?,
            )),
            None => Ok(None),
        }
    }

    async fn find_for_pair(
        &self,
        base_token: &str,
        quote_token: &str,
    ) -> Result<Vec<PersistedOrder>, LiquidatorError> {
        let conn = self.conn.lock().await;
        let mut statement = conn
            .prepare(&format!(
                "SELECT {} FROM conditional_orders \
                 WHERE base_token = ?1 AND quote_token = ?2 AND status = ?3",
                COLUMNS
            ))
            .map_err(|e| LiquidatorError::StorageError(format!("prepare: {}", e)))?;
        let rows = statement
            .query_map(
                params![base_token, quote_token, OrderStatus::Open as i64],
                row_to_order,
            )
            .map_err(|e| LiquidatorError::StorageError(format!("query: {}", e)))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| LiquidatorError::StorageError(format!("row: {}", e)))
    }

    async fn find_all(&self) -> Result<Vec<PersistedOrder>, LiquidatorError> {
        let conn = self.conn.lock().await;
        let mut statement = conn
            .prepare(&format!("SELECT {} FROM conditional_orders", COLUMNS))
            .map_err(|e| LiquidatorError::StorageError(format!("prepare: {}", e)))?;
        let rows = statement
            .query_map([], row_to_order)
            .map_err(|e| LiquidatorError::StorageError(format!("query: {}", e)))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| LiquidatorError::StorageError(format!("row: {}", e)))
    }

    async fn delete(&self, order_hash: &str) -> Result<(), LiquidatorError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM conditional_orders WHERE order_hash = ?1",
            params![order_hash],
        )
        .map_err(|e| LiquidatorError::StorageError(format!("delete: {}", e)))?;
        Ok(())
    }
}

fn row_to_order(row: &Row<'_>) -> rusqlite::Result<PersistedOrder> {
    let decimal = |index: usize| -> rusqlite::Result<Decimal> {
        let text: String = row.get(index)?;
        Decimal::from_str(&text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
    };

    Ok(PersistedOrder {
        order_hash: row.get(0)?,
        signed_order: SignedOrder {
            chain_id: row.get::<_, i64>(1)? as u64,
            exchange_address: row.get(2)?,
            maker_address: row.get(3)?,
            taker_address: row.get(4)?,
            fee_recipient_address: row.get(5)?,
            sender_address: row.get(6)?,
            maker_asset_amount: decimal(7)?,
            taker_asset_amount: decimal(8)?,
            maker_fee: decimal(9)?,
            taker_fee: decimal(10)?,
            expiration_time_seconds: decimal(11)?,
            salt: row.get(12)?,
            maker_asset_data: row.get(13)?,
            taker_asset_data: row.get(14)?,
            maker_fee_asset_data: row.get(15)?,
            taker_fee_asset_data: row.get(16)?,
            signature: row.get(17)?,
        },
        min_price: decimal(18)?,
        max_price: decimal(19)?,
        order_price: decimal(20)?,
        oracle_address: row.get(21)?,
        base_token: row.get(22)?,
        quote_token: row.get(23)?,
        order_type: if row.get::<_, i64>(24)? == OrderSide::Sell as i64 {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        },
        status: OrderStatus::from_i64(row.get(25)?),
    })
}

/// In-memory store used by tests and dry runs.
#[derive(Default)]
pub struct MemoryOrderStore {
    orders: Arc<RwLock<HashMap<String, PersistedOrder>>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: &PersistedOrder) -> Result<(), LiquidatorError> {
        self.orders
            .write()
            .await
            .insert(order.order_hash.clone(), order.clone());
        Ok(())
    }

    async fn find_by_hash(
        &self,
        order_hash: &str,
    ) -> Result<Option<PersistedOrder>, LiquidatorError> {
        Ok(self.orders.read().await.get(order_hash).cloned())
    }

    async fn find_for_pair(
        &self,
        base_token: &str,
        quote_token: &str,
    ) -> Result<Vec<PersistedOrder>, LiquidatorError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|o| {
                o.base_token == base_token
                    && o.quote_token == quote_token
                    && o.status == OrderStatus::Open
            })
            .cloned()
            .collect())
    }

    async fn find_all(&self) -> Result<Vec<PersistedOrder>, LiquidatorError> {
        Ok(self.orders.read().await.values().cloned().collect())
    }

    async fn delete(&self, order_hash: &str) -> Result<(), LiquidatorError> {
        self.orders.write().await.remove(order_hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::feed::test_fixtures::stop_limit_record;
    use pretty_assertions::assert_eq;

    fn persisted(order_hash: &str) -> PersistedOrder {
        PersistedOrder::from_feed_record(
            &stop_limit_record(order_hash),
            "DAI",
            "WETH",
            OrderSide::Buy,
        )
        .expect("record carries trigger parameters")
    }

    #[tokio::test]
    async fn sqlite_store_round_trips_orders() {
        let store = SqliteOrderStore::open(":memory:").expect("open");
        let order = persisted("0xabc1");
        store.insert(&order).await.unwrap();

        let loaded = store.find_by_hash("0xabc1").await.unwrap().expect("order");
        assert_eq!(loaded.order_hash, order.order_hash);
        assert_eq!(loaded.min_price, order.min_price);
        assert_eq!(loaded.max_price, order.max_price);
        assert_eq!(
            loaded.signed_order.maker_asset_amount,
            order.signed_order.maker_asset_amount
        );
        assert_eq!(loaded.order_type, OrderSide::Buy);
        assert_eq!(loaded.status, OrderStatus::Open);
    }

    #[tokio::test]
    async fn sqlite_insert_is_idempotent_by_hash() {
        let store = SqliteOrderStore::open(":memory:").expect("open");
        let order = persisted("0xabc2");
        store.insert(&order).await.unwrap();
        store.insert(&order).await.unwrap();
        assert_eq!(store.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn find_for_pair_excludes_other_pairs() {
        let store = SqliteOrderStore::open(":memory:").expect("open");
        store.insert(&persisted("0xabc3")).await.unwrap();

        let mut other = persisted("0xabc4");
        other.base_token = "WBTC".to_string();
        store.insert(&other).await.unwrap();

        let dai_orders = store.find_for_pair("DAI", "WETH").await.unwrap();
        assert_eq!(dai_orders.len(), 1);
        assert_eq!(dai_orders[0].order_hash, "0xabc3");
    }

    #[tokio::test]
    async fn delete_is_a_no_op_for_unknown_hashes() {
        let store = SqliteOrderStore::open(":memory:").expect("open");
        store.delete("0xmissing").await.unwrap();

        store.insert(&persisted("0xabc5")).await.unwrap();
        store.delete("0xabc5").await.unwrap();
        assert!(store.find_by_hash("0xabc5").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expiration_compares_against_seconds() {
        let order = persisted("0xabc6");
        assert!(!order.is_expired(1_700_000_000));
        assert!(order.is_expired(40_000_000_000));
    }

    #[tokio::test]
    async fn summary_projects_the_persisted_fields() {
        let order = persisted("0xabc7");
        let summary = order.to_summary();
        assert_eq!(summary.order_hash, "0xabc7");
        assert_eq!(summary.base_token, "DAI");
        assert_eq!(summary.order_type, OrderSide::Buy);
        assert!(!summary.is_coordinated);
    }
}
