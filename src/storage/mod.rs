//! Persistence layer.
//!
//! SQLite via `sqlx`: token configuration, token wallets, and the swap
//! history written by running jobs. Swaps are keyed by
//! `(tx_hash, log_index)`; writing the same swap twice only refreshes its
//! job tag.

pub mod schema;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::types::{
    normalize_address, EngineError, SwapRecord, TokenConfig, TokenWalletView, WalletCapability,
    WalletRecord,
};

/// Default page size for swap history queries.
const DEFAULT_TAKE: u32 = 100;
/// Upper bound on a single swap history page.
const MAX_TAKE: u32 = 1000;

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Filters and paging for swap history.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapQuery {
    pub take: Option<u32>,
    pub skip: Option<u32>,
    pub is_buy: Option<bool>,
    pub job_id: Option<String>,
}

/// Idempotent swap persistence.
#[async_trait]
pub trait SwapStore: Send + Sync {
    /// Insert the swap, or update the job tag if the key already exists.
    /// Returns the stored row.
    async fn upsert_swap(&self, record: &SwapRecord) -> Result<SwapRecord>;

    /// Swaps for a token, newest block first.
    async fn list_swaps(&self, token: &str, query: &SwapQuery) -> Result<Vec<SwapRecord>>;
}

/// Read access to token configuration for the engine.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn token(&self, address: &str) -> Result<Option<TokenConfig>>;

    /// Every wallet assigned to the token, with key material.
    async fn token_wallets(&self, token: &str) -> Result<Vec<Arc<WalletRecord>>>;
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewToken {
    pub address: String,
    pub chain_id: String,
    pub fee: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWallet {
    pub address: String,
    pub private_key: String,
    pub buyable: bool,
    pub sellable: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTokenWallets {
    pub token_address: String,
    pub wallets: Vec<NewWallet>,
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

fn storage(e: sqlx::Error) -> EngineError {
    EngineError::Storage(e.to_string())
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

fn token_from_row(row: &SqliteRow) -> TokenConfig {
    let invested: String = row.get("invested_eth");
    let created: String = row.get("created_at");
    let updated: String = row.get("updated_at");
    TokenConfig {
        address: row.get("address"),
        chain_id: row.get("chain_id"),
        fee: row.get("fee"),
        enabled: row.get("enabled"),
        invested_eth: Decimal::from_str(&invested).unwrap_or_default(),
        created_at: parse_time(&created),
        updated_at: parse_time(&updated),
    }
}

fn token_wallet_from_row(row: &SqliteRow) -> TokenWalletView {
    let created: String = row.get("created_at");
    TokenWalletView {
        wallet_address: row.get("wallet_address"),
        token_address: row.get("token_address"),
        buyable: row.get("buyable"),
        sellable: row.get("sellable"),
        created_at: parse_time(&created),
    }
}

fn swap_from_row(row: &SqliteRow) -> SwapRecord {
    let block: i64 = row.get("block_number");
    SwapRecord {
        tx_hash: row.get("tx_hash"),
        log_index: row.get("log_index"),
        job_id: row.get("job_id"),
        is_buy: row.get("is_buy"),
        token_address: row.get("token_address"),
        chain_id: row.get("chain_id"),
        block_number: u64::try_from(block).unwrap_or_default(),
        token_amount: row.get("token_amount"),
        eth_amount: row.get("eth_amount"),
        sender: row.get("sender"),
        recipient: row.get("recipient"),
        amount0: row.get("amount0"),
        amount1: row.get("amount1"),
        sqrt_price_x96: row.get("sqrt_price_x96"),
        liquidity: row.get("liquidity"),
        tick: row.get("tick"),
    }
}

impl Database {
    /// Connect and create the schema if needed.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database url: {database_url}"))?
            .create_if_missing(true);

        // in-memory databases are per connection
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        schema::create_tables(&pool)
            .await
            .context("Failed to create database schema")?;

        info!(url = database_url, "Database ready");
        Ok(Self { pool })
    }

    // -- tokens -------------------------------------------------------------

    pub async fn create_token(&self, new: &NewToken) -> Result<TokenConfig, EngineError> {
        let address = normalize_address(&new.address);
        if address.is_empty() || new.chain_id.trim().is_empty() {
            return Err(EngineError::InvalidParams("address and chainId are required".into()));
        }
        let now = Utc::now().to_rfc3339();

        let row = sqlx::query(
            r#"
            INSERT INTO bot_tokens (address, chain_id, fee, enabled, invested_eth, created_at, updated_at)
            VALUES (?, ?, ?, 1, '0', ?, ?)
            ON CONFLICT(address) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&address)
        .bind(new.chain_id.trim())
        .bind(new.fee)
        .bind(&now)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        match row {
            Some(row) => {
                info!(token = %address, chain_id = %new.chain_id, fee = new.fee, "Token registered");
                Ok(token_from_row(&row))
            }
            None => Err(EngineError::InvalidParams(format!("Token {address} already exists"))),
        }
    }

    pub async fn list_tokens(&self) -> Result<Vec<TokenConfig>, EngineError> {
        let rows = sqlx::query("SELECT * FROM bot_tokens ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        Ok(rows.iter().map(token_from_row).collect())
    }

    pub async fn get_token(&self, address: &str) -> Result<TokenConfig, EngineError> {
        let address = normalize_address(address);
        sqlx::query("SELECT * FROM bot_tokens WHERE address = ?")
            .bind(&address)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .map(|row| token_from_row(&row))
            .ok_or(EngineError::TokenNotFound(address))
    }

    pub async fn toggle_token_enabled(&self, address: &str) -> Result<TokenConfig, EngineError> {
        let address = normalize_address(address);
        sqlx::query(
            "UPDATE bot_tokens SET enabled = NOT enabled, updated_at = ? WHERE address = ? RETURNING *",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&address)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?
        .map(|row| token_from_row(&row))
        .ok_or(EngineError::TokenNotFound(address))
    }

    pub async fn update_invested_eth(
        &self,
        address: &str,
        invested_eth: Decimal,
    ) -> Result<TokenConfig, EngineError> {
        if invested_eth.is_sign_negative() {
            return Err(EngineError::InvalidParams("investedEth must not be negative".into()));
        }
        let address = normalize_address(address);
        sqlx::query("UPDATE bot_tokens SET invested_eth = ?, updated_at = ? WHERE address = ? RETURNING *")
            .bind(invested_eth.normalize().to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(&address)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .map(|row| token_from_row(&row))
            .ok_or(EngineError::TokenNotFound(address))
    }

    // -- wallets ------------------------------------------------------------

    /// Register wallets for a token. Existing keys and assignments are left
    /// untouched; only newly created assignments are returned.
    pub async fn create_token_wallets(
        &self,
        req: &NewTokenWallets,
    ) -> Result<Vec<TokenWalletView>, EngineError> {
        let token = self.get_token(&req.token_address).await?.address;
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await.map_err(storage)?;
        let mut created = Vec::new();
        for wallet in &req.wallets {
            let address = normalize_address(&wallet.address);
            if address.is_empty() {
                return Err(EngineError::InvalidParams("wallet address is required".into()));
            }

            sqlx::query(
                "INSERT INTO bot_wallets (address, private_key, created_at) VALUES (?, ?, ?)
                 ON CONFLICT(address) DO NOTHING",
            )
            .bind(&address)
            .bind(&wallet.private_key)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

            let row = sqlx::query(
                r#"
                INSERT INTO bot_token_wallets (token_address, wallet_address, buyable, sellable, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(token_address, wallet_address) DO NOTHING
                RETURNING *
                "#,
            )
            .bind(&token)
            .bind(&address)
            .bind(wallet.buyable)
            .bind(wallet.sellable)
            .bind(&now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?;

            if let Some(row) = row {
                created.push(token_wallet_from_row(&row));
            }
        }
        tx.commit().await.map_err(storage)?;

        info!(token = %token, requested = req.wallets.len(), created = created.len(), "Token wallets registered");
        Ok(created)
    }

    pub async fn list_token_wallets(&self, token: &str) -> Result<Vec<TokenWalletView>, EngineError> {
        let rows = sqlx::query(
            "SELECT * FROM bot_token_wallets WHERE token_address = ? ORDER BY created_at ASC, wallet_address ASC",
        )
        .bind(normalize_address(token))
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        Ok(rows.iter().map(token_wallet_from_row).collect())
    }
}

#[async_trait]
impl SwapStore for Database {
    async fn upsert_swap(&self, r: &SwapRecord) -> Result<SwapRecord> {
        let block = i64::try_from(r.block_number).context("block number out of range")?;
        let row = sqlx::query(
            r#"
            INSERT INTO token_swaps (
                tx_hash, log_index, job_id, is_buy, token_address, chain_id, block_number,
                token_amount, eth_amount, sender, recipient, amount0, amount1,
                sqrt_price_x96, liquidity, tick, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_hash, log_index) DO UPDATE SET job_id = excluded.job_id
            RETURNING *
            "#,
        )
        .bind(&r.tx_hash)
        .bind(r.log_index)
        .bind(&r.job_id)
        .bind(r.is_buy)
        .bind(&r.token_address)
        .bind(&r.chain_id)
        .bind(block)
        .bind(&r.token_amount)
        .bind(&r.eth_amount)
        .bind(&r.sender)
        .bind(&r.recipient)
        .bind(&r.amount0)
        .bind(&r.amount1)
        .bind(&r.sqrt_price_x96)
        .bind(&r.liquidity)
        .bind(r.tick)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to store swap {}#{}", r.tx_hash, r.log_index))?;

        debug!(tx_hash = %r.tx_hash, log_index = r.log_index, "Swap stored");
        Ok(swap_from_row(&row))
    }

    async fn list_swaps(&self, token: &str, query: &SwapQuery) -> Result<Vec<SwapRecord>> {
        let take = query.take.unwrap_or(DEFAULT_TAKE).min(MAX_TAKE);
        let skip = query.skip.unwrap_or(0);
        let rows = sqlx::query(
            r#"
            SELECT * FROM token_swaps
            WHERE token_address = ?1
              AND (?2 IS NULL OR is_buy = ?2)
              AND (?3 IS NULL OR job_id = ?3)
            ORDER BY block_number DESC, log_index DESC
            LIMIT ?4 OFFSET ?5
            "#,
        )
        .bind(normalize_address(token))
        .bind(query.is_buy)
        .bind(&query.job_id)
        .bind(take)
        .bind(skip)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query swaps")?;
        Ok(rows.iter().map(swap_from_row).collect())
    }
}

#[async_trait]
impl ConfigSource for Database {
    async fn token(&self, address: &str) -> Result<Option<TokenConfig>> {
        match self.get_token(address).await {
            Ok(token) => Ok(Some(token)),
            Err(EngineError::TokenNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn token_wallets(&self, token: &str) -> Result<Vec<Arc<WalletRecord>>> {
        let rows = sqlx::query(
            r#"
            SELECT tw.wallet_address, tw.buyable, tw.sellable, w.private_key
            FROM bot_token_wallets tw
            JOIN bot_wallets w ON w.address = tw.wallet_address
            WHERE tw.token_address = ?
            ORDER BY tw.created_at ASC, tw.wallet_address ASC
            LIMIT 1000
            "#,
        )
        .bind(normalize_address(token))
        .fetch_all(&self.pool)
        .await
        .context("Failed to load token wallets")?;

        Ok(rows
            .iter()
            .map(|row| {
                let address: String = row.get("wallet_address");
                let capability = WalletCapability {
                    buyable: row.get("buyable"),
                    sellable: row.get("sellable"),
                };
                Arc::new(WalletRecord::new(&address, row.get("private_key"), capability))
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use secrecy::ExposeSecret;

    async fn db() -> Database {
        Database::connect("sqlite::memory:").await.unwrap()
    }

    fn new_token(address: &str) -> NewToken {
        NewToken { address: address.into(), chain_id: "2741".into(), fee: 10_000 }
    }

    fn swap(tx: &str, index: u32, block: u64, is_buy: bool, job: Option<&str>) -> SwapRecord {
        SwapRecord {
            tx_hash: tx.into(),
            log_index: index,
            job_id: job.map(String::from),
            is_buy,
            token_address: "0xtoken".into(),
            chain_id: "2741".into(),
            block_number: block,
            token_amount: "5000000000000000000000".into(),
            eth_amount: "1000000000000000".into(),
            sender: "0xrouter".into(),
            recipient: "0xwallet".into(),
            amount0: "-5000000000000000000000".into(),
            amount1: "1000000000000000".into(),
            sqrt_price_x96: "79228162514264337593543950336".into(),
            liquidity: "340282366920938463463374607431768211455".into(),
            tick: -276_325,
        }
    }

    #[tokio::test]
    async fn test_token_crud() {
        let db = db().await;
        let created = db.create_token(&new_token("0xTOKEN")).await.unwrap();
        assert_eq!(created.address, "0xtoken");
        assert!(created.enabled);
        assert_eq!(created.invested_eth, Decimal::ZERO);

        let dup = db.create_token(&new_token("0xtoken")).await.unwrap_err();
        assert!(matches!(dup, EngineError::InvalidParams(_)));

        let toggled = db.toggle_token_enabled("0xToken").await.unwrap();
        assert!(!toggled.enabled);

        let updated = db.update_invested_eth("0xtoken", dec!(1.25)).await.unwrap();
        assert_eq!(updated.invested_eth, dec!(1.25));
        assert!(db.update_invested_eth("0xtoken", dec!(-1)).await.is_err());

        assert_eq!(db.list_tokens().await.unwrap().len(), 1);
        assert!(matches!(db.get_token("0xnope").await, Err(EngineError::TokenNotFound(_))));
        assert!(db.token("0xnope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_token_wallets() {
        let db = db().await;
        db.create_token(&new_token("0xtoken")).await.unwrap();

        let req = NewTokenWallets {
            token_address: "0xtoken".into(),
            wallets: vec![
                NewWallet { address: "0xA".into(), private_key: "k1".into(), buyable: true, sellable: false },
                NewWallet { address: "0xB".into(), private_key: "k2".into(), buyable: true, sellable: true },
            ],
        };
        let created = db.create_token_wallets(&req).await.unwrap();
        assert_eq!(created.len(), 2);

        // re-registering is a no-op
        assert!(db.create_token_wallets(&req).await.unwrap().is_empty());
        assert_eq!(db.list_token_wallets("0xTOKEN").await.unwrap().len(), 2);

        let records = db.token_wallets("0xtoken").await.unwrap();
        assert_eq!(records.len(), 2);
        let a = records.iter().find(|w| w.address == "0xa").unwrap();
        assert!(a.capability.buyable && !a.capability.sellable);
        assert_eq!(a.private_key.expose_secret(), "k1");

        let missing = NewTokenWallets { token_address: "0xnope".into(), wallets: vec![] };
        assert!(matches!(
            db.create_token_wallets(&missing).await,
            Err(EngineError::TokenNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_swap_is_idempotent() {
        let db = db().await;
        let first = db.upsert_swap(&swap("0xtx", 2, 10, true, Some("job-a"))).await.unwrap();
        assert_eq!(first.job_id.as_deref(), Some("job-a"));

        // same key, different tag: one row, latest tag, amounts untouched
        let mut again = swap("0xtx", 2, 10, true, Some("job-b"));
        again.eth_amount = "1".into();
        let second = db.upsert_swap(&again).await.unwrap();
        assert_eq!(second.job_id.as_deref(), Some("job-b"));
        assert_eq!(second.eth_amount, "1000000000000000");

        let all = db.list_swaps("0xtoken", &SwapQuery::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].liquidity, "340282366920938463463374607431768211455");
        assert_eq!(all[0].tick, -276_325);
    }

    #[tokio::test]
    async fn test_list_swaps_order_paging_filters() {
        let db = db().await;
        db.upsert_swap(&swap("0x1", 0, 5, true, Some("a"))).await.unwrap();
        db.upsert_swap(&swap("0x2", 0, 7, false, Some("a"))).await.unwrap();
        db.upsert_swap(&swap("0x3", 0, 6, true, Some("b"))).await.unwrap();

        let all = db.list_swaps("0xToken", &SwapQuery::default()).await.unwrap();
        let blocks: Vec<u64> = all.iter().map(|s| s.block_number).collect();
        assert_eq!(blocks, vec![7, 6, 5]);

        let page = SwapQuery { take: Some(1), skip: Some(1), ..SwapQuery::default() };
        let page = db.list_swaps("0xtoken", &page).await.unwrap();
        assert_eq!(page[0].tx_hash, "0x3");

        let buys = SwapQuery { is_buy: Some(true), ..SwapQuery::default() };
        assert_eq!(db.list_swaps("0xtoken", &buys).await.unwrap().len(), 2);

        let job_a = SwapQuery { job_id: Some("a".into()), ..SwapQuery::default() };
        assert_eq!(db.list_swaps("0xtoken", &job_a).await.unwrap().len(), 2);

        assert!(db.list_swaps("0xother", &SwapQuery::default()).await.unwrap().is_empty());
    }
}
