//! Database schema creation.

use sqlx::{Pool, Sqlite};

const STATEMENTS: &[&str] = &[
    // Tokens the bot may trade
    "CREATE TABLE IF NOT EXISTS bot_tokens (
        address TEXT PRIMARY KEY NOT NULL,
        chain_id TEXT NOT NULL,
        fee INTEGER NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        invested_eth TEXT NOT NULL DEFAULT '0',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    // Wallet key material, shared across tokens
    "CREATE TABLE IF NOT EXISTS bot_wallets (
        address TEXT PRIMARY KEY NOT NULL,
        private_key TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    // Token <-> wallet assignment with per-side capability
    "CREATE TABLE IF NOT EXISTS bot_token_wallets (
        token_address TEXT NOT NULL,
        wallet_address TEXT NOT NULL,
        buyable INTEGER NOT NULL,
        sellable INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (token_address, wallet_address),
        FOREIGN KEY (token_address) REFERENCES bot_tokens(address),
        FOREIGN KEY (wallet_address) REFERENCES bot_wallets(address)
    )",
    // Executed swaps; amounts are decimal strings
    "CREATE TABLE IF NOT EXISTS token_swaps (
        tx_hash TEXT NOT NULL,
        log_index INTEGER NOT NULL,
        job_id TEXT,
        is_buy INTEGER NOT NULL,
        token_address TEXT NOT NULL,
        chain_id TEXT NOT NULL,
        block_number INTEGER NOT NULL,
        token_amount TEXT NOT NULL,
        eth_amount TEXT NOT NULL,
        sender TEXT NOT NULL,
        recipient TEXT NOT NULL,
        amount0 TEXT NOT NULL,
        amount1 TEXT NOT NULL,
        sqrt_price_x96 TEXT NOT NULL,
        liquidity TEXT NOT NULL,
        tick INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (tx_hash, log_index)
    )",
    "CREATE INDEX IF NOT EXISTS idx_token_swaps_token_block
        ON token_swaps(token_address, block_number DESC)",
    "CREATE INDEX IF NOT EXISTS idx_token_swaps_job ON token_swaps(job_id)",
];

/// Create all tables and indexes. Safe to run on every connect.
pub async fn create_tables(pool: &Pool<Sqlite>) -> Result<(), sqlx::Error> {
    for stmt in STATEMENTS {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}
