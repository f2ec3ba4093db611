// Copyright (c) 2024 The Botho Foundation

//! SQLite store for addresses, balances, deposits, transfers and params.

use chrono::{DateTime, Utc};
use custody_core::{
    Address, Balance, Coins, Deposit, DepositStatus, KytStatus, ParamName, Transfer,
    TransferType, WalletVersion,
};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::{
    path::Path,
    str::FromStr,
    sync::{Arc, Mutex},
};

use crate::error::{Error, Result};

const DEPOSIT_COLUMNS: &str = "hash, from_address, lt, status, retries, next_retry, \
     from_user_friendly, to_user_friendly, amount, wc_block_number, shard, workchain, \
     kyt_status, created_at, last_updated_at";

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run database migrations.
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS param (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS address (
                address TEXT PRIMARY KEY,
                user_friendly_address TEXT NOT NULL UNIQUE,
                derivation_path TEXT NOT NULL UNIQUE,
                version INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS balance (
                address TEXT NOT NULL,
                currency TEXT NOT NULL,
                amount INTEGER NOT NULL DEFAULT 0,
                need_update INTEGER NOT NULL DEFAULT 1,
                last_updated_at INTEGER NOT NULL,
                PRIMARY KEY (address, currency)
            );

            CREATE INDEX IF NOT EXISTS idx_balance_need_update ON balance(need_update);

            CREATE TABLE IF NOT EXISTS deposit (
                hash TEXT NOT NULL,
                from_address TEXT NOT NULL,
                lt INTEGER NOT NULL,
                status TEXT NOT NULL,
                retries INTEGER NOT NULL DEFAULT 0,
                next_retry INTEGER,
                from_user_friendly TEXT NOT NULL,
                to_user_friendly TEXT NOT NULL,
                amount INTEGER NOT NULL,
                wc_block_number INTEGER NOT NULL,
                shard INTEGER NOT NULL,
                workchain INTEGER NOT NULL,
                kyt_status TEXT,
                created_at INTEGER NOT NULL,
                last_updated_at INTEGER NOT NULL,
                PRIMARY KEY (hash, from_address)
            );

            CREATE INDEX IF NOT EXISTS idx_deposit_hash ON deposit(hash);
            CREATE INDEX IF NOT EXISTS idx_deposit_status ON deposit(status);
            CREATE INDEX IF NOT EXISTS idx_deposit_kyt ON deposit(from_address, kyt_status);

            CREATE TABLE IF NOT EXISTS transfer (
                hash TEXT PRIMARY KEY,
                from_address TEXT NOT NULL,
                from_user_friendly TEXT NOT NULL,
                to_user_friendly TEXT NOT NULL,
                type TEXT NOT NULL,
                currency TEXT NOT NULL,
                amount INTEGER,
                created_at INTEGER NOT NULL,
                last_updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_transfer_created ON transfer(created_at);
            "#,
        )?;

        Ok(())
    }

    // ---- params ----

    pub fn get_param(&self, name: ParamName) -> Result<Option<String>> {
        let conn = self.conn.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM param WHERE name = ?1",
                params![name.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_param(&self, name: ParamName, value: &str) -> Result<()> {
        let conn = self.conn.lock()?;
        upsert_param(&conn, name, value)?;
        Ok(())
    }

    /// Store `value` only if the param is unset; returns the stored value.
    pub fn init_param(&self, name: ParamName, value: &str) -> Result<String> {
        let conn = self.conn.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO param (name, value) VALUES (?1, ?2)",
            params![name.as_str(), value],
        )?;
        let stored = conn.query_row(
            "SELECT value FROM param WHERE name = ?1",
            params![name.as_str()],
            |row| row.get(0),
        )?;
        Ok(stored)
    }

    /// Numeric param, `None` when unset.
    pub fn get_u32_param(&self, name: ParamName) -> Result<Option<u32>> {
        self.get_param(name)?
            .map(|v| {
                v.parse::<u32>().map_err(|e| Error::Corrupt {
                    column: name.as_str(),
                    value: v,
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    // ---- addresses ----

    /// Allocate the next derivation index and persist the derived address.
    ///
    /// `derive` receives the new index. The index bump and the address row
    /// commit together; if `derive` or either write fails, neither is kept.
    pub fn allocate_address<F>(&self, derive: F) -> Result<Address>
    where
        F: FnOnce(u32) -> Result<Address>,
    {
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction()?;

        let last: Option<String> = tx
            .query_row(
                "SELECT value FROM param WHERE name = ?1",
                params![ParamName::LastIndex.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let last: u32 = match last {
            Some(v) => v.parse().map_err(|e: std::num::ParseIntError| Error::Corrupt {
                column: ParamName::LastIndex.as_str(),
                value: v,
                reason: e.to_string(),
            })?,
            None => 0,
        };
        let next = last
            .checked_add(1)
            .ok_or_else(|| Error::Key("derivation index space exhausted".to_string()))?;

        let address = derive(next)?;
        insert_address(&tx, &address)?;
        upsert_param(&tx, ParamName::LastIndex, &next.to_string())?;
        tx.commit()?;

        Ok(address)
    }

    pub fn get_address(&self, address: &str) -> Result<Option<Address>> {
        let conn = self.conn.lock()?;
        let found = conn
            .query_row(
                "SELECT address, user_friendly_address, derivation_path, version, created_at
                 FROM address WHERE address = ?1",
                params![address],
                row_to_address,
            )
            .optional()?;
        Ok(found)
    }

    pub fn is_known_address(&self, address: &str) -> Result<bool> {
        let conn = self.conn.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM address WHERE address = ?1",
            params![address],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn count_addresses(&self) -> Result<i64> {
        let conn = self.conn.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM address", [], |row| row.get(0))?;
        Ok(count)
    }

    // ---- deposits ----

    /// Whether any deposit with this hash has been recorded.
    pub fn deposit_exists(&self, hash: &str) -> Result<bool> {
        let conn = self.conn.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM deposit WHERE hash = ?1",
            params![hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert a new deposit and mark the receiving balance dirty.
    ///
    /// Returns `false` without touching the balance if the deposit already
    /// exists.
    pub fn record_deposit(&self, deposit: &Deposit, currency: &str) -> Result<bool> {
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            &format!(
                "INSERT OR IGNORE INTO deposit ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                DEPOSIT_COLUMNS
            ),
            params![
                deposit.hash,
                deposit.from_address,
                deposit.lt as i64,
                deposit.status.as_str(),
                deposit.retries,
                deposit.next_retry.map(|t| t.timestamp_millis()),
                deposit.from_user_friendly,
                deposit.to_user_friendly,
                deposit.amount.nanos() as i64,
                deposit.wc_block_number,
                deposit.shard,
                deposit.workchain,
                deposit.kyt_status.map(|k| k.as_str()),
                deposit.created_at.timestamp_millis(),
                deposit.last_updated_at.timestamp_millis(),
            ],
        )? > 0;

        if inserted {
            mark_dirty(&tx, &deposit.from_address, currency)?;
        }
        tx.commit()?;

        Ok(inserted)
    }

    pub fn get_deposit(&self, hash: &str, from_address: &str) -> Result<Option<Deposit>> {
        let conn = self.conn.lock()?;
        let found = conn
            .query_row(
                &format!(
                    "SELECT {} FROM deposit WHERE hash = ?1 AND from_address = ?2",
                    DEPOSIT_COLUMNS
                ),
                params![hash, from_address],
                row_to_deposit,
            )
            .optional()?;
        Ok(found)
    }

    pub fn deposits_by_status(&self, status: DepositStatus) -> Result<Vec<Deposit>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM deposit WHERE status = ?1 ORDER BY created_at ASC, rowid ASC",
            DEPOSIT_COLUMNS
        ))?;
        let deposits = stmt
            .query_map(params![status.as_str()], row_to_deposit)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(deposits)
    }

    /// Deposits awaiting notification whose retry time has come, oldest first.
    pub fn deposits_due_for_notification(&self, now: DateTime<Utc>) -> Result<Vec<Deposit>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM deposit
             WHERE status IN (?1, ?2) AND (next_retry IS NULL OR next_retry <= ?3)
             ORDER BY created_at ASC, rowid ASC",
            DEPOSIT_COLUMNS
        ))?;
        let deposits = stmt
            .query_map(
                params![
                    DepositStatus::Confirmed.as_str(),
                    DepositStatus::NotifErr.as_str(),
                    now.timestamp_millis()
                ],
                row_to_deposit,
            )?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(deposits)
    }

    pub fn set_deposit_status(
        &self,
        hash: &str,
        from_address: &str,
        status: DepositStatus,
    ) -> Result<()> {
        let conn = self.conn.lock()?;
        conn.execute(
            "UPDATE deposit SET status = ?1, last_updated_at = ?2
             WHERE hash = ?3 AND from_address = ?4",
            params![
                status.as_str(),
                Utc::now().timestamp_millis(),
                hash,
                from_address
            ],
        )?;
        Ok(())
    }

    /// Record a successful notification.
    pub fn mark_notified(
        &self,
        hash: &str,
        from_address: &str,
        kyt_status: Option<KytStatus>,
    ) -> Result<()> {
        let conn = self.conn.lock()?;
        conn.execute(
            "UPDATE deposit SET status = ?1, next_retry = NULL, kyt_status = ?2, last_updated_at = ?3
             WHERE hash = ?4 AND from_address = ?5",
            params![
                DepositStatus::NotifOk.as_str(),
                kyt_status.map(|k| k.as_str()),
                Utc::now().timestamp_millis(),
                hash,
                from_address
            ],
        )?;
        Ok(())
    }

    /// Record a failed notification attempt with the next retry time, or
    /// `None` to give up for good.
    pub fn mark_notify_failure(
        &self,
        hash: &str,
        from_address: &str,
        retries: u32,
        next_retry: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let status = if next_retry.is_some() {
            DepositStatus::NotifErr
        } else {
            DepositStatus::NotifFailed
        };
        let conn = self.conn.lock()?;
        conn.execute(
            "UPDATE deposit SET status = ?1, retries = ?2, next_retry = ?3, last_updated_at = ?4
             WHERE hash = ?5 AND from_address = ?6",
            params![
                status.as_str(),
                retries,
                next_retry.map(|t| t.timestamp_millis()),
                Utc::now().timestamp_millis(),
                hash,
                from_address
            ],
        )?;
        Ok(())
    }

    /// Deposits received by `address` in the given screening state.
    pub fn deposits_with_kyt(&self, address: &str, kyt_status: KytStatus) -> Result<Vec<Deposit>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM deposit WHERE from_address = ?1 AND kyt_status = ?2
             ORDER BY created_at ASC, rowid ASC",
            DEPOSIT_COLUMNS
        ))?;
        let deposits = stmt
            .query_map(params![address, kyt_status.as_str()], row_to_deposit)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(deposits)
    }

    pub fn set_kyt_status(&self, hash: &str, from_address: &str, kyt_status: KytStatus) -> Result<()> {
        let conn = self.conn.lock()?;
        conn.execute(
            "UPDATE deposit SET kyt_status = ?1, last_updated_at = ?2
             WHERE hash = ?3 AND from_address = ?4",
            params![
                kyt_status.as_str(),
                Utc::now().timestamp_millis(),
                hash,
                from_address
            ],
        )?;
        Ok(())
    }

    /// Delete acknowledged deposits last touched before `before` whose
    /// screening is settled.
    pub fn purge_notified_deposits(&self, before: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock()?;
        let deleted = conn.execute(
            "DELETE FROM deposit
             WHERE status = ?1 AND last_updated_at < ?2
               AND (kyt_status IS NULL OR kyt_status IN (?3, ?4))",
            params![
                DepositStatus::NotifOk.as_str(),
                before.timestamp_millis(),
                KytStatus::Ok.as_str(),
                KytStatus::TransferredToQuarantine.as_str()
            ],
        )?;
        Ok(deleted)
    }

    pub fn deposit_counts(&self) -> Result<Vec<(DepositStatus, i64)>> {
        let conn = self.conn.lock()?;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM deposit GROUP BY status ORDER BY status")?;
        let counts = stmt
            .query_map([], |row| {
                let status: String = row.get(0)?;
                Ok((parse_column(0, "deposit.status", &status)?, row.get(1)?))
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(counts)
    }

    // ---- balances ----

    pub fn mark_balance_dirty(&self, address: &str, currency: &str) -> Result<()> {
        let conn = self.conn.lock()?;
        mark_dirty(&conn, address, currency)?;
        Ok(())
    }

    pub fn get_balance(&self, address: &str, currency: &str) -> Result<Option<Balance>> {
        let conn = self.conn.lock()?;
        let found = conn
            .query_row(
                "SELECT address, currency, amount, need_update, last_updated_at
                 FROM balance WHERE address = ?1 AND currency = ?2",
                params![address, currency],
                row_to_balance,
            )
            .optional()?;
        Ok(found)
    }

    pub fn dirty_balances(&self) -> Result<Vec<Balance>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            "SELECT address, currency, amount, need_update, last_updated_at
             FROM balance WHERE need_update = 1 ORDER BY last_updated_at ASC",
        )?;
        let balances = stmt
            .query_map([], row_to_balance)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(balances)
    }

    /// Fresh balances strictly above `threshold`.
    pub fn sweepable_balances(&self, threshold: Coins) -> Result<Vec<Balance>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            "SELECT address, currency, amount, need_update, last_updated_at
             FROM balance WHERE need_update = 0 AND amount > ?1 ORDER BY last_updated_at ASC",
        )?;
        let balances = stmt
            .query_map(params![threshold.nanos() as i64], row_to_balance)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(balances)
    }

    /// Store a freshly read on-chain amount and clear the dirty flag.
    pub fn update_balance(&self, address: &str, currency: &str, amount: Coins) -> Result<()> {
        let conn = self.conn.lock()?;
        conn.execute(
            "UPDATE balance SET amount = ?1, need_update = 0, last_updated_at = ?2
             WHERE address = ?3 AND currency = ?4",
            params![
                amount.nanos() as i64,
                Utc::now().timestamp_millis(),
                address,
                currency
            ],
        )?;
        Ok(())
    }

    // ---- transfers ----

    pub fn insert_transfer(&self, transfer: &Transfer) -> Result<()> {
        let conn = self.conn.lock()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO transfer (
                hash, from_address, from_user_friendly, to_user_friendly,
                type, currency, amount, created_at, last_updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                transfer.hash,
                transfer.from_address,
                transfer.from_user_friendly,
                transfer.to_user_friendly,
                transfer.transfer_type.as_str(),
                transfer.currency,
                transfer.amount.map(|a| a.nanos() as i64),
                transfer.created_at.timestamp_millis(),
                transfer.last_updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn get_transfer(&self, hash: &str) -> Result<Option<Transfer>> {
        let conn = self.conn.lock()?;
        let found = conn
            .query_row(
                "SELECT hash, from_address, from_user_friendly, to_user_friendly,
                        type, currency, amount, created_at, last_updated_at
                 FROM transfer WHERE hash = ?1",
                params![hash],
                row_to_transfer,
            )
            .optional()?;
        Ok(found)
    }

    pub fn transfers_from(&self, from_address: &str) -> Result<Vec<Transfer>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            "SELECT hash, from_address, from_user_friendly, to_user_friendly,
                    type, currency, amount, created_at, last_updated_at
             FROM transfer WHERE from_address = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let transfers = stmt
            .query_map(params![from_address], row_to_transfer)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(transfers)
    }

    pub fn purge_transfers(&self, before: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock()?;
        let deleted = conn.execute(
            "DELETE FROM transfer WHERE created_at < ?1",
            params![before.timestamp_millis()],
        )?;
        Ok(deleted)
    }
}

fn upsert_param(conn: &Connection, name: ParamName, value: &str) -> SqliteResult<usize> {
    conn.execute(
        "INSERT INTO param (name, value) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        params![name.as_str(), value],
    )
}

fn insert_address(conn: &Connection, address: &Address) -> SqliteResult<usize> {
    conn.execute(
        "INSERT INTO address (address, user_friendly_address, derivation_path, version, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            address.address,
            address.user_friendly_address,
            address.derivation_path,
            address.version.0,
            address.created_at.timestamp_millis(),
        ],
    )
}

fn mark_dirty(conn: &Connection, address: &str, currency: &str) -> SqliteResult<usize> {
    conn.execute(
        "INSERT INTO balance (address, currency, amount, need_update, last_updated_at)
         VALUES (?1, ?2, 0, 1, ?3)
         ON CONFLICT(address, currency) DO UPDATE SET need_update = 1, last_updated_at = ?3",
        params![address, currency, Utc::now().timestamp_millis()],
    )
}

/// A stored value that does not decode.
fn corrupt(
    idx: usize,
    column: &'static str,
    value: impl ToString,
    reason: impl ToString,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(Error::Corrupt {
            column,
            value: value.to_string(),
            reason: reason.to_string(),
        }),
    )
}

fn parse_column<T: FromStr<Err = String>>(
    idx: usize,
    column: &'static str,
    value: &str,
) -> SqliteResult<T> {
    value.parse().map_err(|e| corrupt(idx, column, value, e))
}

fn timestamp(idx: usize, column: &'static str, millis: i64) -> SqliteResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| corrupt(idx, column, millis, "timestamp out of range"))
}

fn coins(idx: usize, column: &'static str, nanos: i64) -> SqliteResult<Coins> {
    u64::try_from(nanos)
        .map(Coins::from_nanos)
        .map_err(|_| corrupt(idx, column, nanos, "negative amount"))
}

fn row_to_address(row: &Row<'_>) -> SqliteResult<Address> {
    Ok(Address {
        address: row.get(0)?,
        user_friendly_address: row.get(1)?,
        derivation_path: row.get(2)?,
        version: WalletVersion(row.get(3)?),
        created_at: timestamp(4, "address.created_at", row.get(4)?)?,
    })
}

fn row_to_balance(row: &Row<'_>) -> SqliteResult<Balance> {
    let amount: i64 = row.get(2)?;
    Ok(Balance {
        address: row.get(0)?,
        currency: row.get(1)?,
        amount: coins(2, "balance.amount", amount)?,
        need_update: row.get(3)?,
        last_updated_at: timestamp(4, "balance.last_updated_at", row.get(4)?)?,
    })
}

fn row_to_deposit(row: &Row<'_>) -> SqliteResult<Deposit> {
    let lt: i64 = row.get(2)?;
    let status: String = row.get(3)?;
    let next_retry: Option<i64> = row.get(5)?;
    let amount: i64 = row.get(8)?;
    let kyt_status: Option<String> = row.get(12)?;

    Ok(Deposit {
        hash: row.get(0)?,
        from_address: row.get(1)?,
        lt: lt as u64,
        status: parse_column(3, "deposit.status", &status)?,
        retries: row.get(4)?,
        next_retry: next_retry
            .map(|t| timestamp(5, "deposit.next_retry", t))
            .transpose()?,
        from_user_friendly: row.get(6)?,
        to_user_friendly: row.get(7)?,
        amount: coins(8, "deposit.amount", amount)?,
        wc_block_number: row.get(9)?,
        shard: row.get(10)?,
        workchain: row.get(11)?,
        kyt_status: kyt_status
            .map(|k| parse_column(12, "deposit.kyt_status", &k))
            .transpose()?,
        created_at: timestamp(13, "deposit.created_at", row.get(13)?)?,
        last_updated_at: timestamp(14, "deposit.last_updated_at", row.get(14)?)?,
    })
}

fn row_to_transfer(row: &Row<'_>) -> SqliteResult<Transfer> {
    let transfer_type: String = row.get(4)?;
    let amount: Option<i64> = row.get(6)?;
    Ok(Transfer {
        hash: row.get(0)?,
        from_address: row.get(1)?,
        from_user_friendly: row.get(2)?,
        to_user_friendly: row.get(3)?,
        transfer_type: parse_column::<TransferType>(4, "transfer.type", &transfer_type)?,
        currency: row.get(5)?,
        amount: amount
            .map(|a| coins(6, "transfer.amount", a))
            .transpose()?,
        created_at: timestamp(7, "transfer.created_at", row.get(7)?)?,
        last_updated_at: timestamp(8, "transfer.last_updated_at", row.get(8)?)?,
    })
}
