use crate::payslip::{Category, LineItem, ParseResult, PayslipKind, Section};
use crate::settings::{Settings, SettingsStore};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, Row, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use time::Date;
use time::macros::format_description;
use tracing::{debug, info};

pub struct PayslipStore {
    conn: Connection,
}

/// One row of the `payslips` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredPayslip {
    pub id: i64,
    pub uid: String,
    pub filename: String,
    /// `YYYY-MM-DD`, first of the month for monthly slips.
    pub period: String,
    pub kind: PayslipKind,
    pub gross: Option<i64>,
    pub deduction: Option<i64>,
    pub net: Option<i64>,
    pub raw_text: String,
    pub warnings: Vec<String>,
    pub created_at: String,
}

/// A payslip together with its line items and attendance figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayslipDetail {
    #[serde(flatten)]
    pub payslip: StoredPayslip,
    pub items: Vec<LineItem>,
    pub attendance: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearSummary {
    pub year: String,
    pub count: i64,
    pub gross: i64,
    pub deduction: i64,
    pub net: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetStats {
    pub count: i64,
    pub average: Option<f64>,
    pub max: Option<i64>,
    pub min: Option<i64>,
}

/// Accepts `YYYY-MM-DD` or `YYYY-MM`; the latter means the first of the month.
pub fn parse_period(input: &str) -> Result<Date, time::error::Parse> {
    let input = input.trim();
    let full = if input.len() == 7 {
        format!("{input}-01")
    } else {
        input.to_string()
    };
    Date::parse(&full, format_description!("[year]-[month]-[day]"))
}

fn to_sql_error(e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(e))
}

fn from_sql_error(
    column: usize,
    e: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, e.into())
}

const PAYSLIP_COLUMNS: &str =
    "id, uid, filename, period, kind, gross, deduction, net, raw_text, warnings, created_at";

impl PayslipStore {
    /// Open (or create) the payslip database
    pub fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS payslips (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uid TEXT NOT NULL UNIQUE,
                filename TEXT NOT NULL,
                period TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'salary',
                gross INTEGER,
                deduction INTEGER,
                net INTEGER,
                raw_text TEXT NOT NULL,
                warnings TEXT NOT NULL DEFAULT '[]',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS payslip_items (
                payslip_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                amount INTEGER NOT NULL,
                category TEXT NOT NULL,
                section TEXT,
                PRIMARY KEY (payslip_id, position),
                FOREIGN KEY (payslip_id) REFERENCES payslips(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS attendance (
                payslip_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                value INTEGER NOT NULL,
                PRIMARY KEY (payslip_id, name),
                FOREIGN KEY (payslip_id) REFERENCES payslips(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_payslips_period ON payslips(period)",
            [],
        )?;

        info!("Database initialized successfully");
        Ok(Self { conn })
    }

    /// Stable identity of a document: the same file with the same text
    /// always hashes the same.
    pub fn generate_uid(filename: &str, raw_text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(filename.as_bytes());
        hasher.update(raw_text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Insert a parsed payslip, or update it in place when the same document
    /// was saved before. Items and attendance are replaced wholesale.
    pub fn save(
        &self,
        filename: &str,
        period: Date,
        kind: PayslipKind,
        result: &ParseResult,
    ) -> SqliteResult<i64> {
        let uid = Self::generate_uid(filename, &result.raw_text);
        let warnings = serde_json::to_string(&result.warnings).map_err(to_sql_error)?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO payslips
                (uid, filename, period, kind, gross, deduction, net, raw_text, warnings)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(uid) DO UPDATE SET
                period = excluded.period,
                kind = excluded.kind,
                gross = excluded.gross,
                deduction = excluded.deduction,
                net = excluded.net,
                warnings = excluded.warnings",
            params![
                uid,
                filename,
                period.to_string(),
                kind.as_str(),
                result.gross_amount,
                result.deduction_amount,
                result.net_amount,
                result.raw_text,
                warnings,
            ],
        )?;
        let id: i64 = tx.query_row(
            "SELECT id FROM payslips WHERE uid = ?1",
            params![uid],
            |row| row.get(0),
        )?;

        tx.execute("DELETE FROM payslip_items WHERE payslip_id = ?1", params![id])?;
        tx.execute("DELETE FROM attendance WHERE payslip_id = ?1", params![id])?;
        {
            let mut insert_item = tx.prepare(
                "INSERT INTO payslip_items (payslip_id, position, name, amount, category, section)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (position, item) in result.items.iter().enumerate() {
                insert_item.execute(params![
                    id,
                    position as i64,
                    item.name,
                    item.amount,
                    item.category.as_str(),
                    item.section.map(|s| s.as_str()),
                ])?;
            }

            let mut insert_attendance = tx.prepare(
                "INSERT INTO attendance (payslip_id, name, value) VALUES (?1, ?2, ?3)",
            )?;
            for (name, value) in &result.attendance {
                insert_attendance.execute(params![id, name, value])?;
            }
        }
        tx.commit()?;

        info!(
            id,
            filename,
            items = result.items.len(),
            "Payslip stored"
        );
        Ok(id)
    }

    fn row_to_payslip(row: &Row<'_>) -> SqliteResult<StoredPayslip> {
        let kind: String = row.get(4)?;
        let warnings: String = row.get(9)?;
        Ok(StoredPayslip {
            id: row.get(0)?,
            uid: row.get(1)?,
            filename: row.get(2)?,
            period: row.get(3)?,
            kind: kind.parse().map_err(|e: String| from_sql_error(4, e))?,
            gross: row.get(5)?,
            deduction: row.get(6)?,
            net: row.get(7)?,
            raw_text: row.get(8)?,
            warnings: serde_json::from_str(&warnings).map_err(|e| from_sql_error(9, e))?,
            created_at: row.get(10)?,
        })
    }

    /// All payslips, newest period first.
    pub fn list(&self) -> SqliteResult<Vec<StoredPayslip>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PAYSLIP_COLUMNS} FROM payslips ORDER BY period DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], Self::row_to_payslip)?;
        rows.collect()
    }

    pub fn get(&self, id: i64) -> SqliteResult<Option<PayslipDetail>> {
        let payslip = self
            .conn
            .query_row(
                &format!("SELECT {PAYSLIP_COLUMNS} FROM payslips WHERE id = ?1"),
                params![id],
                Self::row_to_payslip,
            )
            .optional()?;
        match payslip {
            Some(payslip) => Ok(Some(self.with_details(payslip)?)),
            None => Ok(None),
        }
    }

    fn with_details(&self, payslip: StoredPayslip) -> SqliteResult<PayslipDetail> {
        let mut stmt = self.conn.prepare(
            "SELECT name, amount, category, section
             FROM payslip_items
             WHERE payslip_id = ?1
             ORDER BY position",
        )?;
        let items = stmt
            .query_map(params![payslip.id], |row| {
                let category: String = row.get(2)?;
                let section: Option<String> = row.get(3)?;
                Ok(LineItem {
                    name: row.get(0)?,
                    amount: row.get(1)?,
                    category: category
                        .parse::<Category>()
                        .map_err(|e| from_sql_error(2, e))?,
                    section: section
                        .map(|s| s.parse::<Section>())
                        .transpose()
                        .map_err(|e| from_sql_error(3, e))?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        let mut stmt = self
            .conn
            .prepare("SELECT name, value FROM attendance WHERE payslip_id = ?1")?;
        let attendance = stmt
            .query_map(params![payslip.id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<SqliteResult<BTreeMap<String, i64>>>()?;

        Ok(PayslipDetail {
            payslip,
            items,
            attendance,
        })
    }

    /// Returns whether a payslip was removed. Items and attendance go with it.
    pub fn delete(&self, id: i64) -> SqliteResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM payslips WHERE id = ?1", params![id])?;
        debug!(id, removed, "Payslip delete");
        Ok(removed > 0)
    }

    /// Totals per calendar year of the payslip period.
    pub fn summary_by_year(&self) -> SqliteResult<Vec<YearSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT substr(period, 1, 4) AS year,
                    COUNT(*),
                    COALESCE(SUM(gross), 0),
                    COALESCE(SUM(deduction), 0),
                    COALESCE(SUM(net), 0)
             FROM payslips
             GROUP BY year
             ORDER BY year",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(YearSummary {
                year: row.get(0)?,
                count: row.get(1)?,
                gross: row.get(2)?,
                deduction: row.get(3)?,
                net: row.get(4)?,
            })
        })?;
        rows.collect()
    }

    pub fn net_stats(&self) -> SqliteResult<NetStats> {
        self.conn.query_row(
            "SELECT COUNT(*), AVG(net), MAX(net), MIN(net) FROM payslips",
            [],
            |row| {
                Ok(NetStats {
                    count: row.get(0)?,
                    average: row.get(1)?,
                    max: row.get(2)?,
                    min: row.get(3)?,
                })
            },
        )
    }

    /// Every payslip with its details, oldest period first.
    pub fn export(&self) -> SqliteResult<Vec<PayslipDetail>> {
        let mut payslips = self.list()?;
        payslips.reverse();
        payslips
            .into_iter()
            .map(|payslip| self.with_details(payslip))
            .collect()
    }
}

impl SettingsStore for PayslipStore {
    type Error = rusqlite::Error;

    /// Each top-level settings field is one row; missing rows take defaults.
    fn load_settings(&self) -> SqliteResult<Settings> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM settings")?;
        let fields = stmt
            .query_map([], |row| {
                let key: String = row.get(0)?;
                let value: String = row.get(1)?;
                let value: serde_json::Value =
                    serde_json::from_str(&value).map_err(|e| from_sql_error(1, e))?;
                Ok((key, value))
            })?
            .collect::<SqliteResult<serde_json::Map<String, serde_json::Value>>>()?;

        serde_json::from_value(serde_json::Value::Object(fields)).map_err(|e| from_sql_error(1, e))
    }

    fn save_settings(&self, settings: &Settings) -> SqliteResult<()> {
        let serde_json::Value::Object(fields) =
            serde_json::to_value(settings).map_err(to_sql_error)?
        else {
            return Err(rusqlite::Error::ToSqlConversionFailure(
                "settings did not serialize to an object".into(),
            ));
        };

        let tx = self.conn.unchecked_transaction()?;
        for (key, value) in fields {
            tx.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value.to_string()],
            )?;
        }
        tx.commit()?;
        debug!("Settings saved");
        Ok(())
    }
}
