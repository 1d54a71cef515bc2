#![allow(clippy::missing_errors_doc)]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use powerball_core::{
    format_draw_date, parse_draw_date, Combination, Draw, DrawConflict, DrawDate, DrawInput,
    Frequency, MainNumbers,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};
use tracing::debug;

const DRAWS_MIGRATION_VERSION: i64 = 1;

pub const MAIN_NUMBERS_INDEX: &str = "idx_main_numbers";

const MAIN_NUMBER_COLUMNS: [&str; 5] = [
    "main_num1",
    "main_num2",
    "main_num3",
    "main_num4",
    "main_num5",
];

const SCHEMA_DRAWS_V1: &str = r"
CREATE TABLE IF NOT EXISTS dates (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  draw_date TEXT NOT NULL UNIQUE,
  is_powerball_plus INTEGER NOT NULL CHECK (is_powerball_plus IN (0, 1)),
  draw_sequence_num INTEGER UNIQUE
);

CREATE TABLE IF NOT EXISTS draws (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  date_id INTEGER NOT NULL UNIQUE,
  main_num1 INTEGER NOT NULL CHECK (main_num1 BETWEEN 1 AND 50),
  main_num2 INTEGER NOT NULL CHECK (main_num2 BETWEEN 1 AND 50),
  main_num3 INTEGER NOT NULL CHECK (main_num3 BETWEEN 1 AND 50),
  main_num4 INTEGER NOT NULL CHECK (main_num4 BETWEEN 1 AND 50),
  main_num5 INTEGER NOT NULL CHECK (main_num5 BETWEEN 1 AND 50),
  powerball_num INTEGER NOT NULL CHECK (powerball_num BETWEEN 1 AND 20),
  CHECK (
    main_num1 < main_num2
    AND main_num2 < main_num3
    AND main_num3 < main_num4
    AND main_num4 < main_num5
  ),
  FOREIGN KEY (date_id) REFERENCES dates(id) ON DELETE CASCADE
);

CREATE TRIGGER IF NOT EXISTS trg_draws_no_update
BEFORE UPDATE ON draws
BEGIN
  SELECT RAISE(FAIL, 'draws rows are immutable');
END;

CREATE INDEX IF NOT EXISTS idx_main_numbers
  ON draws(main_num1, main_num2, main_num3, main_num4, main_num5);
";

pub struct SqliteDrawStore {
    conn: Connection,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct StoreStats {
    pub total_draws: u64,
    pub total_dates: u64,
    pub max_draw_sequence_num: u32,
}

impl SqliteDrawStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Creates both tables, the immutability trigger and the composite index.
    ///
    /// Safe to call on every startup.
    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_DRAWS_V1)
            .context("failed to apply draws schema")?;

        let now = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .context("failed to format migration timestamp")?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![DRAWS_MIGRATION_VERSION, now],
            )
            .context("failed to register draws schema migration")?;

        ensure_main_numbers_index(&self.conn)?;
        debug!(version = DRAWS_MIGRATION_VERSION, "draws schema ready");
        Ok(())
    }

    /// Inserts a `dates` row. Fails on a repeated `draw_date` or sequence number.
    pub fn insert_date(
        &self,
        draw_date: Date,
        is_powerball_plus: bool,
        draw_sequence_num: Option<u32>,
    ) -> Result<DrawDate> {
        insert_date_row(&self.conn, draw_date, is_powerball_plus, draw_sequence_num)
    }

    /// Inserts the numbers row for an existing `dates` row and returns its id.
    ///
    /// A second call for the same `date_id` fails on the unique foreign key.
    pub fn insert_numbers(&self, date_id: i64, main: MainNumbers, powerball: u8) -> Result<i64> {
        insert_numbers_row(&self.conn, date_id, main, powerball)
    }

    /// Stores one draw: reuses the `dates` row for `input.draw_date` when it
    /// exists, otherwise creates it, then links the numbers row.
    ///
    /// Both writes share a transaction, so a rejected numbers row never leaves
    /// a fresh date row behind. Duplicates surface as errors that
    /// [`classify_conflict`] recognises.
    pub fn insert_draw(&mut self, input: &DrawInput) -> Result<Draw> {
        let tx = self
            .conn
            .transaction()
            .context("failed to start draw transaction")?;

        let date_row = match find_date_row(&tx, input.draw_date)? {
            Some(existing) => {
                debug!(draw_date = %input.draw_date, date_id = existing.id, "reusing date row");
                existing
            }
            None => insert_date_row(
                &tx,
                input.draw_date,
                input.is_powerball_plus,
                input.draw_sequence_num,
            )?,
        };

        let draw_id = insert_numbers_row(&tx, date_row.id, input.main_numbers, input.powerball)?;
        tx.commit().context("failed to commit draw transaction")?;

        debug!(
            draw_date = %input.draw_date,
            draw_id,
            numbers = %input.main_numbers,
            powerball = input.powerball,
            "draw stored"
        );

        Ok(Draw {
            draw_id,
            date_id: date_row.id,
            draw_date: date_row.draw_date,
            is_powerball_plus: date_row.is_powerball_plus,
            draw_sequence_num: date_row.draw_sequence_num,
            main_numbers: input.main_numbers,
            powerball: input.powerball,
        })
    }

    pub fn get_draw_by_date(&self, draw_date: Date) -> Result<Option<Draw>> {
        let draw_date_raw = format_draw_date(draw_date).map_err(|err| anyhow!(err.to_string()))?;
        let mut stmt = self
            .conn
            .prepare(
                "SELECT
                    d.id, d.date_id, t.draw_date, t.is_powerball_plus, t.draw_sequence_num,
                    d.main_num1, d.main_num2, d.main_num3, d.main_num4, d.main_num5,
                    d.powerball_num
                 FROM draws d
                 JOIN dates t ON t.id = d.date_id
                 WHERE t.draw_date = ?1",
            )
            .context("failed to prepare draw lookup")?;

        let draw = stmt
            .query_row(params![draw_date_raw], parse_draw_row)
            .optional()
            .with_context(|| format!("failed to load draw for {draw_date_raw}"))?;
        Ok(draw)
    }

    pub fn latest_draw_date(&self) -> Result<Option<Date>> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT MAX(draw_date) FROM dates", [], |row| row.get(0))
            .context("failed to query latest draw date")?;

        raw.map(|value| parse_draw_date(&value).map_err(|err| anyhow!(err.to_string())))
            .transpose()
    }

    /// Counts draws whose sorted main numbers (and powerball, when given)
    /// equal the combination exactly.
    pub fn count_matches(&self, combination: &Combination) -> Result<u64> {
        let [n1, n2, n3, n4, n5] = combination.main.as_array();
        let count: i64 = match combination.powerball {
            Some(powerball) => self.conn.query_row(
                "SELECT COUNT(*)
                 FROM draws
                 WHERE main_num1 = ?1 AND main_num2 = ?2 AND main_num3 = ?3
                   AND main_num4 = ?4 AND main_num5 = ?5
                   AND powerball_num = ?6",
                params![n1, n2, n3, n4, n5, powerball],
                |row| row.get(0),
            ),
            None => self.conn.query_row(
                "SELECT COUNT(*)
                 FROM draws
                 WHERE main_num1 = ?1 AND main_num2 = ?2 AND main_num3 = ?3
                   AND main_num4 = ?4 AND main_num5 = ?5",
                params![n1, n2, n3, n4, n5],
                |row| row.get(0),
            ),
        }
        .with_context(|| format!("failed to count matches for {combination}"))?;

        u64::try_from(count).with_context(|| format!("negative match count: {count}"))
    }

    pub fn total_draws(&self) -> Result<u64> {
        count_rows(&self.conn, "draws")
    }

    pub fn total_dates(&self) -> Result<u64> {
        count_rows(&self.conn, "dates")
    }

    /// Highest `draw_sequence_num` on record, or 0 for an empty store.
    pub fn max_draw_sequence_num(&self) -> Result<u32> {
        let max: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(draw_sequence_num), 0) FROM dates",
                [],
                |row| row.get(0),
            )
            .context("failed to query max draw_sequence_num")?;

        u32::try_from(max).with_context(|| format!("draw_sequence_num out of range: {max}"))
    }

    pub fn frequency(&self, combination: &Combination) -> Result<Frequency> {
        let occurrences = self.count_matches(combination)?;
        let total_draws = self.total_draws()?;
        debug!(%combination, occurrences, total_draws, "frequency computed");
        Ok(Frequency::new(*combination, occurrences, total_draws))
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            total_draws: self.total_draws()?,
            total_dates: self.total_dates()?,
            max_draw_sequence_num: self.max_draw_sequence_num()?,
        })
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Maps a store error to the uniqueness rule that rejected the write.
///
/// Returns `None` for every other failure, including `CHECK` and foreign key
/// violations.
#[must_use]
pub fn classify_conflict(err: &anyhow::Error) -> Option<DrawConflict> {
    err.chain().find_map(|cause| match cause.downcast_ref::<rusqlite::Error>() {
        Some(rusqlite::Error::SqliteFailure(failure, Some(message)))
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            conflict_from_message(message)
        }
        _ => None,
    })
}

fn conflict_from_message(message: &str) -> Option<DrawConflict> {
    let columns = message.strip_prefix("UNIQUE constraint failed: ")?;
    match columns.trim() {
        "dates.draw_date" => Some(DrawConflict::DuplicateDate),
        "dates.draw_sequence_num" => Some(DrawConflict::DuplicateSequence),
        "draws.date_id" => Some(DrawConflict::DuplicateNumbers),
        _ => None,
    }
}

fn insert_date_row(
    conn: &Connection,
    draw_date: Date,
    is_powerball_plus: bool,
    draw_sequence_num: Option<u32>,
) -> Result<DrawDate> {
    let draw_date_raw = format_draw_date(draw_date).map_err(|err| anyhow!(err.to_string()))?;
    conn.execute(
        "INSERT INTO dates(draw_date, is_powerball_plus, draw_sequence_num) VALUES (?1, ?2, ?3)",
        params![
            draw_date_raw,
            bool_to_sql(is_powerball_plus),
            draw_sequence_num
        ],
    )
    .with_context(|| format!("failed to insert date row for {draw_date_raw}"))?;

    Ok(DrawDate {
        id: conn.last_insert_rowid(),
        draw_date,
        is_powerball_plus,
        draw_sequence_num,
    })
}

fn insert_numbers_row(
    conn: &Connection,
    date_id: i64,
    main: MainNumbers,
    powerball: u8,
) -> Result<i64> {
    let [n1, n2, n3, n4, n5] = main.as_array();
    conn.execute(
        "INSERT INTO draws(
            date_id, main_num1, main_num2, main_num3, main_num4, main_num5, powerball_num
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![date_id, n1, n2, n3, n4, n5, powerball],
    )
    .with_context(|| format!("failed to insert numbers for date_id {date_id}"))?;

    Ok(conn.last_insert_rowid())
}

fn find_date_row(conn: &Connection, draw_date: Date) -> Result<Option<DrawDate>> {
    let draw_date_raw = format_draw_date(draw_date).map_err(|err| anyhow!(err.to_string()))?;
    conn.query_row(
        "SELECT id, draw_date, is_powerball_plus, draw_sequence_num
         FROM dates
         WHERE draw_date = ?1",
        params![draw_date_raw],
        |row| {
            Ok(DrawDate {
                id: row.get(0)?,
                draw_date: parse_draw_date(&row.get::<_, String>(1)?).map_err(to_sql_error)?,
                is_powerball_plus: sql_to_bool(row.get(2)?),
                draw_sequence_num: row.get(3)?,
            })
        },
    )
    .optional()
    .with_context(|| format!("failed to look up date row for {draw_date_raw}"))
}

fn parse_draw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Draw> {
    let draw_date_raw: String = row.get(2)?;
    let draw_date = parse_draw_date(&draw_date_raw).map_err(to_sql_error)?;

    Ok(Draw {
        draw_id: row.get(0)?,
        date_id: row.get(1)?,
        draw_date,
        is_powerball_plus: sql_to_bool(row.get(3)?),
        draw_sequence_num: row.get(4)?,
        main_numbers: MainNumbers::new([
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
            row.get(9)?,
        ]),
        powerball: row.get(10)?,
    })
}

fn count_rows(conn: &Connection, table_name: &str) -> Result<u64> {
    let count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {table_name}"), [], |row| {
            row.get(0)
        })
        .with_context(|| format!("failed to count rows in {table_name}"))?;

    u64::try_from(count).with_context(|| format!("negative row count in {table_name}: {count}"))
}

fn ensure_main_numbers_index(conn: &Connection) -> Result<()> {
    let columns = index_columns(conn, MAIN_NUMBERS_INDEX)?;
    if columns != MAIN_NUMBER_COLUMNS {
        return Err(anyhow!(
            "schema check failed: {MAIN_NUMBERS_INDEX} must cover {} in order, found {}",
            MAIN_NUMBER_COLUMNS.join(", "),
            columns.join(", ")
        ));
    }

    Ok(())
}

fn index_columns(conn: &Connection, index_name: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA index_info({index_name})"))
        .with_context(|| format!("failed to inspect index_info for {index_name}"))?;
    let mut rows = stmt.query([])?;

    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get::<_, String>(2)?);
    }

    Ok(columns)
}

fn bool_to_sql(value: bool) -> i64 {
    i64::from(value)
}

fn sql_to_bool(value: i64) -> bool {
    value != 0
}

#[allow(clippy::needless_pass_by_value)]
fn to_sql_error(err: powerball_core::DrawError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            err.to_string(),
        )),
    )
}
