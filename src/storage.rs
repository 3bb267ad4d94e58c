//! SQLite-backed persistence for credentials and grade snapshots.
//!
//! Two tables, both keyed by user id:
//! - `users(user_id PRIMARY KEY, email, secret)`
//! - `grades(user_id PRIMARY KEY, records_json, last_updated)`
//!
//! `records_json` is a JSON array of `Class: <c>, Test: <a>, Grade: <g>`
//! lines. Snapshots written by earlier deployments use this exact shape, so
//! the encoding must not change.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::sync::Mutex;

use crate::types::{Credential, GradeRecord, Snapshot, UserId};

pub struct GradeStore {
    conn: Mutex<Connection>,
}

impl GradeStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                email TEXT NOT NULL,
                secret TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS grades (
                user_id INTEGER PRIMARY KEY,
                records_json TEXT NOT NULL,
                last_updated TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Store credentials, replacing any previous row for this user.
    pub fn save_credential(&self, cred: &Credential) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO users (user_id, email, secret) VALUES (?1, ?2, ?3)",
            params![cred.user_id, cred.email, cred.secret],
        )?;
        Ok(())
    }

    pub fn get_credential(&self, user_id: UserId) -> Result<Option<Credential>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT email, secret FROM users WHERE user_id = ?1")?;

        let result = stmt.query_row(params![user_id], |row| {
            Ok(Credential {
                user_id,
                email: row.get(0)?,
                secret: row.get(1)?,
            })
        });

        match result {
            Ok(cred) => Ok(Some(cred)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All users with stored credentials, the population each poll cycle
    /// iterates over.
    pub fn list_user_ids(&self) -> Result<Vec<UserId>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT user_id FROM users")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<UserId>, _>>()?;
        Ok(ids)
    }

    /// Overwrite the snapshot for this user with the full current record
    /// set. Always a wholesale replace, never a partial update.
    pub fn save_snapshot(&self, user_id: UserId, records: &HashSet<GradeRecord>) -> Result<()> {
        let lines: Vec<String> = records.iter().map(GradeRecord::to_line).collect();
        let records_json =
            serde_json::to_string(&lines).context("Failed to serialize snapshot records")?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO grades (user_id, records_json, last_updated)
             VALUES (?1, ?2, ?3)",
            params![user_id, records_json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Last-known record set for this user. `None` when no snapshot has ever
    /// been stored; unparseable lines are skipped, not fatal.
    pub fn get_snapshot(&self, user_id: UserId) -> Result<Option<Snapshot>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT records_json, last_updated FROM grades WHERE user_id = ?1")?;

        let result = stmt.query_row(params![user_id], |row| {
            let records_json: String = row.get(0)?;
            let last_updated: String = row.get(1)?;
            Ok((records_json, last_updated))
        });

        let (records_json, last_updated) = match result {
            Ok(pair) => pair,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<String> =
            serde_json::from_str(&records_json).context("Failed to parse snapshot JSON")?;
        let records = lines
            .iter()
            .filter_map(|line| GradeRecord::from_line(line))
            .collect();

        let captured_at = DateTime::parse_from_rfc3339(&last_updated)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Some(Snapshot {
            user_id,
            records,
            captured_at,
        }))
    }

    /// Remove everything stored for this user, credential and snapshot both.
    pub fn delete_user(&self, user_id: UserId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM grades WHERE user_id = ?1", params![user_id])?;
        conn.execute("DELETE FROM users WHERE user_id = ?1", params![user_id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> GradeStore {
        GradeStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_credential_replace_on_write() {
        let store = store();
        store
            .save_credential(&Credential {
                user_id: 1,
                email: "a@example.com".into(),
                secret: "first".into(),
            })
            .unwrap();
        store
            .save_credential(&Credential {
                user_id: 1,
                email: "a@example.com".into(),
                secret: "second".into(),
            })
            .unwrap();

        let cred = store.get_credential(1).unwrap().unwrap();
        assert_eq!(cred.secret, "second");
        assert_eq!(store.list_user_ids().unwrap(), vec![1]);
    }

    #[test]
    fn test_missing_rows_are_none() {
        let store = store();
        assert!(store.get_credential(42).unwrap().is_none());
        assert!(store.get_snapshot(42).unwrap().is_none());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let store = store();
        let records: HashSet<GradeRecord> = [
            GradeRecord::new("Math 10", "Quiz 1", "85%"),
            GradeRecord::new("Science 9", "Lab Report", "A-"),
        ]
        .into_iter()
        .collect();

        store.save_snapshot(7, &records).unwrap();
        let snapshot = store.get_snapshot(7).unwrap().unwrap();
        assert_eq!(snapshot.records, records);
    }

    #[test]
    fn test_snapshot_persists_without_credential_row() {
        let store = store();
        let records: HashSet<GradeRecord> =
            [GradeRecord::new("Math 10", "Quiz 1", "85%")].into_iter().collect();

        // The two tables are independent: a snapshot write must not require
        // a users row for the same id.
        store.save_snapshot(3, &records).unwrap();
        assert!(store.get_credential(3).unwrap().is_none());
        assert_eq!(store.get_snapshot(3).unwrap().unwrap().records, records);
    }

    #[test]
    fn test_snapshot_overwrites_previous() {
        let store = store();
        let first: HashSet<GradeRecord> =
            [GradeRecord::new("Math 10", "Quiz 1", "85%")].into_iter().collect();
        let second: HashSet<GradeRecord> =
            [GradeRecord::new("Math 10", "Quiz 2", "91%")].into_iter().collect();

        store.save_snapshot(7, &first).unwrap();
        store.save_snapshot(7, &second).unwrap();
        assert_eq!(store.get_snapshot(7).unwrap().unwrap().records, second);
    }

    #[test]
    fn test_empty_snapshot_is_stored_not_absent() {
        let store = store();
        store.save_snapshot(7, &HashSet::new()).unwrap();
        let snapshot = store.get_snapshot(7).unwrap().unwrap();
        assert!(snapshot.records.is_empty());
    }

    #[test]
    fn test_delete_user_removes_both_tables() {
        let store = store();
        store
            .save_credential(&Credential {
                user_id: 9,
                email: "b@example.com".into(),
                secret: "pw".into(),
            })
            .unwrap();
        store
            .save_snapshot(9, &[GradeRecord::new("Math", "Quiz", "80%")].into_iter().collect())
            .unwrap();

        store.delete_user(9).unwrap();
        assert!(store.get_credential(9).unwrap().is_none());
        assert!(store.get_snapshot(9).unwrap().is_none());
    }
}
