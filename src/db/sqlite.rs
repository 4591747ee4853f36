// SqliteDatabase: rusqlite backend implementing the Database trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Sync.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// The lock is never held across .await points.

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::{AnalysisRecord, EmailAttempt, EmailAttemptLog, NewAnalysisRecord, ThreatStats};
use super::traits::Database;

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// An in-memory database with the schema applied.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::schema::create_tables(&conn)?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    async fn insert_analysis(&self, record: &NewAnalysisRecord) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::queries::insert_analysis(&conn, record)
    }

    async fn get_recent_analyses(&self, limit: u32) -> Result<Vec<AnalysisRecord>> {
        let conn = self.conn.lock().await;
        super::queries::get_recent_analyses(&conn, limit)
    }

    async fn get_threat_stats(&self) -> Result<ThreatStats> {
        let conn = self.conn.lock().await;
        super::queries::get_threat_stats(&conn)
    }

    async fn insert_email_attempt(&self, attempt: &EmailAttemptLog) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::queries::insert_email_attempt(&conn, attempt)
    }

    async fn get_email_attempt(&self, id: i64) -> Result<Option<EmailAttempt>> {
        let conn = self.conn.lock().await;
        super::queries::get_email_attempt(&conn, id)
    }

    async fn get_recent_email_attempts(&self, limit: u32) -> Result<Vec<EmailAttempt>> {
        let conn = self.conn.lock().await;
        super::queries::get_recent_email_attempts(&conn, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::category::{Category, CategoryScores};
    use crate::scoring::fusion::ToxicVerdict;

    #[tokio::test]
    async fn test_trait_table_count() {
        let db = SqliteDatabase::in_memory().unwrap();
        assert_eq!(db.table_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_trait_analysis_and_stats() {
        let db = SqliteDatabase::in_memory().unwrap();
        let scores: CategoryScores = [(Category::HateSpeech, 0.8)].into_iter().collect();
        let record = NewAnalysisRecord {
            content: "slur".to_string(),
            negative_score: 0.6,
            verdict: ToxicVerdict::from_parts(scores, 0.0),
        };
        db.insert_analysis(&record).await.unwrap();

        let stats = db.get_threat_stats().await.unwrap();
        assert_eq!(stats.total_analyzed, 1);
        assert_eq!(stats.by_threat_level["high"], 1);
        assert_eq!(stats.by_harm_type["hate_speech"], 1);

        let recent = db.get_recent_analyses(20).await.unwrap();
        assert_eq!(recent[0].threat_level, "High");
    }

    #[tokio::test]
    async fn test_trait_email_attempt() {
        let db = SqliteDatabase::in_memory().unwrap();
        let log = EmailAttemptLog {
            sender: "a@x.com".to_string(),
            recipient: "b@x.com".to_string(),
            subject: "Hello".to_string(),
            content: "body".to_string(),
            toxic_score: Some(0.9),
            threat_level: "High".to_string(),
            primary_harm_type: "threats".to_string(),
            was_blocked: true,
        };
        let id = db.insert_email_attempt(&log).await.unwrap();
        let stored = db.get_email_attempt(id).await.unwrap().unwrap();
        assert!(stored.was_blocked);
        assert_eq!(stored.primary_harm_type, "threats");
        assert_eq!(db.get_recent_email_attempts(5).await.unwrap().len(), 1);
    }
}
