use crate::config::DbSettings;
use log::debug;
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqlitePool,
};
use std::time::Duration;

static RAFFLE_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/raffle");

/// Wraps a pair of SQLite pools, a small one for writes and a larger
/// read-only one, so long report queries never starve the single writer.
#[derive(Clone, Debug)]
pub struct DBConnection {
    pub database_name: String,
    pub database_path: String,
    read_pool: SqlitePool,
    write_pool: SqlitePool,
}

impl DBConnection {
    pub async fn new(
        path: &str,
        db_name: &str,
        settings: &DbSettings,
    ) -> Result<Self, sqlx::Error> {
        let database_path = format!("{}/{}.db", path, db_name);

        let database_url = format!("sqlite:{}", database_path);
        if !Sqlite::database_exists(&database_url).await? {
            Sqlite::create_database(&database_url).await?;
        }

        let write_options = SqliteConnectOptions::new()
            .filename(&database_path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(settings.busy_timeout_ms as u64))
            .pragma("journal_mode", "WAL")
            .pragma("synchronous", "NORMAL")
            .pragma("foreign_keys", "true");
        debug!("Write connection: {:?}", write_options);

        let write_pool = SqlitePoolOptions::new()
            .max_connections(settings.write_max_connections)
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(settings.idle_timeout_secs))
            .connect_with(write_options)
            .await?;

        RAFFLE_MIGRATOR
            .run(&write_pool)
            .await
            .map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;

        let read_options = SqliteConnectOptions::new()
            .filename(&database_path)
            .read_only(true)
            .busy_timeout(Duration::from_millis(settings.busy_timeout_ms as u64))
            .pragma("journal_mode", "WAL");
        debug!("Read connection: {:?}", read_options);

        let read_pool = SqlitePoolOptions::new()
            .max_connections(settings.read_max_connections)
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(settings.idle_timeout_secs))
            .connect_with(read_options)
            .await?;

        Ok(Self {
            database_name: db_name.to_string(),
            database_path,
            read_pool,
            write_pool,
        })
    }

    #[cfg(test)]
    pub fn new_with_pools(
        database_name: String,
        database_path: String,
        read_pool: SqlitePool,
        write_pool: SqlitePool,
    ) -> Self {
        Self {
            database_name,
            database_path,
            read_pool,
            write_pool,
        }
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        let _: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.read_pool)
            .await?;
        let _: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.write_pool)
            .await?;

        Ok(())
    }

    pub async fn close(self) {
        self.read_pool.close().await;
        self.write_pool.close().await;
    }

    pub fn read(&self) -> &SqlitePool {
        &self.read_pool
    }

    pub fn write(&self) -> &SqlitePool {
        &self.write_pool
    }
}

/// Appends cursor pagination clauses to a query.
///
/// `offset` is an exclusive cursor on `sort_field`, not a row offset; when
/// `reverse` the cursor comparison flips along with the sort direction.
pub fn add_pagination(
    query: &mut String,
    has_where: bool,
    sort_field: &str,
    offset: u64,
    limit: u64,
    reverse: bool,
) {
    if offset > 0 {
        query.push_str(if has_where { " AND " } else { " WHERE " });
        query.push_str(sort_field);
        query.push_str(if reverse { " < " } else { " > " });
        query.push_str(&offset.to_string());
    }

    query.push_str(" ORDER BY ");
    query.push_str(sort_field);
    query.push_str(if reverse { " DESC" } else { " ASC" });

    if limit > 0 {
        query.push_str(" LIMIT ");
        query.push_str(&limit.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_forward() {
        let mut query = String::from("SELECT idx FROM bets WHERE lottery_height = ?");
        add_pagination(&mut query, true, "idx", 30, 10, false);
        assert_eq!(
            query,
            "SELECT idx FROM bets WHERE lottery_height = ? AND idx > 30 ORDER BY idx ASC LIMIT 10"
        );
    }

    #[test]
    fn test_pagination_reverse() {
        let mut query = String::from("SELECT height FROM lotteries");
        add_pagination(&mut query, false, "height", 800000, 5, true);
        assert_eq!(
            query,
            "SELECT height FROM lotteries WHERE height < 800000 ORDER BY height DESC LIMIT 5"
        );
    }

    #[test]
    fn test_pagination_no_cursor_no_limit() {
        let mut query = String::from("SELECT height FROM lotteries");
        add_pagination(&mut query, false, "height", 0, 0, false);
        assert_eq!(query, "SELECT height FROM lotteries ORDER BY height ASC");
    }
}
