use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres, Row};

use lurkbot_common::Error;
use lurkbot_common::models::subscription::{GuildConfig, RepositoryStats, StreamerSub};
use lurkbot_common::traits::repository_traits::GuildConfigRepository;

/// Guild store backed by Postgres. One row per guild, one row per
/// (guild, streamer) subscription.
#[derive(Clone)]
pub struct PostgresGuildConfigRepository {
    pool: Pool<Postgres>,
}

impl PostgresGuildConfigRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Connect and create the schema if it does not exist yet.
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let repo = Self::new(pool);
        repo.initialize().await?;
        Ok(repo)
    }

    async fn initialize(&self) -> Result<(), Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lurkbot_guilds (
                guild_id TEXT PRIMARY KEY,
                notification_channel TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lurkbot_streamers (
                guild_id TEXT NOT NULL
                    REFERENCES lurkbot_guilds(guild_id) ON DELETE CASCADE,
                streamer_login TEXT NOT NULL,
                custom_message TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (guild_id, streamer_login)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl GuildConfigRepository for PostgresGuildConfigRepository {
    async fn ensure_guild(&self, guild_id: &str) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO lurkbot_guilds (guild_id)
            VALUES ($1)
            ON CONFLICT (guild_id) DO NOTHING
            "#,
        )
        .bind(guild_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_guild(&self, guild_id: &str) -> Result<bool, Error> {
        let result = sqlx::query("DELETE FROM lurkbot_guilds WHERE guild_id = $1")
            .bind(guild_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_guild_configs(&self) -> Result<Vec<GuildConfig>, Error> {
        let guild_rows = sqlx::query(
            r#"
            SELECT guild_id, notification_channel
            FROM lurkbot_guilds
            ORDER BY guild_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let sub_rows = sqlx::query(
            r#"
            SELECT guild_id, streamer_login, custom_message
            FROM lurkbot_streamers
            ORDER BY guild_id, streamer_login
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut configs: Vec<GuildConfig> = guild_rows
            .into_iter()
            .map(|row| {
                Ok(GuildConfig {
                    guild_id: row.try_get("guild_id")?,
                    notification_channel: row.try_get("notification_channel")?,
                    streamers: Vec::new(),
                })
            })
            .collect::<Result<_, sqlx::Error>>()?;

        for row in sub_rows {
            let guild_id: String = row.try_get("guild_id")?;
            let sub = StreamerSub {
                login: row.try_get("streamer_login")?,
                custom_message: row.try_get("custom_message")?,
            };
            if let Some(config) = configs.iter_mut().find(|c| c.guild_id == guild_id) {
                config.streamers.push(sub);
            }
        }

        Ok(configs)
    }

    async fn add_streamer(&self, guild_id: &str, login: &str) -> Result<bool, Error> {
        self.ensure_guild(guild_id).await?;
        let result = sqlx::query(
            r#"
            INSERT INTO lurkbot_streamers (guild_id, streamer_login)
            VALUES ($1, $2)
            ON CONFLICT (guild_id, streamer_login) DO NOTHING
            "#,
        )
        .bind(guild_id)
        .bind(login.to_lowercase())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_streamer(&self, guild_id: &str, login: &str) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM lurkbot_streamers
            WHERE guild_id = $1 AND streamer_login = $2
            "#,
        )
        .bind(guild_id)
        .bind(login.to_lowercase())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_streamers(&self, guild_id: &str) -> Result<Vec<String>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT streamer_login
            FROM lurkbot_streamers
            WHERE guild_id = $1
            ORDER BY streamer_login
            "#,
        )
        .bind(guild_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| row.try_get("streamer_login").map_err(Error::from))
            .collect()
    }

    async fn set_notification_channel(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO lurkbot_guilds (guild_id, notification_channel)
            VALUES ($1, $2)
            ON CONFLICT (guild_id) DO UPDATE
                SET notification_channel = EXCLUDED.notification_channel,
                    updated_at = now()
            "#,
        )
        .bind(guild_id)
        .bind(channel_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_notification_channel(&self, guild_id: &str) -> Result<Option<String>, Error> {
        let row = sqlx::query(
            r#"
            SELECT notification_channel
            FROM lurkbot_guilds
            WHERE guild_id = $1
            "#,
        )
        .bind(guild_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(r) => Ok(r.try_get("notification_channel")?),
            None => Ok(None),
        }
    }

    async fn set_custom_message(
        &self,
        guild_id: &str,
        login: &str,
        message: &str,
    ) -> Result<(), Error> {
        let result = sqlx::query(
            r#"
            UPDATE lurkbot_streamers
            SET custom_message = $3
            WHERE guild_id = $1 AND streamer_login = $2
            "#,
        )
        .bind(guild_id)
        .bind(login.to_lowercase())
        .bind(message)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::Platform(format!(
                "{login} is not monitored in guild {guild_id}"
            )));
        }
        Ok(())
    }

    async fn get_custom_message(
        &self,
        guild_id: &str,
        login: &str,
    ) -> Result<Option<String>, Error> {
        let row = sqlx::query(
            r#"
            SELECT custom_message
            FROM lurkbot_streamers
            WHERE guild_id = $1 AND streamer_login = $2
            "#,
        )
        .bind(guild_id)
        .bind(login.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(r) => Ok(r.try_get("custom_message")?),
            None => Ok(None),
        }
    }

    async fn get_stats(&self) -> Result<RepositoryStats, Error> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM lurkbot_guilds) AS total_guilds,
                (SELECT COUNT(*) FROM lurkbot_streamers) AS total_streamers,
                (SELECT COUNT(*) FROM lurkbot_streamers
                    WHERE custom_message IS NOT NULL) AS total_custom_messages
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let total_guilds: i64 = row.try_get("total_guilds")?;
        let total_streamers: i64 = row.try_get("total_streamers")?;
        let total_custom_messages: i64 = row.try_get("total_custom_messages")?;

        Ok(RepositoryStats {
            total_guilds: total_guilds as u64,
            total_streamers: total_streamers as u64,
            total_custom_messages: total_custom_messages as u64,
        })
    }
}
