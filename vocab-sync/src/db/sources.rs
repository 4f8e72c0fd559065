//! Reading source database operations

use sqlx::SqlitePool;
use uuid::Uuid;
use vocab_common::time::now_timestamp;
use vocab_common::Result;

use super::parse_uuid;

/// Host of a URL without a leading `www.`
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

/// Find or create the website source for a page, refreshing its title
pub async fn upsert_website_source(pool: &SqlitePool, user_id: Uuid, url: &str, title: &str) -> Result<Uuid> {
    let now = now_timestamp();

    let existing: Option<(String, Option<String>)> = sqlx::query_as(
        r#"
        SELECT id, title FROM sources
        WHERE user_id = ? AND url = ? AND type = 'website' AND deleted_at IS NULL
        ORDER BY created_at ASC
        LIMIT 1
        "#,
    )
    .bind(user_id.to_string())
    .bind(url)
    .fetch_optional(pool)
    .await?;

    if let Some((id, current_title)) = existing {
        if current_title.as_deref() != Some(title) {
            sqlx::query("UPDATE sources SET title = ?, version = version + 1, updated_at = ? WHERE id = ?")
                .bind(title)
                .bind(&now)
                .bind(&id)
                .execute(pool)
                .await?;
        }
        return parse_uuid(&id);
    }

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO sources (id, user_id, type, title, url, domain, version, created_at, updated_at)
        VALUES (?, ?, 'website', ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(user_id.to_string())
    .bind(title)
    .bind(url)
    .bind(domain_of(url))
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;

    #[test]
    fn test_domain_strips_www() {
        assert_eq!(domain_of("https://www.Example.com/a?b=c").as_deref(), Some("example.com"));
        assert_eq!(domain_of("https://news.example.org/").as_deref(), Some("news.example.org"));
        assert_eq!(domain_of("not a url"), None);
    }

    #[tokio::test]
    async fn test_same_url_reuses_source() {
        let (_dir, pool) = test_pool().await;
        let user = Uuid::new_v4();

        let first = upsert_website_source(&pool, user, "https://example.com/p", "Page").await.unwrap();
        let second = upsert_website_source(&pool, user, "https://example.com/p", "Page v2").await.unwrap();
        assert_eq!(first, second);

        let (title, domain): (String, String) = sqlx::query_as("SELECT title, domain FROM sources WHERE id = ?")
            .bind(first.to_string())
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(title, "Page v2");
        assert_eq!(domain, "example.com");
    }
}
