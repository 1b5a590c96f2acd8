use crate::database::{Database, connect_db_optional_ks, parse_database_urls};
use crate::eager_env::DATABASE_NODE_URLS;
use anyhow::{Result, anyhow};
use include_dir::{Dir, include_dir};
use rand::{Rng, rng};

static MIGRATIONS_DIR: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/migrations");

fn get_migrations() -> Vec<(String, String)> {
    let mut migrations: Vec<(String, String)> = MIGRATIONS_DIR
        .files()
        .map(|file| {
            (
                file.path().to_str().expect("valid utf8").to_string(),
                file.contents_utf8().expect("valid utf8").to_string(),
            )
        })
        .collect();

    migrations.sort_by(|a, b| a.0.cmp(&b.0));
    migrations
}

fn split_statements(content: &str) -> impl Iterator<Item = &str> {
    content
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.lines().all(|l| l.trim_start().starts_with("--")))
}

/// Creates a throwaway keyspace, runs every migration and then `fixtures`.
///
/// Returns the session (bound to the keyspace) and the keyspace name.
pub async fn create_test_database(fixtures: Option<&str>) -> Result<(Database, String)> {
    let _ = dotenvy::dotenv();
    let keyspace_name = format!("test_ks_{}", rng().random::<u32>());

    let database_urls = parse_database_urls(&DATABASE_NODE_URLS);
    let session = connect_db_optional_ks(&database_urls, None).await?;

    session
        .query_unpaged(
            format!(
                "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
                keyspace_name
            ),
            &[],
        )
        .await?;

    session.use_keyspace(&keyspace_name, true).await?;

    for (file, content) in get_migrations() {
        for statement in split_statements(&content) {
            session
                .query_unpaged(statement, &[])
                .await
                .map_err(|e| anyhow!("Migration failed for file {}: {}", file, e))?;
        }
    }

    if let Some(fixtures) = fixtures {
        for statement in split_statements(fixtures) {
            session
                .query_unpaged(statement, &[])
                .await
                .map_err(|e| anyhow!("Fixture statement failed: {}", e))?;
        }
    }

    Ok((session, keyspace_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_embedded() {
        let migrations = get_migrations();
        assert!(!migrations.is_empty());

        let statements: Vec<_> = migrations
            .iter()
            .flat_map(|(_, content)| split_statements(content))
            .collect();
        assert!(statements.iter().any(|s| s.contains("waitlist_users")));
    }

    #[test]
    fn test_split_statements_skips_comments() {
        let statements: Vec<_> =
            split_statements("-- header\n;\nSELECT 1;\n  ;INSERT INTO t (a) VALUES (1)").collect();
        assert_eq!(statements, vec!["SELECT 1", "INSERT INTO t (a) VALUES (1)"]);
    }

    #[tokio::test]
    #[ignore]
    async fn cleanup_test_keyspaces() -> Result<()> {
        let _ = dotenvy::dotenv();
        let database_urls = parse_database_urls(&DATABASE_NODE_URLS);
        let session = connect_db_optional_ks(&database_urls, None).await?;

        let rows = session
            .query_unpaged("SELECT keyspace_name FROM system_schema.keyspaces", &[])
            .await?
            .into_rows_result()?;

        for row in rows.rows::<(String,)>()? {
            let (keyspace_name,) = row?;
            if keyspace_name.starts_with("test_") {
                println!("Dropping keyspace: {}", keyspace_name);
                session
                    .query_unpaged(format!("DROP KEYSPACE IF EXISTS {}", keyspace_name), &[])
                    .await?;
            }
        }

        Ok(())
    }
}
