use std::sync::{OnceLock, RwLock};

use sea_orm::{Database, DatabaseConnection, DbErr};

struct SharedDb {
    url: String,
    connection: DatabaseConnection,
}

static SHARED_DB: OnceLock<RwLock<Option<SharedDb>>> = OnceLock::new();

/// One pooled connection per database URL for the whole process.
pub async fn connect_shared(url: &str) -> Result<DatabaseConnection, DbErr> {
    let lock = SHARED_DB.get_or_init(|| RwLock::new(None));
    if let Ok(guard) = lock.read()
        && let Some(shared) = guard.as_ref()
        && shared.url == url
    {
        return Ok(shared.connection.clone());
    }

    let connection = Database::connect(url).await?;
    if let Ok(mut guard) = lock.write() {
        *guard = Some(SharedDb {
            url: url.to_string(),
            connection: connection.clone(),
        });
    }
    Ok(connection)
}
