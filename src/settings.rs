use sqlx::{Pool, Sqlite};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::db;
use crate::error::StoreError;
use crate::models::{NotificationSettings, SettingKey};

const SETTINGS_KEY: &str = "notification_settings";

/// Notification preferences persisted as a single JSON record.
pub struct SettingsStore {
    db_pool: Pool<Sqlite>,
    // Serializes read-modify-write so a load after an update sees it
    write_lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        Self {
            db_pool,
            write_lock: Mutex::new(()),
        }
    }

    /// Stored settings, or defaults when nothing has been saved yet.
    pub async fn load(&self) -> Result<NotificationSettings, StoreError> {
        let _guard = self.write_lock.lock().await;
        self.read().await
    }

    pub async fn update(
        &self,
        key: SettingKey,
        value: bool,
    ) -> Result<NotificationSettings, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut settings = self.read().await?;
        settings.set(key, value);
        self.write(&settings).await?;

        info!(setting = key.as_str(), value, "Notification setting updated");
        Ok(settings)
    }

    pub async fn replace(&self, settings: NotificationSettings) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write(&settings).await?;
        info!(?settings, "Notification settings replaced");
        Ok(())
    }

    async fn read(&self) -> Result<NotificationSettings, StoreError> {
        let Some(raw) = db::get_value(&self.db_pool, SETTINGS_KEY).await? else {
            return Ok(NotificationSettings::default());
        };

        match serde_json::from_str(&raw) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!(error = %e, "Stored notification settings are unreadable, using defaults");
                Ok(NotificationSettings::default())
            }
        }
    }

    async fn write(&self, settings: &NotificationSettings) -> Result<(), StoreError> {
        let raw = serde_json::to_string(settings)?;
        db::put_value(&self.db_pool, SETTINGS_KEY, &raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    #[tokio::test]
    async fn test_load_returns_defaults_when_empty() {
        let store = SettingsStore::new(init_memory_pool().await);
        let settings = store.load().await.unwrap();
        assert_eq!(settings, NotificationSettings::default());
        assert!(settings.daily_reminders);
        assert!(settings.appointment_reminders);
        assert!(!settings.news_and_updates);
    }

    #[tokio::test]
    async fn test_update_is_visible_and_leaves_other_keys() {
        let store = SettingsStore::new(init_memory_pool().await);

        for key in SettingKey::ALL {
            for value in [true, false] {
                let before = store.load().await.unwrap();
                store.update(key, value).await.unwrap();
                let after = store.load().await.unwrap();

                assert_eq!(after.get(key), value);
                for other in SettingKey::ALL.into_iter().filter(|k| *k != key) {
                    assert_eq!(after.get(other), before.get(other));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_record_is_persisted_with_wire_names() {
        let pool = init_memory_pool().await;
        let store = SettingsStore::new(pool.clone());
        store.update(SettingKey::NewsAndUpdates, true).await.unwrap();

        let raw = db::get_value(&pool, SETTINGS_KEY).await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["newsAndUpdates"], true);
        assert_eq!(value["dailyReminders"], true);
    }

    #[tokio::test]
    async fn test_unreadable_record_falls_back_to_defaults() {
        let pool = init_memory_pool().await;
        db::put_value(&pool, SETTINGS_KEY, "not json").await.unwrap();

        let store = SettingsStore::new(pool);
        assert_eq!(store.load().await.unwrap(), NotificationSettings::default());
    }

    #[tokio::test]
    async fn test_storage_failure_is_surfaced() {
        let pool = init_memory_pool().await;
        let store = SettingsStore::new(pool.clone());
        pool.close().await;

        assert!(store.update(SettingKey::DailyReminders, false).await.is_err());
    }
}
