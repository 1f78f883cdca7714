use async_trait::async_trait;
use log::info;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

use crate::config::DatabaseInfo;
use crate::OnboardingError;

/// Metadata for an image about to be registered.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub original_name: String,
    pub url: String,
    pub height: u32,
    pub width: u32,
}

#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Id of `user_name`, creating the user on first sight.
    async fn create_user(&self, user_name: &str) -> Result<i32, OnboardingError>;

    /// Register `images` and return `(url, image_id)` pairs in input order.
    async fn add_new_images(
        &self,
        images: &[ImageInfo],
        user_id: i32,
    ) -> Result<Vec<(String, i32)>, OnboardingError>;

    /// Point each image id at its permanent location.
    async fn update_image_urls(
        &self,
        urls: &[(i32, String)],
        user_id: i32,
    ) -> Result<(), OnboardingError>;
}

const CREATE_USER_TABLE: &str = "CREATE TABLE IF NOT EXISTS user_info (
    userid SERIAL PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    createddtim TIMESTAMPTZ NOT NULL DEFAULT now()
)";

const CREATE_IMAGE_TABLE: &str = "CREATE TABLE IF NOT EXISTS image_info (
    imageid SERIAL PRIMARY KEY,
    originalimagename TEXT NOT NULL,
    imagelocation TEXT NOT NULL,
    height INTEGER NOT NULL,
    width INTEGER NOT NULL,
    createdbyuser INTEGER NOT NULL REFERENCES user_info (userid),
    modifiedbyuser INTEGER REFERENCES user_info (userid),
    createddtim TIMESTAMPTZ NOT NULL DEFAULT now(),
    modifieddtim TIMESTAMPTZ NOT NULL DEFAULT now()
)";

pub struct PgRegistry {
    pool: PgPool,
}

impl PgRegistry {
    pub async fn connect(db: &DatabaseInfo) -> Result<Self, OnboardingError> {
        let options = PgConnectOptions::new()
            .host(&db.host)
            .database(&db.name)
            .username(&db.user)
            .password(&db.password);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        info!("Connected to database {} on {}", db.name, db.host);

        Ok(PgRegistry { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), OnboardingError> {
        sqlx::query(CREATE_USER_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_IMAGE_TABLE).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ImageRegistry for PgRegistry {
    async fn create_user(&self, user_name: &str) -> Result<i32, OnboardingError> {
        let id = sqlx::query_scalar::<_, i32>(
            "INSERT INTO user_info (username) VALUES ($1)
             ON CONFLICT (username) DO UPDATE SET username = EXCLUDED.username
             RETURNING userid",
        )
        .bind(user_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn add_new_images(
        &self,
        images: &[ImageInfo],
        user_id: i32,
    ) -> Result<Vec<(String, i32)>, OnboardingError> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(images.len());

        for image in images {
            let id = sqlx::query_scalar::<_, i32>(
                "INSERT INTO image_info
                 (originalimagename, imagelocation, height, width, createdbyuser, modifiedbyuser)
                 VALUES ($1, $2, $3, $4, $5, $5)
                 RETURNING imageid",
            )
            .bind(&image.original_name)
            .bind(&image.url)
            .bind(image.height as i32)
            .bind(image.width as i32)
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;

            ids.push((image.url.clone(), id));
        }

        tx.commit().await?;
        info!("Registered {} images for user {}", ids.len(), user_id);

        Ok(ids)
    }

    async fn update_image_urls(
        &self,
        urls: &[(i32, String)],
        user_id: i32,
    ) -> Result<(), OnboardingError> {
        let mut tx = self.pool.begin().await?;

        for (image_id, url) in urls {
            sqlx::query(
                "UPDATE image_info
                 SET imagelocation = $1, modifiedbyuser = $2, modifieddtim = now()
                 WHERE imageid = $3",
            )
            .bind(url)
            .bind(user_id)
            .bind(*image_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
