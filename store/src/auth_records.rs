use platform_common::{models::*, now, Error, Id};
use sqlx::Row;

use crate::Store;

impl Store {
    pub async fn insert_refresh_token(
        &self,
        user_id: Id,
        token_hash: &[u8],
        expires_at: platform_common::Instant,
    ) -> Result<RefreshToken, Error> {
        let token = RefreshToken {
            id: Id::new(),
            user_id,
            token_hash: token_hash.to_vec(),
            expires_at,
            created_at: now(),
        };

        sqlx::query(
            "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(token.id.to_string())
        .bind(token.user_id.to_string())
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(token.created_at)
        .execute(self.pool())
        .await?;

        Ok(token)
    }

    pub async fn find_refresh_token(&self, token_hash: &[u8]) -> Result<RefreshToken, Error> {
        let row = sqlx::query("SELECT * FROM refresh_tokens WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(self.pool())
            .await?
            .ok_or(Error::Unauthorized)?;

        Ok(RefreshToken {
            id: row.try_get::<String, _>("id")?.parse().unwrap(),
            user_id: row.try_get::<String, _>("user_id")?.parse().unwrap(),
            token_hash: row.try_get("token_hash")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub async fn revoke_refresh_token(&self, id: Id) -> Result<(), Error> {
        sqlx::query("DELETE FROM refresh_tokens WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn insert_otp_code(
        &self,
        user_id: Id,
        code_hash: &[u8],
        expires_at: platform_common::Instant,
    ) -> Result<OtpCode, Error> {
        let otp = OtpCode {
            id: Id::new(),
            user_id,
            code_hash: code_hash.to_vec(),
            expires_at,
            consumed: false,
        };

        sqlx::query(
            "INSERT INTO otp_codes (id, user_id, code_hash, expires_at, consumed) VALUES (?, ?, ?, ?, 0)",
        )
        .bind(otp.id.to_string())
        .bind(otp.user_id.to_string())
        .bind(&otp.code_hash)
        .bind(otp.expires_at)
        .execute(self.pool())
        .await?;

        Ok(otp)
    }

    /// Consumes an OTP code atomically; fails if already consumed or
    /// unknown, so a code cannot be replayed.
    pub async fn consume_otp_code(&self, user_id: Id, code_hash: &[u8]) -> Result<(), Error> {
        let affected = sqlx::query(
            "UPDATE otp_codes SET consumed = 1 WHERE user_id = ? AND code_hash = ? AND consumed = 0 AND expires_at > ?",
        )
        .bind(user_id.to_string())
        .bind(code_hash)
        .bind(now())
        .execute(self.pool())
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(Error::Unauthorized);
        }
        Ok(())
    }
}
