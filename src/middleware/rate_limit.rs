use crate::error::AppError;

/// Checks a per-key rate limit stored in Redis.
///
/// Uses the INCR + EXPIRE strategy:
/// - Increments a counter for `key`
/// - On first increment, sets TTL to `window_secs`
/// - Returns 429 if counter exceeds `max_attempts`
///
/// Without a Redis connection the limit is not enforced.
pub async fn check_rate_limit(
    redis: Option<&redis::aio::MultiplexedConnection>,
    key: &str,
    max_attempts: u64,
    window_secs: u64,
) -> Result<(), AppError> {
    let Some(conn) = redis else {
        return Ok(());
    };
    let mut conn = conn.clone();

    let count: u64 = match redis::cmd("INCR").arg(key).query_async(&mut conn).await {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(key, "rate limiter unavailable: {e}");
            return Ok(());
        }
    };

    if count == 1 {
        // Set TTL only on first increment to avoid resetting the window on each attempt
        let _: Result<(), _> = redis::cmd("EXPIRE")
            .arg(key)
            .arg(window_secs)
            .query_async(&mut conn)
            .await;
    }

    if count > max_attempts {
        return Err(AppError::RateLimited { retry_after: window_secs });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_without_redis() {
        for _ in 0..10 {
            assert!(check_rate_limit(None, "rate:test", 1, 60).await.is_ok());
        }
    }
}
