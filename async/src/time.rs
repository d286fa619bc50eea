//! Sleeping on [`time::Duration`] values.

/// Sleeps for the specified duration.
///
/// Zero or negative durations return immediately, durations too large for
/// `std::time::Duration` sleep for `std::time::Duration::MAX`.
pub async fn sleep(duration: time::Duration) {
    if !duration.is_positive() {
        return;
    }

    let std_duration: std::time::Duration = duration.try_into().unwrap_or(std::time::Duration::MAX);

    tokio::time::sleep(std_duration).await;
}

/// Sleeps until the wall-clock `deadline`.
///
/// The wait is converted to a monotonic sleep at the time of the call, a
/// deadline in the past returns immediately.
pub async fn sleep_until(deadline: time::OffsetDateTime) {
    sleep(deadline - time::OffsetDateTime::now_utc()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn negative_duration_returns_immediately() {
        let before = tokio::time::Instant::now();
        sleep(time::Duration::seconds(-5)).await;
        assert_eq!(before, tokio::time::Instant::now());
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_for_duration() {
        let before = tokio::time::Instant::now();
        sleep(time::Duration::seconds(3)).await;
        assert!(tokio::time::Instant::now() - before >= std::time::Duration::from_secs(3));
    }
}
