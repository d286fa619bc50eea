use super::*;

/// Parameters of the custody retransmission timer.
///
/// The timeout is `base + lifetime_pct% of the bundle lifetime`, capped at
/// `limit` seconds unless `limit` is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CustodyTimerSpec {
    pub base: u64,
    pub lifetime_pct: u64,
    pub limit: u64,
}

impl Default for CustodyTimerSpec {
    fn default() -> Self {
        Self {
            base: 30 * 60,
            lifetime_pct: 25,
            limit: 0,
        }
    }
}

impl CustodyTimerSpec {
    /// Seconds to wait for a custody signal for `bundle`.
    pub fn calculate_timeout(&self, bundle: &bundle::Bundle) -> u64 {
        let timeout = self
            .base
            .saturating_add(self.lifetime_pct.saturating_mul(bundle.expiration) / 100);

        if self.limit != 0 && timeout > self.limit {
            self.limit
        } else {
            timeout
        }
    }
}

/// A running custody timer for one bundle on one link.
///
/// The timer callback holds its own [`bundle::BundleRef`], which is released
/// when the timer fires or is cancelled.
pub struct CustodyTimer {
    pub link: link::LinkRef,
    pub spec: CustodyTimerSpec,
    pub(crate) timer: dtnd_async::Timer,
}

impl CustodyTimer {
    /// Starts a timer that posts `CustodyTimeout` at `xmit_time` plus the
    /// timeout `spec` gives for the bundle.
    pub(crate) fn start(
        pool: &dtnd_async::TaskPool,
        xmit_time: time::OffsetDateTime,
        spec: CustodyTimerSpec,
        bundle: &bundle::BundleRef,
        link: &link::LinkRef,
        events: &event::EventSender,
    ) -> Self {
        let timeout = spec.calculate_timeout(bundle);
        let deadline = xmit_time.saturating_add(time::Duration::seconds(
            timeout.min(i64::MAX as u64) as i64,
        ));

        debug!(
            "Scheduling custody timer for bundle {} on link {} in {timeout} seconds",
            bundle.id(),
            link.name()
        );

        let timer = {
            let bundle = bundle.clone_as("CustodyTimer");
            let link = link.clone();
            let events = events.clone();
            dtnd_async::Timer::schedule_at(pool, deadline, move || {
                events.post(event::Event::new(event::EventKind::CustodyTimeout {
                    bundle,
                    link,
                }))
            })
        };

        Self {
            link: link.clone(),
            spec,
            timer,
        }
    }

    pub fn cancel(&self) -> bool {
        self.timer.cancel()
    }

    pub fn is_pending(&self) -> bool {
        self.timer.is_pending()
    }

    pub fn deadline(&self) -> time::OffsetDateTime {
        self.timer.deadline()
    }
}
