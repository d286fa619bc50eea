use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForwardingState {
    /// No entry exists for the link.
    None,
    InFlight,
    Transmitted,
    TransmitFailed,
    Cancelled,
    CustodyTimeout,
}

impl core::fmt::Display for ForwardingState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::None => "NONE",
            Self::InFlight => "IN_FLIGHT",
            Self::Transmitted => "TRANSMITTED",
            Self::TransmitFailed => "TRANSMIT_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::CustodyTimeout => "CUSTODY_TIMEOUT",
        })
    }
}

/// Whether the copy sent on a link relinquishes the bundle (`Forward`) or not (`Copy`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForwardingAction {
    #[default]
    Forward,
    Copy,
}

#[derive(Debug, Clone)]
pub struct ForwardingInfo {
    pub state: ForwardingState,
    pub action: ForwardingAction,
    pub link: Arc<str>,
    pub clayer: Arc<str>,
    pub nexthop: Arc<str>,
    /// When the entry was added or last updated.
    pub timestamp: time::OffsetDateTime,
    pub custody_spec: CustodyTimerSpec,
}

impl ForwardingInfo {
    fn is_for(&self, link: &link::Link) -> bool {
        self.clayer.as_ref() == link.clayer_name() && self.nexthop.as_ref() == link.nexthop()
    }
}

/// Append-only history of a bundle's transmission attempts.
///
/// Entries are matched to a link by convergence layer and next hop rather
/// than by link instance, since the same next hop may be reached through
/// different links over time. Only the newest matching entry is authoritative.
#[derive(Debug, Default, Clone)]
pub struct ForwardingLog {
    entries: Vec<ForwardingInfo>,
}

impl ForwardingLog {
    pub fn add_entry(
        &mut self,
        link: &link::Link,
        action: ForwardingAction,
        state: ForwardingState,
        custody_spec: CustodyTimerSpec,
    ) {
        self.entries.push(ForwardingInfo {
            state,
            action,
            link: link.name_arc(),
            clayer: link.clayer_name_arc(),
            nexthop: link.nexthop_arc(),
            timestamp: time::OffsetDateTime::now_utc(),
            custody_spec,
        });
    }

    /// Moves the newest entry for `link` to `state`.
    ///
    /// Returns false if the bundle was never forwarded on `link`.
    pub fn update(&mut self, link: &link::Link, state: ForwardingState) -> bool {
        match self.entries.iter_mut().rev().find(|e| e.is_for(link)) {
            Some(entry) => {
                entry.state = state;
                entry.timestamp = time::OffsetDateTime::now_utc();
                true
            }
            None => false,
        }
    }

    pub fn get_latest_entry(&self, link: &link::Link) -> Option<&ForwardingInfo> {
        self.entries.iter().rev().find(|e| e.is_for(link))
    }

    pub fn get_latest_entry_state(&self, link: &link::Link) -> ForwardingState {
        self.get_latest_entry(link)
            .map_or(ForwardingState::None, |e| e.state)
    }

    /// Counts entries in any of `states`, optionally restricted to `action`.
    pub fn get_count(&self, states: &[ForwardingState], action: Option<ForwardingAction>) -> usize {
        self.entries
            .iter()
            .filter(|e| states.contains(&e.state))
            .filter(|e| action.is_none_or(|a| a == e.action))
            .count()
    }

    /// Counts completed transmissions, and in-flight ones if asked to.
    pub fn get_transmission_count(
        &self,
        action: Option<ForwardingAction>,
        include_inflight: bool,
    ) -> usize {
        if include_inflight {
            self.get_count(
                &[ForwardingState::Transmitted, ForwardingState::InFlight],
                action,
            )
        } else {
            self.get_count(&[ForwardingState::Transmitted], action)
        }
    }

    pub fn entries(&self) -> &[ForwardingInfo] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_entry_per_link() {
        let a = link::Link::new("a", "tcp", "host-a:4556", link::LinkType::AlwaysOn, Default::default());
        let b = link::Link::new("b", "tcp", "host-b:4556", link::LinkType::AlwaysOn, Default::default());
        let spec = CustodyTimerSpec::default();
        let mut log = ForwardingLog::default();

        assert_eq!(log.get_latest_entry_state(&a), ForwardingState::None);
        assert!(!log.update(&a, ForwardingState::Transmitted));

        log.add_entry(&a, ForwardingAction::Forward, ForwardingState::InFlight, spec);
        log.add_entry(&b, ForwardingAction::Copy, ForwardingState::InFlight, spec);
        assert!(log.update(&a, ForwardingState::Transmitted));
        assert_eq!(log.get_latest_entry_state(&a), ForwardingState::Transmitted);
        assert_eq!(log.get_latest_entry_state(&b), ForwardingState::InFlight);

        log.add_entry(&a, ForwardingAction::Forward, ForwardingState::InFlight, spec);
        assert_eq!(log.get_latest_entry_state(&a), ForwardingState::InFlight);
        assert_eq!(log.len(), 3);

        assert_eq!(log.get_transmission_count(None, false), 1);
        assert_eq!(log.get_transmission_count(None, true), 3);
        assert_eq!(log.get_transmission_count(Some(ForwardingAction::Copy), true), 1);
        assert_eq!(
            log.get_count(&[ForwardingState::InFlight], Some(ForwardingAction::Forward)),
            1
        );
    }

    #[test]
    fn same_next_hop_through_another_link() {
        let first = link::Link::new("first", "tcp", "peer:4556", link::LinkType::OnDemand, Default::default());
        let second = link::Link::new("second", "tcp", "peer:4556", link::LinkType::OnDemand, Default::default());
        let mut log = ForwardingLog::default();

        log.add_entry(&first, ForwardingAction::Forward, ForwardingState::InFlight, CustodyTimerSpec::default());
        assert!(log.update(&second, ForwardingState::Transmitted));
        assert_eq!(log.get_latest_entry_state(&first), ForwardingState::Transmitted);
        assert_eq!(log.get_latest_entry(&second).map(|e| e.link.as_ref()), Some("first"));
    }
}
