use super::*;
use std::collections::BTreeMap;

/// The daemon's links, by name.
#[derive(Default)]
pub struct LinkTable {
    links: BTreeMap<Arc<str>, LinkRef>,
}

impl LinkTable {
    /// Returns false if a link with the same name is already present.
    pub fn add(&mut self, link: LinkRef) -> bool {
        match self.links.entry(link.name_arc()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(link);
                true
            }
        }
    }

    pub fn del(&mut self, name: &str) -> Option<LinkRef> {
        self.links.remove(name)
    }

    pub fn find(&self, name: &str) -> Option<&LinkRef> {
        self.links.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LinkRef> {
        self.links.values()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Appends one line per link to `out`.
    pub fn dump(&self, out: &mut String) {
        use core::fmt::Write;

        for link in self.links.values() {
            let stats = link.stats();
            _ = writeln!(
                out,
                "{link}: queued {} inflight {} transmitted {} contacts {}",
                link.queue.len(),
                link.inflight.len(),
                stats.bundles_transmitted,
                stats.contacts
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_are_rejected() {
        let mut table = LinkTable::default();
        assert!(table.add(Link::new("a", "tcp", "x", LinkType::AlwaysOn, LinkParams::default())));
        assert!(!table.add(Link::new("a", "udp", "y", LinkType::OnDemand, LinkParams::default())));
        assert_eq!(table.find("a").map(|l| l.clayer_name()), Some("tcp"));

        let mut dump = String::new();
        table.dump(&mut dump);
        assert!(dump.starts_with("a [tcp x]"));

        assert!(table.del("a").is_some());
        assert!(table.is_empty());
    }
}
