//! Result merging and deduplication for one discovery invocation.
//!
//! The same physical printer often shows up more than once per scan: as a
//! plain and a secured LAN target, or over LAN and Bluetooth at once. The
//! registry collapses those by hardware key, keeping the record whose
//! transport has the better [`Transport::precedence`]. Records without a
//! hardware key are only deduplicated by exact transport and identifier.

use crate::types::DeviceRecord;

/// Ordered, deduplicated list of discovered devices.
///
/// Local to one discovery call; never shared across sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRegistry {
    records: Vec<DeviceRecord>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one record.
    ///
    /// A record replacing a lower-precedence duplicate takes its position, so
    /// the list keeps first-seen order.
    pub fn merge(&mut self, incoming: DeviceRecord) {
        if incoming.hardware_key().is_empty() {
            let duplicate = self.records.iter().any(|r| {
                r.transport() == incoming.transport() && r.identifier() == incoming.identifier()
            });
            if !duplicate {
                self.records.push(incoming);
            }
            return;
        }

        let existing = self
            .records
            .iter_mut()
            .find(|r| r.hardware_key() == incoming.hardware_key());

        match existing {
            Some(existing) => {
                if incoming.transport().precedence() < existing.transport().precedence() {
                    log::debug!(
                        "discovery: {} supersedes {} for {}",
                        incoming.transport(),
                        existing.transport(),
                        incoming.hardware_key()
                    );
                    *existing = incoming;
                }
            }
            None => self.records.push(incoming),
        }
    }

    /// Merge every record from another registry, in its order.
    pub fn merge_all(&mut self, other: DeviceRegistry) {
        for record in other.records {
            self.merge(record);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[DeviceRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<DeviceRecord> {
        self.records
    }
}

impl Extend<DeviceRecord> for DeviceRegistry {
    fn extend<I: IntoIterator<Item = DeviceRecord>>(&mut self, iter: I) {
        for record in iter {
            self.merge(record);
        }
    }
}

impl FromIterator<DeviceRecord> for DeviceRegistry {
    fn from_iter<I: IntoIterator<Item = DeviceRecord>>(iter: I) -> Self {
        let mut registry = Self::new();
        registry.extend(iter);
        registry
    }
}
