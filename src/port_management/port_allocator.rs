use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::configuration::types::PortConfig;
use crate::error_handling::types::PortError;
use crate::port_management::types::{PortInfo, ServiceEndpoint};
use crate::storage::types::{PortRange, UserId};
use crate::storage::user_records::UserRecordTable;

/// Hands out disjoint host port ranges and maps container listeners into them.
///
/// Range reservations live in an in-memory index seeded from the persisted records,
/// so a restart never reassigns a range that is still in use. Mapping state lives in
/// each user's record and is mutated under that user's record lock.
pub struct PortAllocator {
    records: Arc<UserRecordTable>,
    config: PortConfig,
    public_host: String,
    ranges: Mutex<BTreeMap<UserId, PortRange>>,
}

impl PortAllocator {
    pub async fn new(records: Arc<UserRecordTable>, config: PortConfig, public_host: String) -> Self {
        let ranges: BTreeMap<UserId, PortRange> = records
            .snapshot()
            .await
            .into_iter()
            .map(|(user_id, record)| (user_id, record.port_range))
            .collect();
        info!("Port allocator loaded {} reserved range(s)", ranges.len());

        Self {
            records,
            config,
            public_host,
            ranges: Mutex::new(ranges),
        }
    }

    /// Returns the user's range, reserving the first free one above the base port
    /// if the user has none yet. Idempotent.
    pub fn allocate_range(&self, user_id: &UserId) -> Result<PortRange, PortError> {
        let mut ranges = self.ranges.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(range) = ranges.get(user_id) {
            return Ok(*range);
        }

        let size = self.config.ports_per_user as u32;
        let mut start = self.config.base_port as u32;
        loop {
            let end = start + size - 1;
            if end > u16::MAX as u32 {
                warn!("Port space exhausted while allocating for user {}", user_id);
                return Err(PortError::RangeExhausted {
                    base: self.config.base_port,
                    size: self.config.ports_per_user,
                });
            }
            let candidate = PortRange::new(start as u16, end as u16);
            if !ranges.values().any(|r| r.overlaps(&candidate)) {
                ranges.insert(user_id.clone(), candidate);
                info!("Allocated ports {} to user {}", candidate, user_id);
                return Ok(candidate);
            }
            start += size;
        }
    }

    /// Drops the user's reservation so the range can be handed out again.
    pub fn release(&self, user_id: &UserId) {
        let mut ranges = self.ranges.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(range) = ranges.remove(user_id) {
            debug!("Released ports {} of user {}", range, user_id);
        }
    }

    pub fn reserved_range(&self, user_id: &UserId) -> Option<PortRange> {
        let ranges = self.ranges.lock().unwrap_or_else(|p| p.into_inner());
        ranges.get(user_id).copied()
    }

    /// Maps every observed internal port to an external port of the user's range.
    ///
    /// Mappings of ports no longer observed are reclaimed first; existing pairs
    /// never move. New ports take the lowest free external port, and ports that
    /// do not fit stay unmapped. Returns the resulting `internal -> external` map.
    pub async fn map_ports(
        &self,
        user_id: &UserId,
        observed: &[u16],
    ) -> Result<BTreeMap<u16, u16>, PortError> {
        let observed: BTreeSet<u16> = observed.iter().copied().collect();
        let mut guard = self.records.lock(user_id).await;
        let mut mappings = BTreeMap::new();

        let found = guard.update(|record| {
            record.mappings.retain(|internal, _| observed.contains(internal));

            for internal in &observed {
                if record.mappings.contains_key(internal) {
                    continue;
                }
                let used: BTreeSet<u16> = record.mappings.values().copied().collect();
                match record.port_range.ports().find(|p| !used.contains(p)) {
                    Some(external) => {
                        debug!("Mapping {} -> {} for user {}", internal, external, user_id);
                        record.mappings.insert(*internal, external);
                    }
                    None => debug!(
                        "No free port left in {} for internal port {}",
                        record.port_range, internal
                    ),
                }
            }

            record.active_ports = observed.iter().copied().collect();
            mappings = record.mappings.clone();
        })?;

        if !found {
            debug!("map_ports called for user {} without a record", user_id);
        }
        Ok(mappings)
    }

    /// Port state as presented to clients, or `None` when the user has no record.
    pub async fn port_info(&self, user_id: &UserId) -> Option<PortInfo> {
        let record = self.records.get(user_id).await?;
        let services = record
            .active_ports
            .iter()
            .map(|internal| {
                let external = record.mappings.get(internal).copied();
                ServiceEndpoint {
                    internal: *internal,
                    external,
                    url: external.map(|port| format!("http://{}:{}", self.public_host, port)),
                }
            })
            .collect();

        Some(PortInfo {
            allocated_range: record.port_range,
            services,
        })
    }

    /// Forgets which ports are listening, keeping the range and mappings.
    pub async fn clear_active_ports(&self, user_id: &UserId) -> Result<(), PortError> {
        let mut guard = self.records.lock(user_id).await;
        guard.update(|record| record.active_ports.clear())?;
        Ok(())
    }

    /// Removes the user's record and range reservation entirely.
    pub async fn cleanup_user(&self, user_id: &UserId) -> Result<(), PortError> {
        let mut guard = self.records.lock(user_id).await;
        guard.remove()?;
        drop(guard);
        self.release(user_id);
        info!("Cleaned up port allocation of user {}", user_id);
        Ok(())
    }
}
