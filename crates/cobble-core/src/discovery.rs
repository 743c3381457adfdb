//! GATT discovery cache for the current connection
//!
//! Holds every service and characteristic the adapter reported since the last
//! connect attempt, plus the negotiated MTU. Entries keep discovery order and a
//! characteristic is unique by UUID for the lifetime of one connection.

use std::collections::HashMap;

use crate::config::CobbleConfig;
use crate::types::{Capabilities, CharacteristicRecord, GattUuid, ServiceRecord};

// ----------------------------------------------------------------------------
// Discovery Cache
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct DiscoveryCache {
    services: Vec<ServiceRecord>,
    characteristics: Vec<CharacteristicRecord>,
    by_uuid: HashMap<GattUuid, usize>,
    session_mtu: Option<u16>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a service. Returns `false` if it was already known.
    pub fn add_service(&mut self, uuid: GattUuid) -> bool {
        if self.has_service(&uuid) {
            return false;
        }
        self.services.push(ServiceRecord { uuid });
        true
    }

    pub fn has_service(&self, uuid: &GattUuid) -> bool {
        self.services.iter().any(|service| service.uuid == *uuid)
    }

    /// Record a characteristic, replacing an earlier entry with the same UUID.
    ///
    /// Returns `true` when the owning service was not known yet and has been
    /// added implicitly.
    pub fn add_characteristic(
        &mut self,
        service_uuid: GattUuid,
        uuid: GattUuid,
        capabilities: Capabilities,
    ) -> bool {
        let created_service = self.add_service(service_uuid);
        let record = CharacteristicRecord {
            uuid,
            service_uuid,
            capabilities,
        };

        match self.by_uuid.get(&uuid) {
            Some(&index) => self.characteristics[index] = record,
            None => {
                self.by_uuid.insert(uuid, self.characteristics.len());
                self.characteristics.push(record);
            }
        }
        created_service
    }

    pub fn find_characteristic(&self, uuid: &GattUuid) -> Option<&CharacteristicRecord> {
        self.by_uuid
            .get(uuid)
            .and_then(|&index| self.characteristics.get(index))
    }

    pub fn services(&self) -> &[ServiceRecord] {
        &self.services
    }

    pub fn characteristics(&self) -> &[CharacteristicRecord] {
        &self.characteristics
    }

    /// Characteristics belonging to one service, in discovery order
    pub fn characteristics_of<'a>(
        &'a self,
        service_uuid: &'a GattUuid,
    ) -> impl Iterator<Item = &'a CharacteristicRecord> + 'a {
        self.characteristics
            .iter()
            .filter(move |record| record.service_uuid == *service_uuid)
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.characteristics.is_empty()
    }

    pub fn session_mtu(&self) -> Option<u16> {
        self.session_mtu
    }

    pub fn set_session_mtu(&mut self, mtu: Option<u16>) {
        self.session_mtu = mtu;
    }

    /// Largest payload a single write may carry on this connection
    ///
    /// Uses the negotiated MTU minus the ATT header when one is known, otherwise
    /// the configured fallback. The result is the same for both write types
    /// and never drops below the fallback, since every link carries the ATT
    /// minimum MTU.
    pub fn max_write_size(&self, config: &CobbleConfig) -> usize {
        match self.session_mtu {
            Some(mtu) => usize::from(mtu)
                .saturating_sub(config.att_header_len)
                .max(config.default_write_size),
            None => config.default_write_size,
        }
    }

    /// Forget everything learned from the previous connection
    pub fn clear(&mut self) {
        self.services.clear();
        self.characteristics.clear();
        self.by_uuid.clear();
        self.session_mtu = None;
    }
}
