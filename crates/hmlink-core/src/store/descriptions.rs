// ── Description caches ──
//
// Per-interface registries of controller-advertised capability records.
// Merge on discovery, shrink on device deletion, wipe on clear. Both
// caches persist to JSON files so a restarted central can rebuild its
// graph without re-fetching every interface.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use dashmap::DashMap;
use tracing::debug;

use crate::error::CentralError;
use crate::model::{DeviceDescription, ParameterDescription, ParamsetKey};

pub(crate) const DEVICE_DESCRIPTIONS_FILE: &str = "device_descriptions.json";
pub(crate) const PARAMSET_DESCRIPTIONS_FILE: &str = "paramset_descriptions.json";

/// Whether a cached record belongs to the given device (the device-level
/// record itself or one of its channels).
fn belongs_to_device(record_address: &str, device_address: &str) -> bool {
    record_address == device_address
        || record_address
            .strip_prefix(device_address)
            .is_some_and(|rest| rest.starts_with(':'))
}

// ── Device descriptions ──────────────────────────────────────────────

/// Registry of device and channel description records per interface.
#[derive(Debug, Default)]
pub struct DeviceDescriptionCache {
    by_interface: DashMap<String, BTreeMap<String, DeviceDescription>>,
}

impl DeviceDescriptionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge records into the registry. Re-adding a known address just
    /// replaces the record, so the call is idempotent.
    pub fn add_device_descriptions(&self, interface_id: &str, descriptions: &[DeviceDescription]) {
        let mut records = self.by_interface.entry(interface_id.to_owned()).or_default();
        for description in descriptions {
            records.insert(description.address.clone(), description.clone());
        }
    }

    /// Drop the device record and every channel record it owns.
    /// Unknown addresses are a no-op.
    pub fn remove_device(&self, interface_id: &str, device_address: &str) {
        if let Some(mut records) = self.by_interface.get_mut(interface_id) {
            records.retain(|address, _| !belongs_to_device(address, device_address));
        }
    }

    pub fn get(&self, interface_id: &str, address: &str) -> Option<DeviceDescription> {
        self.by_interface.get(interface_id)?.get(address).cloned()
    }

    /// Device-level addresses known for an interface, sorted.
    pub fn device_addresses(&self, interface_id: &str) -> Vec<String> {
        self.by_interface
            .get(interface_id)
            .map(|records| {
                records
                    .values()
                    .filter(|d| d.is_device())
                    .map(|d| d.address.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Channel addresses of one device, ordered by channel number.
    pub fn channel_addresses(&self, interface_id: &str, device_address: &str) -> Vec<String> {
        let Some(records) = self.by_interface.get(interface_id) else {
            return Vec::new();
        };
        let mut channels: Vec<&DeviceDescription> = records
            .values()
            .filter(|d| !d.is_device() && d.device_address() == device_address)
            .collect();
        channels.sort_by_key(|d| d.channel_no());
        channels.iter().map(|d| d.address.clone()).collect()
    }

    /// Every record address (devices plus channels) for an interface, sorted.
    pub fn record_addresses(&self, interface_id: &str) -> Vec<String> {
        self.by_interface
            .get(interface_id)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Raw record count (devices plus channels) for an interface.
    pub fn record_count(&self, interface_id: &str) -> usize {
        self.by_interface
            .get(interface_id)
            .map(|records| records.len())
            .unwrap_or_default()
    }

    pub fn has_descriptions(&self, interface_id: &str) -> bool {
        self.record_count(interface_id) > 0
    }

    pub fn interface_ids(&self) -> Vec<String> {
        self.by_interface.iter().map(|e| e.key().clone()).collect()
    }

    /// Wipe every interface's records (full resync).
    pub fn clear(&self) {
        self.by_interface.clear();
    }

    pub fn save(&self, dir: &Path) -> Result<(), CentralError> {
        let snapshot: BTreeMap<String, BTreeMap<String, DeviceDescription>> = self
            .by_interface
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        fs::create_dir_all(dir)?;
        let path = dir.join(DEVICE_DESCRIPTIONS_FILE);
        fs::write(&path, serde_json::to_vec_pretty(&snapshot)?)?;
        debug!(path = %path.display(), "saved device descriptions");
        Ok(())
    }

    /// Load persisted records. A missing file is not an error.
    pub fn load(&self, dir: &Path) -> Result<(), CentralError> {
        let path = dir.join(DEVICE_DESCRIPTIONS_FILE);
        if !path.exists() {
            return Ok(());
        }
        let snapshot: BTreeMap<String, BTreeMap<String, DeviceDescription>> =
            serde_json::from_slice(&fs::read(&path)?)?;
        for (interface_id, records) in snapshot {
            self.by_interface.insert(interface_id, records);
        }
        debug!(path = %path.display(), "loaded device descriptions");
        Ok(())
    }
}

// ── Paramset descriptions ────────────────────────────────────────────

type ParamsetMap = BTreeMap<ParamsetKey, BTreeMap<String, ParameterDescription>>;

/// Registry of paramset descriptions per interface, keyed by channel
/// (or device) address and paramset key.
#[derive(Debug, Default)]
pub struct ParamsetDescriptionCache {
    by_interface: DashMap<String, BTreeMap<String, ParamsetMap>>,
}

impl ParamsetDescriptionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_paramset_description(
        &self,
        interface_id: &str,
        channel_address: &str,
        paramset_key: ParamsetKey,
        parameters: HashMap<String, ParameterDescription>,
    ) {
        let mut records = self.by_interface.entry(interface_id.to_owned()).or_default();
        records
            .entry(channel_address.to_owned())
            .or_default()
            .insert(paramset_key, parameters.into_iter().collect());
    }

    pub fn remove_device(&self, interface_id: &str, device_address: &str) {
        if let Some(mut records) = self.by_interface.get_mut(interface_id) {
            records.retain(|address, _| !belongs_to_device(address, device_address));
        }
    }

    pub fn get_paramset_description(
        &self,
        interface_id: &str,
        channel_address: &str,
        paramset_key: ParamsetKey,
    ) -> Option<BTreeMap<String, ParameterDescription>> {
        self.by_interface
            .get(interface_id)?
            .get(channel_address)?
            .get(&paramset_key)
            .cloned()
    }

    pub fn has_channel(&self, interface_id: &str, channel_address: &str) -> bool {
        self.by_interface
            .get(interface_id)
            .is_some_and(|records| records.contains_key(channel_address))
    }

    /// Number of addresses with cached paramsets for an interface.
    pub fn channel_count(&self, interface_id: &str) -> usize {
        self.by_interface
            .get(interface_id)
            .map(|records| records.len())
            .unwrap_or_default()
    }

    /// Distinct (address, parameter) pairs flagged readable, across every
    /// interface and paramset. Drives bulk value refresh.
    pub fn all_readable_parameters(&self) -> BTreeSet<(String, String)> {
        let mut readable = BTreeSet::new();
        for entry in self.by_interface.iter() {
            for (address, paramsets) in entry.value() {
                for parameters in paramsets.values() {
                    for (parameter, description) in parameters {
                        if description.is_readable() {
                            readable.insert((address.clone(), parameter.clone()));
                        }
                    }
                }
            }
        }
        readable
    }

    pub fn clear(&self) {
        self.by_interface.clear();
    }

    pub fn save(&self, dir: &Path) -> Result<(), CentralError> {
        let snapshot: BTreeMap<String, BTreeMap<String, ParamsetMap>> = self
            .by_interface
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        fs::create_dir_all(dir)?;
        let path = dir.join(PARAMSET_DESCRIPTIONS_FILE);
        fs::write(&path, serde_json::to_vec_pretty(&snapshot)?)?;
        debug!(path = %path.display(), "saved paramset descriptions");
        Ok(())
    }

    /// Load persisted records. A missing file is not an error.
    pub fn load(&self, dir: &Path) -> Result<(), CentralError> {
        let path = dir.join(PARAMSET_DESCRIPTIONS_FILE);
        if !path.exists() {
            return Ok(());
        }
        let snapshot: BTreeMap<String, BTreeMap<String, ParamsetMap>> =
            serde_json::from_slice(&fs::read(&path)?)?;
        for (interface_id, records) in snapshot {
            self.by_interface.insert(interface_id, records);
        }
        debug!(path = %path.display(), "loaded paramset descriptions");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{ParameterType, operations};

    const IFACE: &str = "central-BidCos-RF";

    fn device(address: &str, device_type: &str, children: &[&str]) -> DeviceDescription {
        DeviceDescription {
            address: address.into(),
            device_type: device_type.into(),
            parent: None,
            parent_type: None,
            children: children.iter().map(|c| (*c).to_owned()).collect(),
            paramsets: vec!["MASTER".into()],
            sub_type: None,
            firmware: Some("1.0".into()),
            available_firmware: None,
            firmware_updatable: Some(false),
            firmware_update_state: None,
        }
    }

    fn channel(address: &str, parent: &str) -> DeviceDescription {
        DeviceDescription {
            address: address.into(),
            device_type: "CHANNEL".into(),
            parent: Some(parent.into()),
            parent_type: None,
            children: Vec::new(),
            paramsets: vec!["VALUES".into(), "MASTER".into()],
            sub_type: None,
            firmware: None,
            available_firmware: None,
            firmware_updatable: None,
            firmware_update_state: None,
        }
    }

    fn parameter(readable: bool) -> ParameterDescription {
        ParameterDescription {
            parameter_type: ParameterType::Float,
            operations: if readable {
                operations::READ | operations::EVENT
            } else {
                operations::WRITE
            },
            flags: 1,
            default: None,
            min: None,
            max: None,
            unit: None,
            value_list: None,
        }
    }

    fn seeded_device_cache() -> DeviceDescriptionCache {
        let cache = DeviceDescriptionCache::new();
        cache.add_device_descriptions(
            IFACE,
            &[
                device("VCU1", "HmIP-BSM", &["VCU1:0", "VCU1:1"]),
                channel("VCU1:0", "VCU1"),
                channel("VCU1:1", "VCU1"),
                device("VCU10", "HmIP-STHD", &["VCU10:1"]),
                channel("VCU10:1", "VCU10"),
            ],
        );
        cache
    }

    #[test]
    fn merge_is_idempotent() {
        let cache = seeded_device_cache();
        assert_eq!(cache.record_count(IFACE), 5);

        cache.add_device_descriptions(
            IFACE,
            &[device("VCU1", "HmIP-BSM", &["VCU1:0", "VCU1:1"]), channel("VCU1:0", "VCU1")],
        );
        assert_eq!(cache.record_count(IFACE), 5);
    }

    #[test]
    fn device_and_channel_lookups() {
        let cache = seeded_device_cache();
        assert_eq!(cache.device_addresses(IFACE), vec!["VCU1", "VCU10"]);
        assert_eq!(cache.channel_addresses(IFACE, "VCU1"), vec!["VCU1:0", "VCU1:1"]);
        assert!(cache.get(IFACE, "VCU1:1").is_some());
        assert!(cache.get("other", "VCU1").is_none());
    }

    #[test]
    fn remove_device_drops_channels_but_not_neighbors() {
        let cache = seeded_device_cache();
        cache.remove_device(IFACE, "VCU1");
        assert_eq!(cache.record_count(IFACE), 2);
        assert_eq!(cache.device_addresses(IFACE), vec!["VCU10"]);

        // "VCU1" must not strip the records of device "VCU10".
        cache.remove_device(IFACE, "VCU1");
        assert_eq!(cache.record_count(IFACE), 2);
    }

    #[test]
    fn remove_unknown_address_is_noop() {
        let cache = seeded_device_cache();
        cache.remove_device(IFACE, "NOT_A_DEVICE");
        cache.remove_device("NOT_AN_INTERFACE", "VCU1");
        assert_eq!(cache.record_count(IFACE), 5);
    }

    #[test]
    fn readable_parameters_are_distinct_pairs() {
        let cache = ParamsetDescriptionCache::new();
        cache.add_paramset_description(
            IFACE,
            "VCU1:1",
            ParamsetKey::Values,
            HashMap::from([
                ("LEVEL".to_owned(), parameter(true)),
                ("STOP".to_owned(), parameter(false)),
            ]),
        );
        cache.add_paramset_description(
            IFACE,
            "VCU1:1",
            ParamsetKey::Master,
            HashMap::from([("LEVEL".to_owned(), parameter(true))]),
        );
        cache.add_paramset_description(
            "central-HmIP-RF",
            "VCU2:1",
            ParamsetKey::Values,
            HashMap::from([("LEVEL".to_owned(), parameter(true))]),
        );

        // LEVEL on VCU1:1 appears in two paramsets but counts once.
        let readable = cache.all_readable_parameters();
        assert_eq!(
            readable.into_iter().collect::<Vec<_>>(),
            vec![
                ("VCU1:1".to_owned(), "LEVEL".to_owned()),
                ("VCU2:1".to_owned(), "LEVEL".to_owned()),
            ],
        );
    }

    #[test]
    fn clear_and_readd_restores_identical_count() {
        let cache = ParamsetDescriptionCache::new();
        let parameters = HashMap::from([
            ("LEVEL".to_owned(), parameter(true)),
            ("WORKING".to_owned(), parameter(true)),
        ]);
        cache.add_paramset_description(IFACE, "VCU1:1", ParamsetKey::Values, parameters.clone());
        let before = cache.all_readable_parameters().len();

        cache.clear();
        assert_eq!(cache.all_readable_parameters().len(), 0);
        assert_eq!(cache.channel_count(IFACE), 0);

        cache.add_paramset_description(IFACE, "VCU1:1", ParamsetKey::Values, parameters);
        assert_eq!(cache.all_readable_parameters().len(), before);
    }

    #[test]
    fn persistence_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");

        let devices = seeded_device_cache();
        let paramsets = ParamsetDescriptionCache::new();
        paramsets.add_paramset_description(
            IFACE,
            "VCU1:1",
            ParamsetKey::Values,
            HashMap::from([("LEVEL".to_owned(), parameter(true))]),
        );

        devices.save(dir.path()).expect("save devices");
        paramsets.save(dir.path()).expect("save paramsets");

        let restored_devices = DeviceDescriptionCache::new();
        restored_devices.load(dir.path()).expect("load devices");
        assert_eq!(restored_devices.record_count(IFACE), 5);
        assert_eq!(restored_devices.get(IFACE, "VCU1"), devices.get(IFACE, "VCU1"));

        let restored_paramsets = ParamsetDescriptionCache::new();
        restored_paramsets.load(dir.path()).expect("load paramsets");
        assert_eq!(restored_paramsets.channel_count(IFACE), 1);
        assert_eq!(
            restored_paramsets.all_readable_parameters(),
            paramsets.all_readable_parameters(),
        );
    }

    #[test]
    fn load_from_empty_dir_is_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = DeviceDescriptionCache::new();
        cache.load(dir.path()).expect("load");
        assert_eq!(cache.interface_ids().len(), 0);
    }
}
