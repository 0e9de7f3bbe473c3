//! Launch specification construction.
//!
//! Local-disk layout comes from a [`DiskLayoutTable`]: instance type →
//! number of instance-store disks. Ephemeral disks take sequential device
//! letters from `b`; persistent volumes continue right after them.

use std::collections::BTreeMap;

use tracing::debug;

use spotfleet_core::{
    BlockDeviceMapping, LaunchSpecification, NetworkConfig, StorageConfig, VolumeClass,
};

use crate::error::{FleetError, FleetResult};

/// Device name prefix for every mapping.
pub const DEVICE_PREFIX: &str = "/dev/sd";

/// First device letter handed out to an ephemeral disk.
pub const EPHEMERAL_BASE_LETTER: char = 'b';

const LAST_DEVICE_LETTER: char = 'z';

/// Instance-store disk counts per instance type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskLayoutTable {
    ephemeral: BTreeMap<String, u32>,
}

impl Default for DiskLayoutTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DiskLayoutTable {
    /// The storage-optimised families this fleet has always used.
    pub fn builtin() -> Self {
        let ephemeral = [
            ("i2.xlarge", 1),
            ("i2.2xlarge", 2),
            ("i2.4xlarge", 4),
            ("i2.8xlarge", 8),
        ]
        .into_iter()
        .map(|(t, n)| (t.to_string(), n))
        .collect();
        Self { ephemeral }
    }

    pub fn empty() -> Self {
        Self {
            ephemeral: BTreeMap::new(),
        }
    }

    /// Add or replace entries.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, u32>) -> Self {
        for (instance_type, disks) in overrides {
            self.ephemeral.insert(instance_type.clone(), *disks);
        }
        self
    }

    /// Number of ephemeral disks for `instance_type`; zero when unlisted.
    pub fn ephemeral_disks(&self, instance_type: &str) -> u32 {
        self.ephemeral.get(instance_type).copied().unwrap_or(0)
    }

    /// Check every entry against the device letter range, including the
    /// persistent volumes that follow the ephemeral slots.
    pub fn validate(&self, storage: Option<&StorageConfig>) -> FleetResult<()> {
        let persistent = storage.map_or(0, |s| s.volume_count);
        let available = LAST_DEVICE_LETTER as u32 - EPHEMERAL_BASE_LETTER as u32 + 1;

        for (instance_type, disks) in &self.ephemeral {
            if *disks == 0 {
                return Err(FleetError::DiskLayout(format!(
                    "{instance_type} lists zero ephemeral disks"
                )));
            }
            if disks + persistent > available {
                return Err(FleetError::DiskLayout(format!(
                    "{instance_type} needs {} device slots, only {available} available",
                    disks + persistent
                )));
            }
        }
        if persistent > available {
            return Err(FleetError::DiskLayout(format!(
                "{persistent} persistent volumes exceed {available} device slots"
            )));
        }
        if let Some(storage) = storage {
            if storage.volume_count > 0 && storage.size_gb == 0 {
                return Err(FleetError::DiskLayout(
                    "persistent volume size must be > 0".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn device_name(offset: u32) -> FleetResult<String> {
    char::from_u32(EPHEMERAL_BASE_LETTER as u32 + offset)
        .filter(|c| *c <= LAST_DEVICE_LETTER)
        .map(|c| format!("{DEVICE_PREFIX}{c}"))
        .ok_or_else(|| FleetError::DiskLayout(format!("device slot {offset} out of range")))
}

/// `count` ephemeral mappings: `/dev/sdb` → `ephemeral0`, `/dev/sdc` → `ephemeral1`, ...
pub fn ephemeral_mappings(count: u32) -> FleetResult<Vec<BlockDeviceMapping>> {
    (0..count)
        .map(|i| -> FleetResult<BlockDeviceMapping> {
            Ok(BlockDeviceMapping::Ephemeral {
                device_name: device_name(i)?,
                virtual_name: format!("ephemeral{i}"),
            })
        })
        .collect()
}

/// Persistent volume mappings placed after `ephemeral_count` slots.
pub fn persistent_mappings(
    ephemeral_count: u32,
    storage: &StorageConfig,
) -> FleetResult<Vec<BlockDeviceMapping>> {
    let volume_class = match storage.iops {
        Some(_) => VolumeClass::HighIops,
        None => VolumeClass::GeneralPurpose,
    };
    (0..storage.volume_count)
        .map(|i| -> FleetResult<BlockDeviceMapping> {
            Ok(BlockDeviceMapping::Persistent {
                device_name: device_name(ephemeral_count + i)?,
                size_gb: storage.size_gb,
                volume_class,
                iops: storage.iops,
                delete_on_termination: true,
            })
        })
        .collect()
}

/// Builds per-zone launch specifications for the fleet's image.
#[derive(Debug, Clone)]
pub struct LaunchSpecBuilder {
    image_id: String,
    user_data: String,
    network: NetworkConfig,
    layouts: DiskLayoutTable,
    storage: Option<StorageConfig>,
}

impl LaunchSpecBuilder {
    /// Create a builder. The disk layout table is validated here so a bad
    /// table fails at startup rather than mid-fleet.
    pub fn new(
        image_id: &str,
        user_data: &str,
        network: NetworkConfig,
        layouts: DiskLayoutTable,
        storage: Option<StorageConfig>,
    ) -> FleetResult<Self> {
        layouts.validate(storage.as_ref())?;
        Ok(Self {
            image_id: image_id.to_string(),
            user_data: user_data.to_string(),
            network,
            layouts,
            storage,
        })
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Launch specification for `instance_type` in `zone`.
    pub fn build(&self, instance_type: &str, zone: &str) -> FleetResult<LaunchSpecification> {
        let subnet_id = self
            .network
            .subnet_for(zone)
            .ok_or_else(|| FleetError::UnknownZone(zone.to_string()))?;

        let ephemeral = self.layouts.ephemeral_disks(instance_type);
        let mut block_device_mappings = ephemeral_mappings(ephemeral)?;
        let mut ebs_optimized = false;

        if let Some(storage) = &self.storage {
            block_device_mappings.extend(persistent_mappings(ephemeral, storage)?);
            ebs_optimized = storage.iops.is_some() && storage.volume_count > 0;
        }

        debug!(
            %instance_type,
            %zone,
            devices = block_device_mappings.len(),
            "built launch specification"
        );

        Ok(LaunchSpecification {
            image_id: self.image_id.clone(),
            key_name: self.network.key_name.clone(),
            security_group_ids: self.network.security_group_ids.clone(),
            subnet_id: subnet_id.to_string(),
            instance_type: instance_type.to_string(),
            user_data: self.user_data.clone(),
            block_device_mappings,
            ebs_optimized,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> NetworkConfig {
        NetworkConfig {
            key_name: "fleet-key".to_string(),
            security_group_ids: vec!["sg-1".to_string(), "sg-2".to_string()],
            subnets: [("us-west-2a".to_string(), "subnet-a".to_string())]
                .into_iter()
                .collect(),
        }
    }

    fn device_names(spec: &LaunchSpecification) -> Vec<&str> {
        spec.block_device_mappings
            .iter()
            .map(BlockDeviceMapping::device_name)
            .collect()
    }

    #[test]
    fn two_disk_family_gets_two_slots() {
        let builder =
            LaunchSpecBuilder::new("ami-1", "payload", network(), DiskLayoutTable::builtin(), None)
                .unwrap();
        let spec = builder.build("i2.2xlarge", "us-west-2a").unwrap();

        assert_eq!(spec.subnet_id, "subnet-a");
        assert_eq!(spec.key_name, "fleet-key");
        assert_eq!(spec.user_data, "payload");
        assert_eq!(
            spec.block_device_mappings,
            vec![
                BlockDeviceMapping::Ephemeral {
                    device_name: "/dev/sdb".to_string(),
                    virtual_name: "ephemeral0".to_string(),
                },
                BlockDeviceMapping::Ephemeral {
                    device_name: "/dev/sdc".to_string(),
                    virtual_name: "ephemeral1".to_string(),
                },
            ]
        );
        assert!(!spec.ebs_optimized);
    }

    #[test]
    fn eight_disk_family_runs_b_through_i() {
        let builder =
            LaunchSpecBuilder::new("ami-1", "", network(), DiskLayoutTable::builtin(), None)
                .unwrap();
        let spec = builder.build("i2.8xlarge", "us-west-2a").unwrap();
        assert_eq!(
            device_names(&spec),
            vec![
                "/dev/sdb", "/dev/sdc", "/dev/sdd", "/dev/sde", "/dev/sdf", "/dev/sdg",
                "/dev/sdh", "/dev/sdi"
            ]
        );
    }

    #[test]
    fn unlisted_type_has_no_local_disks() {
        let builder =
            LaunchSpecBuilder::new("ami-1", "", network(), DiskLayoutTable::builtin(), None)
                .unwrap();
        let spec = builder.build("m4.large", "us-west-2a").unwrap();
        assert!(spec.block_device_mappings.is_empty());
    }

    #[test]
    fn unknown_zone_is_rejected() {
        let builder =
            LaunchSpecBuilder::new("ami-1", "", network(), DiskLayoutTable::builtin(), None)
                .unwrap();
        let err = builder.build("m4.large", "eu-west-1a").unwrap_err();
        assert!(matches!(err, FleetError::UnknownZone(z) if z == "eu-west-1a"));
    }

    #[test]
    fn persistent_volumes_follow_ephemeral_slots() {
        let storage = StorageConfig {
            volume_count: 2,
            size_gb: 500,
            iops: None,
        };
        let builder = LaunchSpecBuilder::new(
            "ami-1",
            "",
            network(),
            DiskLayoutTable::builtin(),
            Some(storage),
        )
        .unwrap();
        let spec = builder.build("i2.2xlarge", "us-west-2a").unwrap();

        assert_eq!(
            device_names(&spec),
            vec!["/dev/sdb", "/dev/sdc", "/dev/sdd", "/dev/sde"]
        );
        match &spec.block_device_mappings[2] {
            BlockDeviceMapping::Persistent {
                size_gb,
                volume_class,
                delete_on_termination,
                ..
            } => {
                assert_eq!(*size_gb, 500);
                assert_eq!(*volume_class, VolumeClass::GeneralPurpose);
                assert!(*delete_on_termination);
            }
            other => panic!("expected persistent mapping, got {other:?}"),
        }
        assert!(!spec.ebs_optimized);
    }

    #[test]
    fn iops_selects_high_iops_class() {
        let storage = StorageConfig {
            volume_count: 1,
            size_gb: 100,
            iops: Some(500),
        };
        let mappings = persistent_mappings(0, &storage).unwrap();
        assert_eq!(
            mappings,
            vec![BlockDeviceMapping::Persistent {
                device_name: "/dev/sdb".to_string(),
                size_gb: 100,
                volume_class: VolumeClass::HighIops,
                iops: Some(500),
                delete_on_termination: true,
            }]
        );

        let builder = LaunchSpecBuilder::new(
            "ami-1",
            "",
            network(),
            DiskLayoutTable::builtin(),
            Some(storage),
        )
        .unwrap();
        assert!(builder.build("m4.large", "us-west-2a").unwrap().ebs_optimized);
    }

    #[test]
    fn overrides_extend_builtin_table() {
        let overrides = [("i3.2xlarge".to_string(), 1)].into_iter().collect();
        let table = DiskLayoutTable::builtin().with_overrides(&overrides);
        assert_eq!(table.ephemeral_disks("i3.2xlarge"), 1);
        assert_eq!(table.ephemeral_disks("i2.4xlarge"), 4);
    }

    #[test]
    fn validation_rejects_zero_disk_entry() {
        let overrides = [("bad.type".to_string(), 0)].into_iter().collect();
        let table = DiskLayoutTable::empty().with_overrides(&overrides);
        assert!(table.validate(None).is_err());
    }

    #[test]
    fn validation_rejects_letter_overflow() {
        let storage = StorageConfig {
            volume_count: 20,
            size_gb: 10,
            iops: None,
        };
        // 8 ephemeral + 20 persistent > 25 letters (b..=z).
        assert!(DiskLayoutTable::builtin().validate(Some(&storage)).is_err());
        assert!(LaunchSpecBuilder::new(
            "ami-1",
            "",
            network(),
            DiskLayoutTable::builtin(),
            Some(storage)
        )
        .is_err());
    }

    #[test]
    fn builtin_table_is_valid() {
        DiskLayoutTable::builtin().validate(None).unwrap();
    }
}
