use common::RegistrationOutcome;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub hardware_id: String,
    pub specification_token: String,
    pub registered_at: SystemTime,
}

/// Registered devices, keyed by hardware id
#[derive(Clone)]
pub struct DeviceManager {
    devices: Arc<DashMap<String, DeviceRecord>>,
    specifications: Arc<HashSet<String>>,
}

impl DeviceManager {
    /// `specifications` lists the accepted specification tokens; empty accepts any
    pub fn new(specifications: impl IntoIterator<Item = String>) -> Self {
        Self {
            devices: Arc::new(DashMap::new()),
            specifications: Arc::new(specifications.into_iter().collect()),
        }
    }

    /// Register a device, rejecting unknown specifications
    pub fn register(&self, hardware_id: &str, specification_token: &str) -> RegistrationOutcome {
        if !self.specifications.is_empty() && !self.specifications.contains(specification_token) {
            warn!(
                "Rejecting {}: unknown specification {}",
                hardware_id, specification_token
            );
            return RegistrationOutcome::Error {
                reason: format!("unknown specification: {}", specification_token),
            };
        }

        if self.devices.contains_key(hardware_id) {
            return RegistrationOutcome::AlreadyRegistered;
        }

        self.devices.insert(
            hardware_id.to_string(),
            DeviceRecord {
                hardware_id: hardware_id.to_string(),
                specification_token: specification_token.to_string(),
                registered_at: SystemTime::now(),
            },
        );
        info!("✓ Device registered: {}", hardware_id);
        RegistrationOutcome::NewRegistration
    }

    pub fn get_device(&self, hardware_id: &str) -> Option<DeviceRecord> {
        self.devices
            .get(hardware_id)
            .map(|entry| entry.value().clone())
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_then_already_registered() {
        let manager = DeviceManager::new(Vec::new());
        assert_eq!(
            manager.register("device_001", "spec-1"),
            RegistrationOutcome::NewRegistration
        );
        assert_eq!(
            manager.register("device_001", "spec-1"),
            RegistrationOutcome::AlreadyRegistered
        );
        assert_eq!(manager.device_count(), 1);
        assert_eq!(
            manager.get_device("device_001").unwrap().specification_token,
            "spec-1"
        );
    }

    #[test]
    fn test_unknown_specification_rejected() {
        let manager = DeviceManager::new(vec!["spec-1".to_string()]);
        assert!(matches!(
            manager.register("device_001", "spec-9"),
            RegistrationOutcome::Error { .. }
        ));
        assert!(manager.get_device("device_001").is_none());
    }
}
