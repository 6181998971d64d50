use shared::types::AddressMode;
use crate::error::{RegistryError, Result};

/// Coordination data for registries sharing one anycast address.
///
/// Clients seeing several instances prefer the one advertising the
/// preferred sequence number. Nothing here affects stored registrations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnycastCoordinator {
    address_mode: AddressMode,
    sequence_number: u8,
}

impl AnycastCoordinator {
    pub fn new(address_mode: AddressMode, sequence_number: u8) -> Self {
        Self { address_mode, sequence_number }
    }

    pub fn address_mode(&self) -> AddressMode {
        self.address_mode
    }

    pub fn set_address_mode(&mut self, mode: AddressMode) {
        self.address_mode = mode;
    }

    pub fn sequence_number(&self) -> u8 {
        self.sequence_number
    }

    pub fn set_sequence_number(&mut self, sequence_number: u8) {
        self.sequence_number = sequence_number;
    }
}

/// Narrows a sequence number received at an API boundary to its one byte.
pub fn parse_sequence_number(value: u64) -> Result<u8> {
    u8::try_from(value).map_err(|_| {
        RegistryError::InvalidArgs(format!("sequence number {} does not fit in 8 bits", value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let coordinator = AnycastCoordinator::default();
        assert_eq!(coordinator.address_mode(), AddressMode::Unicast);
        assert_eq!(coordinator.sequence_number(), 0);
    }

    #[test]
    fn test_set_sequence_number() {
        let mut coordinator = AnycastCoordinator::default();
        coordinator.set_sequence_number(parse_sequence_number(5).unwrap());
        assert_eq!(coordinator.sequence_number(), 5);
        coordinator.set_sequence_number(parse_sequence_number(200).unwrap());
        assert_eq!(coordinator.sequence_number(), 200);
    }

    #[test]
    fn test_parse_rejects_wide_values() {
        assert_eq!(parse_sequence_number(255), Ok(255));
        assert!(matches!(parse_sequence_number(256), Err(RegistryError::InvalidArgs(_))));
        assert!(matches!(parse_sequence_number(70000), Err(RegistryError::InvalidArgs(_))));
    }
}
