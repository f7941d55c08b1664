//! The memory-access interface [`crate::execute`] uses for `LOAD`/`STORE`.
//!
//! `Bus` is deliberately small: six fixed-width, fallible, little-endian
//! accessors. Alignment checking is the bus's policy, not the executor's —
//! a bus backed by word-addressable memory may reject any misaligned
//! access, while a byte-addressable bus may allow it.

use thiserror::Error;

/// The memory-access interface supplied by the caller.
///
/// Implementors decide whether a given `address` is valid, whether it must
/// be naturally aligned, and what backs the access (RAM, ROM, a
/// memory-mapped device, or nothing at all). All accesses are little-endian.
pub trait Bus {
    fn load8(&mut self, address: u64) -> Result<u8, BusError>;
    fn load16(&mut self, address: u64) -> Result<u16, BusError>;
    fn load32(&mut self, address: u64) -> Result<u32, BusError>;
    fn load64(&mut self, address: u64) -> Result<u64, BusError>;

    fn store8(&mut self, address: u64, value: u8) -> Result<(), BusError>;
    fn store16(&mut self, address: u64, value: u16) -> Result<(), BusError>;
    fn store32(&mut self, address: u64, value: u32) -> Result<(), BusError>;
    fn store64(&mut self, address: u64, value: u64) -> Result<(), BusError>;
}

/// A failed bus access. The inner value is always the faulting address.
#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
pub enum BusError {
    /// The address does not satisfy the bus's alignment requirement for the
    /// access width.
    #[error("misaligned bus access at {0:#018x}")]
    Misaligned(u64),
    /// The address is otherwise inaccessible (out of range, unmapped, or
    /// protected).
    #[error("bus access fault at {0:#018x}")]
    AccessFault(u64),
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::{Bus, BusError};

    /// A flat, little-endian, `Vec<u8>`-backed [`Bus`] for unit tests.
    ///
    /// Out-of-range accesses are reported as [`BusError::AccessFault`];
    /// misaligned accesses are *not* rejected, since this is meant to
    /// exercise the executor's own bus-error handling, not to double as a
    /// conformance harness for bus implementors.
    #[derive(Debug, Clone)]
    pub struct FlatBus {
        memory: Vec<u8>,
    }

    impl FlatBus {
        pub fn new(size: usize) -> Self {
            Self {
                memory: vec![0; size],
            }
        }

        pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
            Self {
                memory: bytes.into(),
            }
        }

        fn slice(&self, address: u64, width: usize) -> Result<&[u8], BusError> {
            let start = usize::try_from(address).map_err(|_| BusError::AccessFault(address))?;
            let end = start.checked_add(width).ok_or(BusError::AccessFault(address))?;
            self.memory
                .get(start..end)
                .ok_or(BusError::AccessFault(address))
        }

        fn slice_mut(&mut self, address: u64, width: usize) -> Result<&mut [u8], BusError> {
            let start = usize::try_from(address).map_err(|_| BusError::AccessFault(address))?;
            let end = start.checked_add(width).ok_or(BusError::AccessFault(address))?;
            self.memory
                .get_mut(start..end)
                .ok_or(BusError::AccessFault(address))
        }
    }

    impl Bus for FlatBus {
        fn load8(&mut self, address: u64) -> Result<u8, BusError> {
            Ok(self.slice(address, 1)?[0])
        }

        fn load16(&mut self, address: u64) -> Result<u16, BusError> {
            let bytes: [u8; 2] = self.slice(address, 2)?.try_into().unwrap();
            Ok(u16::from_le_bytes(bytes))
        }

        fn load32(&mut self, address: u64) -> Result<u32, BusError> {
            let bytes: [u8; 4] = self.slice(address, 4)?.try_into().unwrap();
            Ok(u32::from_le_bytes(bytes))
        }

        fn load64(&mut self, address: u64) -> Result<u64, BusError> {
            let bytes: [u8; 8] = self.slice(address, 8)?.try_into().unwrap();
            Ok(u64::from_le_bytes(bytes))
        }

        fn store8(&mut self, address: u64, value: u8) -> Result<(), BusError> {
            self.slice_mut(address, 1)?.copy_from_slice(&value.to_le_bytes());
            Ok(())
        }

        fn store16(&mut self, address: u64, value: u16) -> Result<(), BusError> {
            self.slice_mut(address, 2)?.copy_from_slice(&value.to_le_bytes());
            Ok(())
        }

        fn store32(&mut self, address: u64, value: u32) -> Result<(), BusError> {
            self.slice_mut(address, 4)?.copy_from_slice(&value.to_le_bytes());
            Ok(())
        }

        fn store64(&mut self, address: u64, value: u64) -> Result<(), BusError> {
            self.slice_mut(address, 8)?.copy_from_slice(&value.to_le_bytes());
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_round_trip() {
            let mut bus = FlatBus::new(16);
            bus.store64(0, 0x0123_4567_89AB_CDEF).unwrap();
            assert_eq!(0x0123_4567_89AB_CDEF, bus.load64(0).unwrap());
            assert_eq!(0xEF, bus.load8(0).unwrap());
            assert_eq!(0xCDEF, bus.load16(0).unwrap());
        }

        #[test]
        fn test_out_of_range() {
            let mut bus = FlatBus::new(4);
            assert_eq!(Err(BusError::AccessFault(4)), bus.load8(4));
            assert_eq!(Err(BusError::AccessFault(1)), bus.load64(1));
        }
    }
}
