//! An interpreting instruction-execution core for the RV64I base integer
//! instruction set.
//!
//! This crate decodes a single 32-bit RISC-V instruction word, computes its
//! architectural effect against a [`Hart`] (register file + program
//! counter), and performs memory accesses through a caller-supplied
//! [`Bus`]. It does not fetch instructions, does not load programs, and
//! implements no extension beyond the RV64I base.
//!
//! ```
//! use rv64i_core::bus::Bus;
//! use rv64i_core::execute::execute_raw;
//! use rv64i_core::hart::Hart;
//!
//! # struct NullBus;
//! # impl Bus for NullBus {
//! #     fn load8(&mut self, _: u64) -> Result<u8, rv64i_core::bus::BusError> { unimplemented!() }
//! #     fn load16(&mut self, _: u64) -> Result<u16, rv64i_core::bus::BusError> { unimplemented!() }
//! #     fn load32(&mut self, _: u64) -> Result<u32, rv64i_core::bus::BusError> { unimplemented!() }
//! #     fn load64(&mut self, _: u64) -> Result<u64, rv64i_core::bus::BusError> { unimplemented!() }
//! #     fn store8(&mut self, _: u64, _: u8) -> Result<(), rv64i_core::bus::BusError> { unimplemented!() }
//! #     fn store16(&mut self, _: u64, _: u16) -> Result<(), rv64i_core::bus::BusError> { unimplemented!() }
//! #     fn store32(&mut self, _: u64, _: u32) -> Result<(), rv64i_core::bus::BusError> { unimplemented!() }
//! #     fn store64(&mut self, _: u64, _: u64) -> Result<(), rv64i_core::bus::BusError> { unimplemented!() }
//! # }
//! let mut hart = Hart::new(0);
//! let mut bus = NullBus;
//! // addi x1, x0, 1
//! execute_raw(&mut hart, &mut bus, 0x0010_0093).unwrap();
//! assert_eq!(1, hart.x(rv64i_core::hart::Specifier::from_u5(1)));
//! ```

#[macro_use]
extern crate static_assertions;

pub mod bus;
pub mod decode;
pub mod exception;
pub mod execute;
pub mod hart;
pub mod instruction;

pub use bus::{Bus, BusError};
pub use exception::Exception;
pub use execute::{execute, execute_raw};
pub use hart::{Hart, Specifier};
pub use instruction::Instruction;
