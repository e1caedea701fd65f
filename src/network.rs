//! Network addressing for emulated nodes
//!
//! Provides:
//! - Subnet-backed address plans used to number wireless networks

pub mod addressing;

pub use addressing::{AddressBook, AddressPlan};
