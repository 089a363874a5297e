#![no_std]
extern crate alloc;

pub mod ring;

pub use ring::{SlotRing, Slotted, WHEEL_SLOTS};
