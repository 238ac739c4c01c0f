//! Provides architecture-agnostic I2C-related types.

pub mod controller;
