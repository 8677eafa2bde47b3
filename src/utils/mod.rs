// Utilities module
//
// This module contains common helper functions:
// - host: Host/port splitting and loopback checks
// - path: ACME challenge path resolution
// - validation: Common validation helpers

pub mod host;
pub mod path;
pub mod validation;
