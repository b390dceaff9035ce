//! # Control Bus Test Suite
//!
//! Multi-bus scenarios run in one process: a server bus and one or more
//! client buses talking over loopback TCP.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── fixtures.rs          # Wire events, configs, polling helpers
//!     ├── flows.rs             # Client -> server delivery, ordering, fallback
//!     ├── forwarding.rs        # Selective server -> client forwarding
//!     └── request_response.rs  # Response routing + ResponseStore
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p bus-tests
//! cargo test -p bus-tests integration::forwarding::
//! ```

pub mod integration;
