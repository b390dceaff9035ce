//! # Integration Scenarios
//!
//! Every scenario binds its server to port 0 and points clients at the
//! address the server reports, so scenarios can run in parallel.

pub mod fixtures;

mod flows;
mod forwarding;
mod request_response;
