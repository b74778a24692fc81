//! Integration test entry point.

mod mock_source;
mod scan_cycle;
