//! End-to-end tests: scanner rounds against in-memory venues and real sinks.

mod mock_venue;
mod round;
