//! Integration tests: full job lifecycles against in-memory doubles and
//! the paper venue.

mod job_lifecycle;
mod mock_venue;
