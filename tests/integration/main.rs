//! Integration tests: full pipeline against a deterministic in-memory forecaster.

mod mock_forecaster;
mod pipeline;
