//! End-to-end tests for Courier live under `tests/`.
