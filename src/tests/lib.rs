//! End-to-end tests for the Diameter charging agent live in `integration/`.
