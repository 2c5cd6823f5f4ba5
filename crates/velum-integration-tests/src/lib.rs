//! Integration tests for the Velum overlay.
//!
//! No library code lives here. The `tests/` directory exercises flows that
//! span several workspace crates: wrap/peel roundtrips over every supported
//! path length, live mix nodes over the in-process test relay, and the full
//! client to ingress to hops to plaintext pipeline.
