//! Generated protobuf code.

#[path = "mesh.identity.v1.rs"]
pub mod identity;
