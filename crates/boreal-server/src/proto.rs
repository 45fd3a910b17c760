//! Generated bindings for the `boreal` protobuf package.

tonic::include_proto!("boreal");

/// Encoded file descriptor set, registered with the reflection service.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("boreal_descriptor");
