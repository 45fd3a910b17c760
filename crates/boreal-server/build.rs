use std::env;
use std::path::PathBuf;

fn main() {
    if env::var_os("PROTOC").is_none() {
        env::set_var("PROTOC", protobuf_src::protoc());
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let descriptor_path = out_dir.join("boreal_descriptor.bin");

    // The descriptor set feeds the gRPC reflection service.
    tonic_build::configure()
        .file_descriptor_set_path(&descriptor_path)
        .compile_protos(&["proto/boreal.proto"], &["proto"])
        .expect("failed to compile proto/boreal.proto");
}
