/// Compiles `proto/accountd.proto` into gRPC client and server bindings.
///
/// The encoded file descriptor set is written next to the generated code so
/// the server can expose it through `tonic-reflection`.
///
/// # Panics
///
/// Panics if code generation fails; there is nothing useful a build script
/// can do besides surfacing the `protoc` error.
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("accountd_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    println!("cargo:rerun-if-changed=proto/accountd.proto");

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/accountd.proto"], &["proto"])
        .unwrap();
}
