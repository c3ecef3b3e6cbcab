// Vendors its own `protoc` so the gRPC registry client builds without a
// system protobuf compiler.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let protoc = protoc_bin_vendored::protoc_bin_path()?;
    std::env::set_var("PROTOC", protoc);
    tonic_build::configure().compile(&["proto/registry.proto"], &["proto"])?;
    Ok(())
}
