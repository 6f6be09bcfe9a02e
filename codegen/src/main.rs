use std::io::Result;
use std::path::PathBuf;

/// Regenerates `spbridge-types/src/generated/sparkplug_payload.rs` from `protos/sparkplug_b.proto`.
///
/// Requires `protoc` on the PATH. The output is checked in so regular builds do not need it.
fn main() -> Result<()> {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let workspace = dir
        .parent()
        .ok_or_else(|| std::io::Error::other("codegen must live inside the workspace"))?;
    let protodir = workspace.join("protos");
    let sparkplug_proto = "sparkplug_b.proto";

    let outdir = workspace.join("spbridge-types/src/generated");

    prost_build::Config::new()
        .out_dir(outdir.clone())
        .compile_protos(&[sparkplug_proto], &[protodir])?;

    let outfile = outdir.join("org.eclipse.tahu.protobuf.rs");
    let renamed = outdir.join("sparkplug_payload.rs");
    std::fs::rename(outfile, renamed)?;

    Ok(())
}
