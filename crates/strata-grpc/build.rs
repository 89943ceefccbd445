fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Compile the REAPI subset this service terminates. Unlike the client
    // crate this was grounded on, we build_server(true): this crate is the
    // RPC server, not a caller of someone else's.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .type_attribute(
            "build.bazel.remote.execution.v2.Digest",
            "#[derive(Eq, Hash)]",
        )
        .compile_protos(
            &[
                "proto/build/bazel/remote/execution/v2/remote_execution.proto",
                "proto/build/bazel/semver/semver.proto",
                "proto/google/bytestream/bytestream.proto",
                "proto/google/rpc/status.proto",
            ],
            &["proto"],
        )?;

    Ok(())
}
