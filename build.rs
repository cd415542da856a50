use vergen_git2::{BuildBuilder, CargoBuilder, Emitter, Git2Builder};

/// Generates build-time version constants from git metadata.
///
/// For tagged commits this yields the tag name; for commits after a tag,
/// tag + commit count + short SHA; for dirty trees, a `-dirty` suffix.
/// Accessible at compile time via `env!("VERGEN_GIT_DESCRIBE")`.
fn main() {
    let build = BuildBuilder::default()
        .build_timestamp(true)
        .build()
        .expect("failed to configure build info");

    let cargo = CargoBuilder::default()
        .target_triple(true)
        .build()
        .expect("failed to configure cargo info");

    let git2 = Git2Builder::default()
        .describe(true, true, None)
        .sha(true)
        .build()
        .expect("failed to configure git info");

    Emitter::default()
        .add_instructions(&build)
        .expect("failed to add build instructions")
        .add_instructions(&cargo)
        .expect("failed to add cargo instructions")
        .add_instructions(&git2)
        .expect("failed to add git instructions")
        .emit()
        .expect("failed to emit version info");
}
