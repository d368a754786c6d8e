/// Build script for Lucent
///
/// # Shader Strategy:
/// - HLSL shaders under `resources/shaders` are compiled at runtime via D3DCompile,
///   so the build only needs to be re-run when they change.
fn main() {
    println!("cargo:rerun-if-changed=resources/shaders/object.vs.hlsl");
    println!("cargo:rerun-if-changed=resources/shaders/object.ps.hlsl");
}
