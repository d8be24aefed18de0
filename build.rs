fn main() {
    // Exposes package and toolchain metadata to persisted model bundles
    built::write_built_file().expect("Failed to generate build info");
}
