fn main() {
    // ESP-IDF build configuration
    embuild::espidf::sysenv::output();

    // config.ron is baked into the image
    println!("cargo:rerun-if-changed=config.ron");
    println!("cargo:rerun-if-changed=build.rs");
}
