fn main() {
    println!("cargo:rerun-if-changed=native/dht22.c");

    // The native polling library only exists for the GPIO backend; plain
    // builds must not require pigpio on the build host.
    if std::env::var_os("CARGO_FEATURE_GPIO").is_some() {
        cc::Build::new().file("native/dht22.c").compile("dht22");
        println!("cargo:rustc-link-lib=pigpio");
        println!("cargo:rustc-link-lib=pthread");
    }
}
