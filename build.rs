use std::env;

fn main() {
    println!("cargo:rerun-if-changed=src/kernel.ld");
    println!("cargo:rerun-if-env-changed=LOG");

    // Only the bare-metal image gets the kernel linker script; host builds
    // (unit and integration tests) link normally.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("none") {
        let manifest = env::var("CARGO_MANIFEST_DIR").unwrap();
        println!("cargo:rustc-link-arg-bins=-T{}/src/kernel.ld", manifest);
    }
}
