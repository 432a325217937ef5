fn main() {
    let mut features = vec!["base".to_string()];
    if cfg!(feature = "pdf") {
        features.push("pdf".to_string());
    }
    println!("cargo:rustc-env=TMPLDIFF_FEATURES={}", features.join(", "));
}
