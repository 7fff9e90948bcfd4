//! Generates typed ethers bindings for every ABI under `abi/`.
//!
//! Mirrors the original payment-contracts build: glob the ABI directory,
//! run `Abigen` per file, write the combined module into `OUT_DIR`.

use ethers::contract::Abigen;
use std::env;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-changed=abi");

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set by cargo");

    for entry in glob::glob("abi/*.json").expect("invalid glob pattern") {
        let path = entry.expect("failed to read abi dir entry");

        let contract_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .expect("abi file must have a stem")
            .to_string();

        let abigen = Abigen::new(&contract_name, path.to_string_lossy())
            .unwrap_or_else(|e| panic!("failed to load abi {}: {e}", path.display()));

        let bindings = abigen
            .generate()
            .unwrap_or_else(|e| panic!("failed to generate bindings for {contract_name}: {e}"));

        let out_path = Path::new(&out_dir).join(format!("{}.rs", contract_name.to_lowercase()));

        bindings
            .write_to_file(&out_path)
            .unwrap_or_else(|e| panic!("failed to write bindings to {}: {e}", out_path.display()));
    }
}
