// xtask - Build automation for patina
// Copyright (c) 2025 Tom Waddington. MIT licensed.

use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::{exit, Command};

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("install") => install(&args[1..]),
        Some("uninstall") => uninstall(&args[1..]),
        Some("help") | Some("-h") | Some("--help") | None => help(),
        Some(cmd) => {
            eprintln!("Unknown command: {}", cmd);
            help();
            exit(1);
        }
    }
}

fn help() {
    println!(
        r#"patina xtask - Build automation

USAGE:
    cargo xtask <COMMAND>

COMMANDS:
    install [--prefix <PATH>]   Build release and install to ~/.cargo/bin (or PREFIX/bin)
    uninstall [--prefix <PATH>] Remove installed files
    help                        Show this message
"#
    );
}

fn get_bin_dir(args: &[String]) -> PathBuf {
    let prefix = if let Some(pos) = args.iter().position(|a| a == "--prefix") {
        args.get(pos + 1).map(PathBuf::from).unwrap_or_else(|| {
            eprintln!("--prefix requires a path argument");
            exit(1);
        })
    } else {
        dirs_home().join(".cargo")
    };
    prefix.join("bin")
}

fn dirs_home() -> PathBuf {
    env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| {
        eprintln!("Could not determine home directory");
        exit(1);
    })
}

fn project_root() -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    PathBuf::from(manifest_dir).parent().unwrap().to_path_buf()
}

fn install(args: &[String]) {
    let bin_dir = get_bin_dir(args);
    let root = project_root();

    println!("Building release...");
    let status = Command::new("cargo")
        .args(["build", "--release"])
        .current_dir(&root)
        .status()
        .expect("Failed to run cargo build");

    if !status.success() {
        eprintln!("Build failed");
        exit(1);
    }

    fs::create_dir_all(&bin_dir).expect("Failed to create bin directory");

    let src_binary = root.join("target/release/patina");
    let dst_binary = bin_dir.join("patina");
    println!(
        "Installing {} -> {}",
        src_binary.display(),
        dst_binary.display()
    );
    fs::copy(&src_binary, &dst_binary).expect("Failed to copy patina binary");
    fs::set_permissions(&dst_binary, fs::Permissions::from_mode(0o755))
        .expect("Failed to set permissions");

    println!("\nInstalled patina to {}", bin_dir.display());
    println!("Ensure {} is in your PATH", bin_dir.display());
}

fn uninstall(args: &[String]) {
    let bin_dir = get_bin_dir(args);

    let patina = bin_dir.join("patina");
    if patina.exists() {
        println!("Removing {}", patina.display());
        fs::remove_file(&patina).expect("Failed to remove file");
    }

    println!("Uninstalled patina from {}", bin_dir.display());
}
