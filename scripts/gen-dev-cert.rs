//! Development certificate for the arena server
//!
//! Run from the repository root: `cargo run --manifest-path scripts/Cargo.toml [out-dir]`
//!
//! Writes a self-signed localhost certificate to `certs/` (or `out-dir`),
//! the location the server falls back to when TLS_CERT_PATH is unset.
//! Browsers only pin certificates valid for at most 14 days, so rerun this
//! when it expires.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use ring::digest::{digest, SHA256};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, SystemTime};

type BoxError = Box<dyn std::error::Error>;

const VALIDITY: Duration = Duration::from_secs(14 * 24 * 60 * 60);

fn main() -> Result<(), BoxError> {
    let out_dir = PathBuf::from(std::env::args().nth(1).unwrap_or_else(|| "certs".to_string()));
    let cert_file = out_dir.join("cert.pem");
    let key_file = out_dir.join("key.pem");

    if cert_file.exists() && key_file.exists() {
        println!("Reusing certificate in {}/ (delete it to regenerate)\n", out_dir.display());
    } else {
        generate(&out_dir, &cert_file, &key_file)?;
    }

    print_pins(&cert_file)
}

fn generate(out_dir: &Path, cert_file: &Path, key_file: &Path) -> Result<(), BoxError> {
    fs::create_dir_all(out_dir)?;

    let mut params = CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])?;
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, "Slither Arena Dev");
    name.push(DnType::OrganizationName, "Slither Arena");
    params.distinguished_name = name;

    let now = SystemTime::now();
    params.not_before = now.into();
    params.not_after = (now + VALIDITY).into();

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    fs::write(cert_file, cert.pem())?;
    fs::write(key_file, key_pair.serialize_pem())?;
    println!("Wrote {} and {}\n", cert_file.display(), key_file.display());
    Ok(())
}

fn print_pins(cert_file: &Path) -> Result<(), BoxError> {
    let pem = pem::parse(fs::read_to_string(cert_file)?)?;
    let cert_hash = STANDARD.encode(digest(&SHA256, pem.contents()).as_ref());

    println!("serverCertificateHashes (client config):");
    println!("  {}\n", cert_hash);

    match spki_hash(cert_file) {
        Some(spki) => {
            println!("Chrome flag:");
            println!("  --ignore-certificate-errors-spki-list={}", spki);
        }
        None => println!("openssl not available, skipping the SPKI pin"),
    }
    Ok(())
}

/// SHA-256 of the SubjectPublicKeyInfo, via the openssl CLI
fn spki_hash(cert_file: &Path) -> Option<String> {
    let pipeline = format!(
        "openssl x509 -in {} -pubkey -noout | openssl pkey -pubin -outform der | openssl dgst -sha256 -binary | base64",
        cert_file.display()
    );
    let output = Command::new("sh").arg("-c").arg(pipeline).output().ok()?;
    let hash = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (output.status.success() && !hash.is_empty()).then_some(hash)
}
