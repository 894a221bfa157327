use std::fs;
use std::path::Path;

const CONFIG_HEADER: &str = "device_config.h";
const ROOT_CA: &str = "root_ca.pem";

// Each `#define` becomes a rustc env var of the same name
const SETTINGS: &[&str] = &[
    "WIFI_SSID",
    "WIFI_PASSWORD",
    "FOTA_TOKEN",
    "FOTA_MANIFEST_URL",
    "MQTT_BROKER_URL",
    "DEVICE_ID",
];

fn main() -> anyhow::Result<()> {
    // Necessary for ESP-IDF
    embuild::espidf::sysenv::output();

    // Add crash log helper for better panic diagnostics
    println!("cargo:rustc-link-arg=-Wl,--undefined=esp_backtrace_print_app_description");
    println!("cargo:rerun-if-changed={}", CONFIG_HEADER);

    let contents = if Path::new(CONFIG_HEADER).exists() {
        fs::read_to_string(CONFIG_HEADER)?
    } else {
        println!(
            "cargo:warning={} not found! Copy {}.example to {} and fill in your device settings.",
            CONFIG_HEADER, CONFIG_HEADER, CONFIG_HEADER
        );
        String::new()
    };

    for name in SETTINGS {
        let value = define_value(&contents, name).unwrap_or_default();
        if value.is_empty() && !contents.is_empty() {
            println!("cargo:warning={} is not set in {}", name, CONFIG_HEADER);
        }
        println!("cargo:rustc-env={}={}", name, value);
    }

    // Optional PEM written to the filesystem on first boot; empty means use the bundle
    println!("cargo:rerun-if-changed={}", ROOT_CA);
    let pem = if Path::new(ROOT_CA).exists() {
        fs::read(ROOT_CA)?
    } else {
        Vec::new()
    };
    let out_dir = std::env::var("OUT_DIR")?;
    fs::write(Path::new(&out_dir).join(ROOT_CA), pem)?;

    Ok(())
}

/// Quoted value of `#define NAME "value"`
fn define_value(contents: &str, name: &str) -> Option<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("#define"))
        .find(|l| l.split_whitespace().nth(1) == Some(*name))
        .and_then(|l| l.split('"').nth(1))
        .map(str::to_string)
}
