//! Build script for greenrt-runtime
//!
//! Merges compile-time configuration:
//! 1. Start with library defaults
//! 2. If GREENRT_CONFIG_RS is set, read `pub const NAME: TYPE = VALUE;`
//!    lines from that file and let them override the defaults
//! 3. Write OUT_DIR/greenrt_merged_config.rs
//!
//! The override file only needs the values that change.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

struct ConfigParam {
    name: &'static str,
    rust_type: &'static str,
    default_value: &'static str,
}

const CONFIG_PARAMS: &[ConfigParam] = &[
    ConfigParam {
        name: "GREEN_THREADS_ENABLED",
        rust_type: "bool",
        default_value: "true",
    },
    ConfigParam {
        // 0 = available parallelism
        name: "NUM_WORKERS",
        rust_type: "usize",
        default_value: "0",
    },
    ConfigParam {
        name: "MAX_GREEN_THREADS",
        rust_type: "usize",
        default_value: "16384",
    },
    ConfigParam {
        name: "STACK_SIZE",
        rust_type: "usize",
        default_value: "256 * 1024",
    },
    ConfigParam {
        name: "RED_ZONE",
        rust_type: "usize",
        default_value: "16 * 1024",
    },
    ConfigParam {
        name: "REUSE_STACKS",
        rust_type: "bool",
        default_value: "true",
    },
    ConfigParam {
        name: "LOCAL_QUEUE_CAPACITY",
        rust_type: "usize",
        default_value: "256",
    },
    ConfigParam {
        name: "GLOBAL_QUEUE_CAPACITY",
        rust_type: "usize",
        default_value: "65536",
    },
    ConfigParam {
        name: "IDLE_SPINS",
        rust_type: "u32",
        default_value: "10",
    },
    ConfigParam {
        name: "PARK_TIMEOUT_MS",
        rust_type: "u64",
        default_value: "100",
    },
    ConfigParam {
        name: "DEBUG_LOGGING",
        rust_type: "bool",
        default_value: "false",
    },
];

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let dest_path = Path::new(&out_dir).join("greenrt_merged_config.rs");

    let mut config: HashMap<&'static str, String> = CONFIG_PARAMS
        .iter()
        .map(|p| (p.name, p.default_value.to_string()))
        .collect();

    let user_path = env::var("GREENRT_CONFIG_RS").ok();
    if let Some(path) = &user_path {
        println!("cargo:rerun-if-changed={}", path);
        match fs::read_to_string(path) {
            Ok(content) => {
                merge_overrides(&content, &mut config);
                println!("cargo:warning=Using custom config: {}", path);
            }
            Err(e) => {
                println!("cargo:warning=Failed to read GREENRT_CONFIG_RS ({}): {}", path, e);
            }
        }
    }
    println!("cargo:rerun-if-env-changed=GREENRT_CONFIG_RS");

    let output = render(&config, user_path.is_some());
    fs::write(&dest_path, output).expect("Failed to write merged config");
}

/// Apply every recognised `pub const` line in `content` to `config`
fn merge_overrides(content: &str, config: &mut HashMap<&'static str, String>) {
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        let Some((name, value)) = parse_const_line(line) else {
            continue;
        };
        match CONFIG_PARAMS.iter().find(|p| p.name == name) {
            Some(param) => {
                config.insert(param.name, value);
            }
            None => println!("cargo:warning=Unknown config parameter: {}", name),
        }
    }
}

/// `pub const NAME: TYPE = VALUE;` -> (NAME, VALUE)
fn parse_const_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("pub const ")?.trim();
    let colon = rest.find(':')?;
    let eq = rest.find('=')?;
    if eq < colon {
        return None;
    }
    let end = rest.rfind(';').unwrap_or(rest.len());
    let name = rest[..colon].trim().to_string();
    let value = rest[eq + 1..end].trim().to_string();
    Some((name, value))
}

fn render(config: &HashMap<&'static str, String>, has_overrides: bool) -> String {
    let mut output = String::from("// Auto-generated by build.rs - do not edit\n");
    if has_overrides {
        output.push_str("// Library defaults merged with GREENRT_CONFIG_RS\n");
    }
    output.push('\n');
    for param in CONFIG_PARAMS {
        let value = config.get(param.name).map(String::as_str).unwrap_or(param.default_value);
        output.push_str(&format!("pub const {}: {} = {};\n", param.name, param.rust_type, value));
    }
    output
}
